use std::fmt::{self, Display};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The content is moderated.
    Moderated,
    /// The model provider is rate limited.
    RateLimitExceeded,
    /// The model did not answer in time.
    Timeout,
    /// The model answered with something that breaks the protocol, e.g.
    /// two tool calls sharing one id.
    MalformedResponse,
    /// Any other errors.
    Other,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Moderated => write!(f, "moderated"),
            ErrorKind::RateLimitExceeded => write!(f, "rate limit exceeded"),
            ErrorKind::Timeout => write!(f, "timed out"),
            ErrorKind::MalformedResponse => write!(f, "malformed response"),
            ErrorKind::Other => write!(f, "other"),
        }
    }
}
