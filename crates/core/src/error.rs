use trip_agent_model::ErrorKind as ModelErrorKind;

use crate::conversation::ConversationError;
use crate::email::{MailError, RenderError};
use crate::store::StoreError;

/// The classification of an [`Error`], for deciding whether to retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The model call failed.
    ModelInvocation,
    /// The tool-calling loop did not converge.
    RecursionExceeded,
    /// The operation is not allowed in the thread's current stage.
    InvalidState,
    /// The email parameters are incomplete.
    InvalidParams,
    /// The email body could not be rendered.
    Render,
    /// The email could not be delivered.
    MailDelivery,
    /// The state store failed.
    Store,
    /// The message log would become inconsistent.
    Conversation,
}

/// Errors surfaced by the orchestrator.
///
/// Tool failures never show up here, they are reported to the model as
/// tool messages instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The model call failed. Nothing was persisted.
    #[error("model invocation failed ({kind}): {message}")]
    ModelInvocation {
        /// The provider's classification of the failure.
        kind: ModelErrorKind,
        /// What happened.
        message: String,
    },
    /// The model kept asking for tools. Progress up to the last tool
    /// results was persisted.
    #[error("no final answer after {limit} model calls")]
    RecursionExceeded {
        /// The configured maximum number of model calls per run.
        limit: usize,
    },
    /// The thread cannot serve the operation in its current stage. Nothing
    /// was changed.
    #[error("thread `{thread_id}` {reason}")]
    InvalidState {
        /// The thread.
        thread_id: String,
        /// Why the operation was refused.
        reason: String,
    },
    /// The email parameters passed to `resume` are incomplete.
    #[error("invalid email parameters: {0}")]
    InvalidParams(String),
    /// The email body could not be rendered. The thread still awaits
    /// sending.
    #[error("failed to render the email: {0}")]
    Render(#[from] RenderError),
    /// The email could not be delivered. The thread still awaits sending.
    #[error("failed to deliver the email: {0}")]
    MailDelivery(#[from] MailError),
    /// The state store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The message log would become inconsistent.
    #[error(transparent)]
    Conversation(#[from] ConversationError),
}

impl Error {
    pub(crate) fn invalid_state(
        thread_id: &str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            thread_id: thread_id.to_owned(),
            reason: reason.into(),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ModelInvocation { .. } => ErrorKind::ModelInvocation,
            Error::RecursionExceeded { .. } => ErrorKind::RecursionExceeded,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::InvalidParams(_) => ErrorKind::InvalidParams,
            Error::Render(_) => ErrorKind::Render,
            Error::MailDelivery(_) => ErrorKind::MailDelivery,
            Error::Store(_) => ErrorKind::Store,
            Error::Conversation(_) => ErrorKind::Conversation,
        }
    }

    /// Returns whether calling the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ModelInvocation { kind, .. } => matches!(
                kind,
                ModelErrorKind::RateLimitExceeded
                    | ModelErrorKind::Timeout
                    | ModelErrorKind::Other
            ),
            Error::RecursionExceeded { .. }
            | Error::Render(_)
            | Error::MailDelivery(_)
            | Error::Store(_) => true,
            Error::InvalidState { .. }
            | Error::InvalidParams(_)
            | Error::Conversation(_) => false,
        }
    }
}
