//! Mail transports.

mod sendgrid;

use async_trait::async_trait;
use trip_agent_core::email::{MailError, Mailer, OutgoingEmail};

pub use sendgrid::SendGridMailer;

/// A mailer that refuses every email, used when no transport is
/// configured.
#[derive(Clone, Debug)]
pub struct UnavailableMailer {
    reason: String,
}

impl UnavailableMailer {
    /// Creates the mailer. `reason` is reported on every send.
    #[inline]
    pub fn new<S: Into<String>>(reason: S) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl Mailer for UnavailableMailer {
    async fn send(&self, _email: &OutgoingEmail) -> Result<(), MailError> {
        Err(MailError::new(self.reason.clone()))
    }
}
