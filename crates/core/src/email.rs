//! The hand-off of a final answer to an email recipient.

mod markdown;
mod model;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use markdown::MarkdownRenderer;
pub use model::{EMAIL_SYSTEM_PROMPT, ModelEmailRenderer};

/// Caller-provided addressing of the email.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailParams {
    /// The sender address.
    pub from: String,
    /// The recipient address.
    pub to: String,
    /// The subject line.
    pub subject: String,
}

impl EmailParams {
    /// Creates the parameters.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
        }
    }

    /// Checks that every field is filled and the addresses look like
    /// addresses.
    pub fn validate(&self) -> Result<(), String> {
        for (field, address) in [("from", &self.from), ("to", &self.to)] {
            let address = address.trim();
            if address.is_empty() {
                return Err(format!("`{field}` is empty"));
            }
            match address.split_once('@') {
                Some((local, domain))
                    if !local.is_empty() && !domain.is_empty() => {}
                _ => return Err(format!("`{field}` is not an email address")),
            }
        }
        if self.subject.trim().is_empty() {
            return Err("`subject` is empty".to_owned());
        }
        Ok(())
    }
}

/// A rendered email, ready to be transmitted.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutgoingEmail {
    /// The sender address.
    pub from: String,
    /// The recipient address.
    pub to: String,
    /// The subject line.
    pub subject: String,
    /// The HTML body.
    pub html_body: String,
}

impl OutgoingEmail {
    /// Creates an email from the addressing and a rendered body.
    #[inline]
    pub fn new(params: &EmailParams, html_body: String) -> Self {
        Self {
            from: params.from.clone(),
            to: params.to.clone(),
            subject: params.subject.clone(),
            html_body,
        }
    }
}

/// The email body could not be rendered.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct RenderError(pub String);

/// The email could not be delivered.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct MailError {
    message: String,
    status: Option<u16>,
}

impl MailError {
    /// Creates an error without a status code, e.g. a transport failure.
    #[inline]
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    /// Attaches the status code returned by the mail service.
    #[inline]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the status code returned by the mail service, if any.
    #[inline]
    pub fn status(&self) -> Option<u16> {
        self.status
    }
}

/// Turns the final answer of the model into an HTML email body.
#[async_trait]
pub trait EmailRenderer: Send + Sync {
    /// Renders `text` into HTML.
    async fn render(&self, text: &str) -> Result<String, RenderError>;
}

/// Transmits rendered emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends the email.
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}
