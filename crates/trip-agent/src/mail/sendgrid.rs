use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use trip_agent_core::email::{MailError, Mailer, OutgoingEmail};

const DEFAULT_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

/// Sends emails through the SendGrid v3 API.
#[derive(Clone)]
pub struct SendGridMailer {
    client: Client,
    api_key: String,
    endpoint: String,
}

impl SendGridMailer {
    /// Creates a mailer authenticating with the given API key.
    pub fn new<S: Into<String>>(api_key: S) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_owned(),
        }
    }

    /// Sets a custom endpoint.
    #[inline]
    pub fn with_endpoint<S: Into<String>>(mut self, endpoint: S) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

impl std::fmt::Debug for SendGridMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendGridMailer")
            .field("api_key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload(email))
            .send()
            .await
            .map_err(|err| MailError::new(err.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            debug!("SendGrid accepted the email with {status}");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(MailError::new(format!("SendGrid returned {status}: {body}"))
            .with_status(status.as_u16()))
    }
}

fn payload(email: &OutgoingEmail) -> Value {
    json!({
        "personalizations": [{ "to": [{ "email": email.to }] }],
        "from": { "email": email.from },
        "subject": email.subject,
        "content": [{ "type": "text/html", "value": email.html_body }]
    })
}
