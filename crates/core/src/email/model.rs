use std::sync::Arc;

use async_trait::async_trait;
use trip_agent_model::{ModelMessage, ModelProvider, ModelRequest};

use super::{EmailRenderer, RenderError};
use crate::model_client::ModelClient;

/// The instructions given to the model when it renders an email body.
pub const EMAIL_SYSTEM_PROMPT: &str = "\
Your task is to convert structured markdown-like text into a valid HTML email body.

Do not include a html preamble in your response.
The output should be in proper HTML format, ready to be used as the body of an email.
";

/// Asks a model to rewrite the final answer as an HTML email body.
#[derive(Clone)]
pub struct ModelEmailRenderer {
    model_client: ModelClient,
    system_prompt: Arc<str>,
}

impl ModelEmailRenderer {
    /// Creates a renderer backed by the given model provider.
    pub fn with_model_provider<P: ModelProvider + 'static>(
        provider: P,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            system_prompt: Arc::from(EMAIL_SYSTEM_PROMPT),
        }
    }

    /// Replaces the default instructions.
    pub fn with_system_prompt<S: AsRef<str>>(mut self, prompt: S) -> Self {
        self.system_prompt = Arc::from(prompt.as_ref());
        self
    }
}

#[async_trait]
impl EmailRenderer for ModelEmailRenderer {
    async fn render(&self, text: &str) -> Result<String, RenderError> {
        let req = ModelRequest {
            messages: vec![
                ModelMessage::System(self.system_prompt.to_string()),
                ModelMessage::User(text.to_owned()),
            ],
            tools: vec![],
        };
        let resp = self
            .model_client
            .send_request(req, |_| {})
            .await
            .map_err(|err| {
                let kind = err.kind();
                RenderError(format!("model request failed ({kind}): {err}"))
            })?;

        let body = strip_code_fence(&resp.transcript);
        if body.is_empty() {
            let reason = "the model returned an empty body";
            return Err(RenderError(reason.to_owned()));
        }
        Ok(body.to_owned())
    }
}

/// Models often wrap HTML in a fenced code block despite the instructions.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(rest) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the info string, e.g. "html".
    match rest.split_once('\n') {
        Some((_, body)) => body.trim(),
        None => rest.trim(),
    }
}
