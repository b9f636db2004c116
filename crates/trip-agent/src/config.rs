//! Configuration read from the environment.

use std::path::PathBuf;
use std::str::FromStr;

use trip_agent_openai_model::{OpenAIConfig, OpenAIConfigBuilder};

const DEFAULT_STATE_DIR: &str = ".trip-agent/threads";
const DEFAULT_EMAIL_SUBJECT: &str = "Travel Information";

/// An error found while reading the configuration.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    /// A variable has a value that cannot be used.
    #[error("{name} has an invalid value `{value}`: {reason}")]
    Invalid {
        /// The variable name.
        name: &'static str,
        /// The offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// How final answers are turned into email bodies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RendererKind {
    /// Ask the model to write the HTML.
    #[default]
    Model,
    /// Convert the answer as Markdown.
    Markdown,
}

impl FromStr for RendererKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "model" => Ok(Self::Model),
            "markdown" => Ok(Self::Markdown),
            _ => Err("expected `model` or `markdown`".to_owned()),
        }
    }
}

/// Everything the travel agent binary needs to run.
#[derive(Clone)]
pub struct AppConfig {
    /// `OPENAI_API_KEY`.
    pub openai_api_key: String,
    /// `OPENAI_BASE_URL`, the OpenAI API by default.
    pub openai_base_url: Option<String>,
    /// `OPENAI_MODEL`.
    pub openai_model: Option<String>,
    /// `OPENAI_API_VERSION`, set for Azure OpenAI deployments.
    pub openai_api_version: Option<String>,
    /// `SERPAPI_API_KEY`. Searches fail without it.
    pub serpapi_api_key: Option<String>,
    /// `SENDGRID_API_KEY`. Emails cannot be sent without it.
    pub sendgrid_api_key: Option<String>,
    /// `TRIP_AGENT_STATE_DIR`, where threads are stored.
    pub state_dir: PathBuf,
    /// `TRIP_AGENT_MAX_ITERATIONS`.
    pub max_iterations: Option<usize>,
    /// `TRIP_AGENT_EMAIL_RENDERER`.
    pub email_renderer: RendererKind,
    /// `FROM_EMAIL`, the default sender.
    pub from_email: Option<String>,
    /// `TO_EMAIL`, the default recipient.
    pub to_email: Option<String>,
    /// `EMAIL_SUBJECT`.
    pub email_subject: String,
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    #[inline]
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration with `lookup`, which maps a variable name to
    /// its value. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let openai_api_key =
            var("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        let max_iterations = match var("TRIP_AGENT_MAX_ITERATIONS") {
            Some(value) => Some(parse_max_iterations(value)?),
            None => None,
        };
        let email_renderer = match var("TRIP_AGENT_EMAIL_RENDERER") {
            Some(value) => {
                value.parse().map_err(|reason| ConfigError::Invalid {
                    name: "TRIP_AGENT_EMAIL_RENDERER",
                    value,
                    reason,
                })?
            }
            None => RendererKind::default(),
        };

        Ok(Self {
            openai_api_key,
            openai_base_url: var("OPENAI_BASE_URL"),
            openai_model: var("OPENAI_MODEL"),
            openai_api_version: var("OPENAI_API_VERSION"),
            serpapi_api_key: var("SERPAPI_API_KEY"),
            sendgrid_api_key: var("SENDGRID_API_KEY"),
            state_dir: var("TRIP_AGENT_STATE_DIR")
                .unwrap_or_else(|| DEFAULT_STATE_DIR.to_owned())
                .into(),
            max_iterations,
            email_renderer,
            from_email: var("FROM_EMAIL"),
            to_email: var("TO_EMAIL"),
            email_subject: var("EMAIL_SUBJECT")
                .unwrap_or_else(|| DEFAULT_EMAIL_SUBJECT.to_owned()),
        })
    }

    /// Returns the configuration of the model provider.
    pub fn openai_config(&self) -> OpenAIConfig {
        let mut builder =
            OpenAIConfigBuilder::with_api_key(self.openai_api_key.clone());
        if let Some(base_url) = &self.openai_base_url {
            builder = builder.with_base_url(base_url);
        }
        if let Some(model) = &self.openai_model {
            builder = builder.with_model(model);
        }
        if let Some(api_version) = &self.openai_api_version {
            builder = builder.with_api_version(api_version);
        }
        builder.build()
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |key: &Option<String>| key.as_ref().map(|_| "<redacted>");
        f.debug_struct("AppConfig")
            .field("openai_api_key", &"<redacted>")
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("openai_api_version", &self.openai_api_version)
            .field("serpapi_api_key", &redacted(&self.serpapi_api_key))
            .field("sendgrid_api_key", &redacted(&self.sendgrid_api_key))
            .field("state_dir", &self.state_dir)
            .field("max_iterations", &self.max_iterations)
            .field("email_renderer", &self.email_renderer)
            .field("from_email", &self.from_email)
            .field("to_email", &self.to_email)
            .field("email_subject", &self.email_subject)
            .finish()
    }
}

fn parse_max_iterations(value: String) -> Result<usize, ConfigError> {
    match value.parse::<usize>() {
        Ok(0) => Err(ConfigError::Invalid {
            name: "TRIP_AGENT_MAX_ITERATIONS",
            value,
            reason: "must be at least 1".to_owned(),
        }),
        Ok(n) => Ok(n),
        Err(err) => Err(ConfigError::Invalid {
            name: "TRIP_AGENT_MAX_ITERATIONS",
            value,
            reason: err.to_string(),
        }),
    }
}
