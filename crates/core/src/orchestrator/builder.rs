use std::sync::Arc;
use std::time::Duration;

use trip_agent_model::ModelProvider;

use super::{Inner, Orchestrator};
use crate::email::{EmailRenderer, Mailer, MarkdownRenderer};
use crate::model_client::ModelClient;
use crate::store::StateStore;
use crate::tool::{Invoker, RegistryBuilder, Tool};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the tools to look up information.";
const DEFAULT_MAX_ITERATIONS: usize = 10;
const DEFAULT_MODEL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MODEL_RETRY_BUDGET: Duration = Duration::from_secs(30);

/// [`Orchestrator`] builder.
pub struct OrchestratorBuilder {
    model_client: ModelClient,
    store: Arc<dyn StateStore>,
    mailer: Arc<dyn Mailer>,
    renderer: Arc<dyn EmailRenderer>,
    tools: RegistryBuilder,
    system_prompt: String,
    max_iterations: usize,
    model_timeout: Duration,
    tool_timeout: Duration,
    model_retry_budget: Option<Duration>,
    on_transcript: Option<Arc<dyn Fn(&str) + Send + Sync>>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the model provider, the store the
    /// conversations are kept in, and the mailer final answers are sent
    /// with.
    pub fn new<P: ModelProvider + 'static>(
        provider: P,
        store: Arc<dyn StateStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            model_client: ModelClient::new(provider),
            store,
            mailer,
            renderer: Arc::new(MarkdownRenderer),
            tools: RegistryBuilder::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            model_timeout: DEFAULT_MODEL_TIMEOUT,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            model_retry_budget: Some(DEFAULT_MODEL_RETRY_BUDGET),
            on_transcript: None,
        }
    }

    /// Registers a tool.
    #[inline]
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        self.tools.add_tool(tool);
        self
    }

    /// Sets how final answers are rendered into email bodies. Defaults to
    /// [`MarkdownRenderer`].
    #[inline]
    pub fn with_email_renderer(
        mut self,
        renderer: Arc<dyn EmailRenderer>,
    ) -> Self {
        self.renderer = renderer;
        self
    }

    /// Sets the system instructions prepended to every model request.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the maximum number of model calls per run. Defaults to 10.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the timeout of one model call. Defaults to 120 seconds.
    #[inline]
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout = timeout;
        self
    }

    /// Sets the timeout of one tool call. Defaults to 60 seconds.
    #[inline]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Sets for how long rate-limited model calls are retried, `None`
    /// disables retrying. Defaults to 30 seconds.
    #[inline]
    pub fn with_model_retry_budget(mut self, budget: Option<Duration>) -> Self {
        self.model_retry_budget = budget;
        self
    }

    /// Attaches a callback receiving the assistant text as it streams.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> Orchestrator {
        let registry = Arc::new(self.tools.build());
        let invoker = Invoker::new(registry).with_timeout(self.tool_timeout);
        Orchestrator {
            inner: Arc::new(Inner {
                model_client: self.model_client,
                invoker,
                store: self.store,
                mailer: self.mailer,
                renderer: self.renderer,
                system_prompt: self.system_prompt,
                max_iterations: self.max_iterations,
                model_timeout: self.model_timeout,
                model_retry_budget: self.model_retry_budget,
                on_transcript: self.on_transcript,
                thread_locks: Default::default(),
            }),
        }
    }
}
