use std::sync::Arc;

use chrono::Datelike;
use trip_agent_core::email::{EmailParams, EmailRenderer, Mailer};
use trip_agent_core::store::StateStore;
use trip_agent_core::{Conversation, Error, Orchestrator, OrchestratorBuilder};
use trip_agent_model::ModelProvider;

use crate::tools::{FlightsFinder, HotelsFinder, SerpApiClient};

/// Returns the default instructions of the travel agent.
pub fn system_prompt(current_year: i32) -> String {
    include_str!("./system_prompt.md")
        .replace("{{CURRENT_YEAR}}", &current_year.to_string())
}

/// A travel agent builder.
///
/// See [`TravelAgent`].
pub struct TravelAgentBuilder {
    orchestrator_builder: OrchestratorBuilder,
}

impl TravelAgentBuilder {
    /// Creates a builder with the model provider, the search service the
    /// tools use, and where threads and emails go.
    pub fn new<P: ModelProvider + 'static>(
        provider: P,
        search: SerpApiClient,
        store: Arc<dyn StateStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let current_year = chrono::Local::now().year();
        let orchestrator_builder =
            OrchestratorBuilder::new(provider, store, mailer)
                .with_system_prompt(system_prompt(current_year))
                .with_tool(FlightsFinder::new(search.clone()))
                .with_tool(HotelsFinder::new(search));
        Self {
            orchestrator_builder,
        }
    }

    /// Sets how final answers are rendered into email bodies.
    #[inline]
    pub fn with_email_renderer(
        mut self,
        renderer: Arc<dyn EmailRenderer>,
    ) -> Self {
        self.orchestrator_builder =
            self.orchestrator_builder.with_email_renderer(renderer);
        self
    }

    /// Replaces the default instructions, see [`system_prompt`].
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.orchestrator_builder =
            self.orchestrator_builder.with_system_prompt(prompt);
        self
    }

    /// Sets the maximum number of model calls per query.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.orchestrator_builder =
            self.orchestrator_builder.with_max_iterations(max_iterations);
        self
    }

    /// Attaches a callback receiving the assistant text as it streams.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        self.orchestrator_builder =
            self.orchestrator_builder.on_transcript(on_transcript);
        self
    }

    /// Builds the agent.
    pub fn build(self) -> TravelAgent {
        TravelAgent {
            orchestrator: self.orchestrator_builder.build(),
        }
    }
}

/// A travel agent holding any number of threads.
///
/// It is basically a wrapper around [`Orchestrator`] with the search tools
/// registered. Cloning is cheap.
#[derive(Clone)]
pub struct TravelAgent {
    orchestrator: Orchestrator,
}

impl TravelAgent {
    /// Sends a query to a thread, creating the thread if needed, and
    /// returns the final answer. The answer is only emailed after
    /// [`TravelAgent::confirm_send`].
    pub async fn submit_query(
        &self,
        thread_id: &str,
        query: impl Into<String>,
    ) -> Result<String, Error> {
        let conversation =
            self.orchestrator.run(thread_id, Some(query.into())).await?;
        Ok(final_answer(&conversation))
    }

    /// Continues a thread that stopped before its final answer, e.g. after
    /// reaching the iteration limit.
    pub async fn continue_thread(
        &self,
        thread_id: &str,
    ) -> Result<String, Error> {
        let conversation = self.orchestrator.run(thread_id, None).await?;
        Ok(final_answer(&conversation))
    }

    /// Emails the final answer of a thread.
    #[inline]
    pub async fn confirm_send(
        &self,
        thread_id: &str,
        params: &EmailParams,
    ) -> Result<(), Error> {
        self.orchestrator.resume(thread_id, params).await?;
        Ok(())
    }

    /// Deletes a thread.
    #[inline]
    pub async fn discard(&self, thread_id: &str) -> Result<(), Error> {
        self.orchestrator.discard(thread_id).await
    }

    /// Returns the stored state of a thread.
    #[inline]
    pub async fn state(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, Error> {
        self.orchestrator.state(thread_id).await
    }
}

#[inline]
fn final_answer(conversation: &Conversation) -> String {
    conversation.final_answer().unwrap_or_default().to_owned()
}
