//! The tool-calling loop and the email hand-off.

mod builder;
mod machine;
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::Instrument;
use trip_agent_model::{
    AssistantMessage, ErrorKind as ModelErrorKind, ModelMessage, ModelRequest,
};

use crate::conversation::{Conversation, Stage};
use crate::email::{EmailParams, EmailRenderer, Mailer, OutgoingEmail};
use crate::error::Error;
use crate::model_client::{ModelClient, ModelClientResponse};
use crate::store::StateStore;
use crate::tool::{Invoker, ToolOutcome};
pub use builder::OrchestratorBuilder;
use machine::Step;

const RETRY_INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Drives threads through the tool-calling loop.
///
/// [`Orchestrator::run`] calls the model and the tools it asks for until
/// the model produces a final answer, then stores the thread and returns.
/// The thread stays paused until [`Orchestrator::resume`] sends the answer
/// by email, or a new user message reopens it.
///
/// Operations on the same thread are serialized, distinct threads are
/// processed concurrently. The orchestrator is cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    model_client: ModelClient,
    invoker: Invoker,
    store: Arc<dyn StateStore>,
    mailer: Arc<dyn Mailer>,
    renderer: Arc<dyn EmailRenderer>,
    system_prompt: String,
    max_iterations: usize,
    model_timeout: Duration,
    model_retry_budget: Option<Duration>,
    on_transcript: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    /// Runs a thread until the model produces a final answer.
    ///
    /// With `input`, the message is appended to the thread (created if
    /// needed) first. A thread awaiting send is reopened by a new message.
    /// Without `input`, an open thread continues from where it stopped,
    /// e.g. after [`Error::RecursionExceeded`].
    ///
    /// On success the returned thread is in [`Stage::AwaitingSend`]. A
    /// failed model call leaves the stored thread untouched.
    pub async fn run(
        &self,
        thread_id: &str,
        input: Option<String>,
    ) -> Result<Conversation, Error> {
        let span = info_span!("run", thread_id);
        self.run_locked(thread_id, input).instrument(span).await
    }

    /// Renders the final answer of a thread awaiting send, emails it and
    /// marks the thread as done.
    ///
    /// If rendering or delivery fails, the thread keeps awaiting send and
    /// the call can be retried.
    pub async fn resume(
        &self,
        thread_id: &str,
        params: &EmailParams,
    ) -> Result<Conversation, Error> {
        let span = info_span!("resume", thread_id);
        self.resume_locked(thread_id, params).instrument(span).await
    }

    /// Deletes a thread. Unknown threads are ignored.
    pub async fn discard(&self, thread_id: &str) -> Result<(), Error> {
        let _guard = self.lock_thread(thread_id).await;
        self.inner.store.delete(thread_id).await?;
        info!(thread_id, "thread discarded");
        Ok(())
    }

    /// Returns the stored state of a thread.
    pub async fn state(
        &self,
        thread_id: &str,
    ) -> Result<Option<Conversation>, Error> {
        let _guard = self.lock_thread(thread_id).await;
        Ok(self.inner.store.get(thread_id).await?)
    }

    async fn run_locked(
        &self,
        thread_id: &str,
        input: Option<String>,
    ) -> Result<Conversation, Error> {
        let _guard = self.lock_thread(thread_id).await;
        let inner = &self.inner;

        let mut conversation = inner
            .store
            .get(thread_id)
            .await?
            .unwrap_or_else(|| Conversation::new(thread_id));
        let mut step = machine::entry(&conversation, input.is_some())
            .map_err(|reason| Error::invalid_state(thread_id, reason))?;
        if let Some(input) = input {
            if conversation.stage() == Stage::AwaitingSend {
                debug!("reopening the thread");
            }
            conversation.push_user(input);
            conversation.set_stage(Stage::Open);
        }

        let mut model_calls = 0;
        loop {
            trace!("step: {step:?}");
            match step {
                Step::CallModel => {
                    if model_calls >= inner.max_iterations {
                        warn!("no final answer after {model_calls} model calls");
                        inner.store.put(thread_id, &conversation).await?;
                        return Err(Error::RecursionExceeded {
                            limit: inner.max_iterations,
                        });
                    }
                    model_calls += 1;
                    let msg = self.call_model(&conversation).await?;
                    conversation.push_assistant(msg).map_err(|err| {
                        Error::ModelInvocation {
                            kind: ModelErrorKind::MalformedResponse,
                            message: err.to_string(),
                        }
                    })?;
                }
                Step::Decide => {}
                Step::InvokeTools => {
                    let requests: Vec<_> = conversation
                        .pending_tool_calls()
                        .into_iter()
                        .cloned()
                        .collect();
                    debug!("invoking {} tool(s)", requests.len());
                    let outcomes = inner.invoker.invoke_all(&requests).await;
                    conversation.push_tool_results(
                        outcomes.into_iter().map(ToolOutcome::into_result),
                    )?;
                }
                Step::AwaitingSend => {
                    conversation.set_stage(Stage::AwaitingSend);
                    inner.store.put(thread_id, &conversation).await?;
                    info!("final answer after {model_calls} model call(s)");
                    return Ok(conversation);
                }
            }
            step = machine::next(step, &conversation);
        }
    }

    async fn resume_locked(
        &self,
        thread_id: &str,
        params: &EmailParams,
    ) -> Result<Conversation, Error> {
        params.validate().map_err(Error::InvalidParams)?;
        let _guard = self.lock_thread(thread_id).await;
        let inner = &self.inner;

        let Some(mut conversation) = inner.store.get(thread_id).await? else {
            return Err(Error::invalid_state(thread_id, "does not exist"));
        };
        let answer = machine::check_resumable(&conversation)
            .map_err(|reason| Error::invalid_state(thread_id, reason))?;

        let html_body = inner.renderer.render(answer).await.inspect_err(
            |err| error!("failed to render the email: {err}"),
        )?;
        let email = OutgoingEmail::new(params, html_body);
        inner
            .mailer
            .send(&email)
            .await
            .inspect_err(|err| error!("failed to send the email: {err}"))?;
        info!(to = %email.to, "email sent");

        conversation.set_stage(Stage::Done);
        inner.store.put(thread_id, &conversation).await?;
        Ok(conversation)
    }

    async fn call_model(
        &self,
        conversation: &Conversation,
    ) -> Result<AssistantMessage, Error> {
        let inner = &self.inner;
        let mut messages = Vec::with_capacity(conversation.messages().len() + 1);
        messages.push(ModelMessage::System(inner.system_prompt.clone()));
        messages.extend_from_slice(conversation.messages());
        let req = ModelRequest {
            messages,
            tools: inner.invoker.registry().definitions(),
        };

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(RETRY_INITIAL_INTERVAL)
            .with_max_elapsed_time(inner.model_retry_budget)
            .build();
        let resp = backoff::future::retry(policy, || {
            let req = req.clone();
            async move { self.call_model_once(req).await }
        })
        .await?;

        trace!("model finished: {:?}", resp.finish_reason);
        Ok(resp.into_message())
    }

    async fn call_model_once(
        &self,
        req: ModelRequest,
    ) -> Result<ModelClientResponse, backoff::Error<Error>> {
        let inner = &self.inner;
        let on_transcript = inner.on_transcript.clone();
        let streamed = Arc::new(AtomicBool::new(false));
        let fut = inner.model_client.send_request(req, {
            let streamed = Arc::clone(&streamed);
            move |delta| {
                streamed.store(true, Ordering::Relaxed);
                if let Some(on_transcript) = &on_transcript {
                    on_transcript(&delta);
                }
            }
        });

        let err = match tokio::time::timeout(inner.model_timeout, fut).await {
            Ok(Ok(resp)) => return Ok(resp),
            Ok(Err(err)) => err,
            Err(_) => {
                let secs = inner.model_timeout.as_secs_f32();
                return Err(backoff::Error::permanent(Error::ModelInvocation {
                    kind: ModelErrorKind::Timeout,
                    message: format!("no response within {secs}s"),
                }));
            }
        };

        // Text that already reached the transcript hook can't be taken back.
        let retry = err.is_transient()
            && inner.model_retry_budget.is_some()
            && !streamed.load(Ordering::Relaxed);
        let err = Error::ModelInvocation {
            kind: err.kind(),
            message: err.to_string(),
        };
        if retry {
            warn!("{err}, retrying");
            Err(backoff::Error::transient(err))
        } else {
            Err(backoff::Error::permanent(err))
        }
    }

    async fn lock_thread(&self, thread_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.thread_locks.lock().await;
            // Locks nobody holds or waits for can go.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(thread_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }
}
