use std::any::Any;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::Value;
use tracing::Instrument;
use trip_agent_model::{ToolCallRequest, ToolCallResult};

use crate::tool::{Error, ErrorKind, Registry, ToolResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// The outcome of one tool call request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolOutcome {
    /// The call id of the request.
    pub id: String,
    /// The requested tool name.
    pub name: String,
    /// What the tool returned.
    pub result: ToolResult,
}

impl ToolOutcome {
    /// Returns the text handed back to the model.
    pub fn content(&self) -> String {
        match &self.result {
            Ok(Value::String(text)) => text.clone(),
            Ok(value) => value.to_string(),
            Err(err) if err.kind() == ErrorKind::UnknownTool => {
                err.reason().into_owned()
            }
            Err(err) => format!("Error: {}", err.reason()),
        }
    }

    /// Converts the outcome into a tool message payload.
    #[inline]
    pub fn into_result(self) -> ToolCallResult {
        ToolCallResult {
            content: self.content(),
            id: self.id,
            name: self.name,
        }
    }
}

/// Executes batches of tool call requests against a [`Registry`].
#[derive(Clone)]
pub struct Invoker {
    registry: Arc<Registry>,
    timeout: Duration,
}

impl Invoker {
    /// Creates an invoker with the default per-call timeout.
    #[inline]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-call timeout.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the registry the invoker dispatches to.
    #[inline]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Runs all the requests concurrently and returns one outcome per
    /// request, in the order of `requests`.
    ///
    /// A failing call never affects the others: unknown tools, invalid
    /// arguments, errors, panics and timeouts all become error outcomes.
    pub async fn invoke_all(
        &self,
        requests: &[ToolCallRequest],
    ) -> Vec<ToolOutcome> {
        let span = debug_span!("tool invoker", count = requests.len());
        let futs: Vec<_> = span.in_scope(|| {
            requests.iter().map(|req| self.spawn_one(req)).collect()
        });
        let results = join_all(futs).instrument(span).await;

        requests
            .iter()
            .zip(results)
            .map(|(req, result)| {
                if let Err(err) = &result {
                    debug!("tool `{}` ({}) failed: {}", req.name, req.id, err);
                }
                ToolOutcome {
                    id: req.id.clone(),
                    name: req.name.clone(),
                    result,
                }
            })
            .collect()
    }

    fn spawn_one(
        &self,
        req: &ToolCallRequest,
    ) -> Pin<Box<dyn Future<Output = ToolResult> + Send>> {
        let Some(tool) = self.registry.get(&req.name) else {
            warn!("tool not found: {}", req.name);
            return Box::pin(std::future::ready(Err(Error::unknown_tool())));
        };

        trace!("spawning a tool ({}) with args: {:?}", req.id, req.arguments);
        let tool = Arc::clone(tool);
        let arguments = req.arguments.clone();
        let timeout = self.timeout;
        let span =
            debug_span!("tool execute", tool = %req.name, id = %req.id);
        // Building the future may panic too, so it happens in the task.
        let handle = tokio::spawn(
            async move {
                let fut = tool.execute(arguments);
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::timeout().with_reason(format!(
                        "tool did not finish within {}s",
                        timeout.as_secs_f32()
                    ))),
                }
            }
            .instrument(span),
        );
        Box::pin(async move {
            match handle.await {
                Ok(result) => result,
                Err(err) if err.is_panic() => {
                    let reason = panic_message(err.into_panic());
                    error!("tool panicked: {reason}");
                    Err(Error::execution_error()
                        .with_reason(format!("tool panicked: {reason}")))
                }
                Err(err) => {
                    Err(Error::execution_error().with_reason(format!("{err}")))
                }
            }
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_owned()
    }
}
