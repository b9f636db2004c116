//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::time::{Sleep, sleep};
use trip_agent_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub fn message(&self) -> &'static str {
        self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    preset: Option<PresetResponse>,
    event_idx: usize,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        let Some(preset) = &this.preset else {
            return Poll::Ready(Err(Error {
                message: "no enough turns",
                kind: ErrorKind::Other,
            }));
        };

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            let event = if this.event_idx < preset.events.len() {
                Some(match &preset.events[this.event_idx] {
                    PresetEvent::MessageDelta(msg) => {
                        ModelResponseEvent::MessageDelta(msg.clone())
                    }
                    PresetEvent::ToolCall(req) => {
                        ModelResponseEvent::ToolCall(req.clone())
                    }
                })
            } else if this.event_idx == preset.events.len() {
                Some(ModelResponseEvent::Completed(if preset.has_tool_call() {
                    ModelFinishReason::ToolCalls
                } else {
                    ModelFinishReason::Stop
                }))
            } else {
                // In case this method is called after completion.
                None
            };
            this.event_idx += 1;
            return Poll::Ready(Ok(event));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the conversation script, which
/// is how the model should respond to a request. A response is selected by
/// counting the assistant messages already present in the request, so the
/// first request of a thread gets the first turn, the request following the
/// tool results gets the second turn, and so on. If there are no enough turns
/// in the script and no fallback is set, an error will be returned.
///
/// Clones share the failure counters and the request log.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    conversation_script: Vec<PresetResponse>,
    fallback: Option<PresetResponse>,
    delay: Option<Duration>,
    attempts: Arc<Mutex<HashMap<usize, u64>>>,
    received: Arc<Mutex<Vec<ModelRequest>>>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_assistant_turn(&mut self, preset: PresetResponse) {
        self.conversation_script.push(preset);
    }

    /// Sets the response used once the script is exhausted.
    #[inline]
    pub fn set_fallback(&mut self, preset: PresetResponse) {
        self.fallback = Some(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all the requests received so far.
    pub fn received_requests(&self) -> Vec<ModelRequest> {
        self.received.lock().unwrap().clone()
    }

    fn select_turn(&self, req: &ModelRequest) -> (usize, Option<PresetResponse>) {
        let turn_idx = req
            .messages
            .iter()
            .filter(|msg| matches!(msg, ModelMessage::Assistant(_)))
            .count();
        let preset = self
            .conversation_script
            .get(turn_idx)
            .or(self.fallback.as_ref())
            .cloned();
        (turn_idx, preset)
    }

    fn should_fail(&self, turn_idx: usize, preset: &PresetResponse) -> bool {
        let Some(failures) = preset.failures else {
            return false;
        };
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = attempts.entry(turn_idx).or_default();
        *attempt += 1;
        failures == 0 || *attempt <= failures
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        self.received.lock().unwrap().push(req.clone());

        let (turn_idx, preset) = self.select_turn(req);
        if let Some(preset) = &preset {
            if self.should_fail(turn_idx, preset) {
                return ready(Err(Error {
                    message: "scripted failure",
                    kind: preset.failure_kind.unwrap_or(ErrorKind::Other),
                }));
            }
        }

        ready(Ok(TestModelResponse {
            preset,
            event_idx: 0,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            sleep: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use serde_json::json;
    use trip_agent_model::{
        AssistantMessage, ModelMessage, ModelRequest, ToolCallRequest,
    };

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Vec<ToolCallRequest>, Option<ModelFinishReason>) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_calls = vec![];
        let mut finish_reason = None;
        while let Some(event) = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
            .await
            .unwrap()
        {
            match event {
                ModelResponseEvent::Completed(reason) => {
                    finish_reason = Some(reason);
                }
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
            }
        }
        (msg, tool_calls, finish_reason)
    }

    fn flights_call() -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".to_owned(),
            name: "flights_finder".to_owned(),
            arguments: json!({ "departure_airport": "JFK" }),
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_turn(PresetResponse::with_tool_calls([
            flights_call(),
        ]));
        provider.add_assistant_turn(PresetResponse::with_text(
            "There is one flight.",
        ));

        let mut req = ModelRequest {
            messages: vec![ModelMessage::User("Flights to LHR".to_owned())],
            tools: vec![],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_calls, reason) = collect_response(resp).await;
        assert!(msg.is_empty());
        assert_eq!(tool_calls, vec![flights_call()]);
        assert_eq!(reason, Some(ModelFinishReason::ToolCalls));

        req.messages.push(ModelMessage::Assistant(AssistantMessage {
            content: msg,
            tool_calls,
        }));
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_calls, reason) = collect_response(resp).await;
        assert_eq!(msg, "There is one flight.");
        assert!(tool_calls.is_empty());
        assert_eq!(reason, Some(ModelFinishReason::Stop));

        assert_eq!(provider.received_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_turn(
            PresetResponse::with_text("Hello")
                .with_failures(2)
                .with_failure_kind(ErrorKind::RateLimitExceeded),
        );
        let req = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        };

        for _ in 0..2 {
            let Err(err) = provider.send_request(&req).await else {
                panic!("expected a scripted failure");
            };
            assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
        }
        assert!(provider.send_request(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_turn() {
        let provider = TestModelProvider::default();
        let req = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tools: vec![],
        };
        // The response is `Unpin`, no pinning needed to poll it.
        let mut resp = provider.send_request(&req).await.unwrap();
        let err = poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "no enough turns");
    }
}
