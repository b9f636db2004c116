use serde::{Deserialize, Serialize};
use trip_agent_model::{ErrorKind, ToolCallRequest};

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
}

/// The preset response for an assistant turn.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
    /// The kind reported by the scripted failures.
    #[serde(skip)]
    pub failure_kind: Option<ErrorKind>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            failure_kind: None,
        }
    }

    /// Creates a `PresetResponse` that streams `text` word by word.
    pub fn with_text(text: &str) -> Self {
        Self::with_events(
            text.split_inclusive(' ')
                .map(|word| PresetEvent::MessageDelta(word.to_owned()))
                .collect::<Vec<_>>(),
        )
    }

    /// Creates a `PresetResponse` that requests the given tool calls.
    pub fn with_tool_calls(calls: impl IntoIterator<Item = ToolCallRequest>) -> Self {
        Self::with_events(
            calls.into_iter().map(PresetEvent::ToolCall).collect::<Vec<_>>(),
        )
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the error kind reported by the scripted failures.
    #[inline]
    pub fn with_failure_kind(mut self, kind: ErrorKind) -> Self {
        self.failure_kind = Some(kind);
        self
    }

    pub(crate) fn has_tool_call(&self) -> bool {
        self.events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)))
    }
}
