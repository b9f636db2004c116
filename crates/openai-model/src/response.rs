use std::collections::{BTreeMap, VecDeque};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use serde_json::Value;
use trip_agent_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    ToolCallRequest,
};

use crate::Error;
use crate::io::Sse;
use crate::proto::{ChatCompletionChunk, ToolCall};

/// A tool call whose pieces are still arriving.
#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn patch(&mut self, delta: ToolCall) {
        if let Some(id) = delta.id {
            self.id.push_str(&id);
        }
        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                self.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                self.arguments.push_str(&arguments);
            }
        }
    }

    fn finish(self) -> ToolCallRequest {
        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            // Keep unparsable arguments as a raw string, the tool will then
            // report an invalid input back to the model.
            serde_json::from_str(&self.arguments)
                .unwrap_or(Value::String(self.arguments))
        };
        ToolCallRequest {
            id: self.id,
            name: self.name,
            arguments,
        }
    }
}

struct StreamState {
    sse: Sse,
    id: Option<String>,
    // Tool calls are only emitted after the stream says it has finished,
    // because their arguments are streamed in pieces.
    tool_calls: BTreeMap<u32, PartialToolCall>,
    pending_events: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl StreamState {
    fn absorb(&mut self, chunk: ChatCompletionChunk) -> Result<(), Error> {
        if self.id.get_or_insert_with(|| chunk.id.clone()) != &chunk.id {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }

        // Only the first choice is requested, and usage-only chunks have no
        // choice at all.
        for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
            if let Some(content) = choice.delta.content {
                if !content.is_empty() {
                    self.pending_events
                        .push_back(ModelResponseEvent::MessageDelta(content));
                }
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let index = delta.index.unwrap_or_default();
                self.tool_calls.entry(index).or_default().patch(delta);
            }
            if let Some(reason) = choice.finish_reason {
                self.finish(Some(&reason));
            }
        }
        Ok(())
    }

    fn finish(&mut self, reason: Option<&str>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let has_tool_calls = !self.tool_calls.is_empty();
        for (_, partial) in std::mem::take(&mut self.tool_calls) {
            self.pending_events
                .push_back(ModelResponseEvent::ToolCall(partial.finish()));
        }
        let reason = match reason {
            Some("tool_calls") => ModelFinishReason::ToolCalls,
            Some(_) => ModelFinishReason::Stop,
            None if has_tool_calls => ModelFinishReason::ToolCalls,
            None => ModelFinishReason::Stop,
        };
        self.pending_events
            .push_back(ModelResponseEvent::Completed(reason));
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, StreamState), Error>;

pub struct OpenAIResponse {
    next_event_fut: Option<PinnedFuture<NextEvent>>,
}

impl OpenAIResponse {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        let state = StreamState {
            sse,
            id: None,
            tool_calls: Default::default(),
            pending_events: Default::default(),
            finished: false,
        };
        Self {
            next_event_fut: Some(Box::pin(next_event(state))),
        }
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let Some(next_event_fut) = &mut self.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        match ready!(next_event_fut.as_mut().poll(cx)) {
            Ok((Some(event), state)) => {
                // The stream may still have more data to pull, create a new
                // future for the next event.
                self.next_event_fut = Some(Box::pin(next_event(state)));
                Poll::Ready(Ok(Some(event)))
            }
            Ok((None, _)) => {
                self.next_event_fut = None;
                Poll::Ready(Ok(None))
            }
            Err(err) => {
                self.next_event_fut = None;
                Poll::Ready(Err(err))
            }
        }
    }
}

async fn next_event(mut state: StreamState) -> NextEvent {
    loop {
        if let Some(event) = state.pending_events.pop_front() {
            return Ok((Some(event), state));
        }
        if state.finished {
            return Ok((None, state));
        }

        let data = state
            .sse
            .next_event()
            .await
            .map_err(|err| Error::new(format!("{err:?}"), ErrorKind::Other))?;
        trace!("got sse event: {data:?}");
        match data.as_deref() {
            None | Some("[DONE]") => state.finish(None),
            Some(data) => {
                let chunk = serde_json::from_str::<ChatCompletionChunk>(data)
                    .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
                state.absorb(chunk)?;
            }
        }
    }
}
