//! Conversation-related types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use trip_agent_model::{
    AssistantMessage, ModelMessage, ToolCallRequest, ToolCallResult,
};

/// Where a thread is in its lifecycle.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// The thread accepts new input, or has unfinished work.
    #[default]
    Open,
    /// The model produced a final answer and the thread waits for the
    /// caller to confirm sending it.
    AwaitingSend,
    /// The final answer has been sent.
    Done,
}

/// A violation of the message log invariants.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    /// The same call id appears twice in one assistant message.
    #[error("duplicate tool call id `{0}`")]
    DuplicateToolCallId(String),
    /// A tool result does not answer any pending tool call.
    #[error("tool result `{0}` does not match a pending tool call")]
    UnmatchedToolResult(String),
}

/// The durable state of one thread: an append-only message log and its
/// stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    thread_id: String,
    #[serde(default)]
    stage: Stage,
    #[serde(default)]
    messages: Vec<ModelMessage>,
}

impl Conversation {
    /// Creates an empty conversation for the given thread.
    #[inline]
    pub fn new<S: Into<String>>(thread_id: S) -> Self {
        Self {
            thread_id: thread_id.into(),
            stage: Stage::Open,
            messages: vec![],
        }
    }

    /// Returns the thread id.
    #[inline]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Returns the current stage.
    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns all the messages, oldest first.
    #[inline]
    pub fn messages(&self) -> &[ModelMessage] {
        &self.messages
    }

    /// Returns the last message of the log.
    #[inline]
    pub fn last_message(&self) -> Option<&ModelMessage> {
        self.messages.last()
    }

    /// Returns the final answer of the model, i.e. the text of the last
    /// message when it is an assistant message without tool calls.
    pub fn final_answer(&self) -> Option<&str> {
        match self.messages.last() {
            Some(ModelMessage::Assistant(msg)) if !msg.has_tool_calls() => {
                Some(&msg.content)
            }
            _ => None,
        }
    }

    /// Returns the tool calls of the last assistant message that have not
    /// been answered yet.
    pub fn pending_tool_calls(&self) -> Vec<&ToolCallRequest> {
        let Some((idx, assistant)) = self.last_assistant() else {
            return vec![];
        };
        let answered = self.answered_ids(idx);
        assistant
            .tool_calls
            .iter()
            .filter(|req| !answered.contains(req.id.as_str()))
            .collect()
    }

    #[inline]
    pub(crate) fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    #[inline]
    pub(crate) fn push_user<S: Into<String>>(&mut self, input: S) {
        self.messages.push(ModelMessage::User(input.into()));
    }

    pub(crate) fn push_assistant(
        &mut self,
        msg: AssistantMessage,
    ) -> Result<(), ConversationError> {
        let mut seen = HashSet::with_capacity(msg.tool_calls.len());
        for req in &msg.tool_calls {
            if !seen.insert(req.id.as_str()) {
                return Err(ConversationError::DuplicateToolCallId(
                    req.id.clone(),
                ));
            }
        }
        self.messages.push(ModelMessage::Assistant(msg));
        Ok(())
    }

    /// Appends tool results after the last assistant message. Each result
    /// must answer exactly one of its pending tool calls. Nothing is
    /// appended if any result is rejected.
    pub(crate) fn push_tool_results<I>(
        &mut self,
        results: I,
    ) -> Result<(), ConversationError>
    where
        I: IntoIterator<Item = ToolCallResult>,
    {
        let results: Vec<_> = results.into_iter().collect();
        {
            let mut pending: HashSet<&str> = self
                .pending_tool_calls()
                .into_iter()
                .map(|req| req.id.as_str())
                .collect();
            for result in &results {
                if !pending.remove(result.id.as_str()) {
                    return Err(ConversationError::UnmatchedToolResult(
                        result.id.clone(),
                    ));
                }
            }
        }
        self.messages
            .extend(results.into_iter().map(ModelMessage::Tool));
        Ok(())
    }

    fn last_assistant(&self) -> Option<(usize, &AssistantMessage)> {
        self.messages
            .iter()
            .enumerate()
            .rev()
            .find_map(|(idx, msg)| match msg {
                ModelMessage::Assistant(msg) => Some((idx, msg)),
                _ => None,
            })
    }

    fn answered_ids(&self, assistant_idx: usize) -> HashSet<&str> {
        self.messages[assistant_idx + 1..]
            .iter()
            .filter_map(|msg| match msg {
                ModelMessage::Tool(result) => Some(result.id.as_str()),
                _ => None,
            })
            .collect()
    }
}
