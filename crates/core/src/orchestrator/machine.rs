//! Pure step transitions of the tool-calling loop. Effects (model calls,
//! tool calls, persistence) are performed by the orchestrator.

use trip_agent_model::ModelMessage;

use crate::conversation::{Conversation, Stage};

/// A step of the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// Ask the model for the next assistant message.
    CallModel,
    /// Look at the last assistant message.
    Decide,
    /// Run the tool calls of the last assistant message.
    InvokeTools,
    /// A final answer is there, pause until the caller resumes.
    AwaitingSend,
}

/// Returns the step `run` starts from, or why the thread can't run.
pub(crate) fn entry(
    conversation: &Conversation,
    has_input: bool,
) -> Result<Step, &'static str> {
    match conversation.stage() {
        Stage::Done => return Err("has already been sent"),
        Stage::AwaitingSend if !has_input => {
            return Err("is awaiting send confirmation");
        }
        Stage::Open | Stage::AwaitingSend => {}
    }

    let has_pending_tools = !conversation.pending_tool_calls().is_empty();
    if has_input {
        if has_pending_tools {
            return Err("has unfinished tool calls");
        }
        return Ok(Step::CallModel);
    }

    match conversation.last_message() {
        None => Err("has no message to answer"),
        Some(ModelMessage::Assistant(_)) if has_pending_tools => {
            Ok(Step::InvokeTools)
        }
        Some(ModelMessage::Assistant(_)) => Err("has nothing left to do"),
        Some(ModelMessage::Tool(_)) if has_pending_tools => {
            Ok(Step::InvokeTools)
        }
        Some(_) => Ok(Step::CallModel),
    }
}

/// Returns the step following `step`, once its effect has been applied
/// to `conversation`.
pub(crate) fn next(step: Step, conversation: &Conversation) -> Step {
    match step {
        Step::CallModel => Step::Decide,
        Step::Decide => match conversation.last_message() {
            Some(ModelMessage::Assistant(msg)) if msg.has_tool_calls() => {
                Step::InvokeTools
            }
            _ => Step::AwaitingSend,
        },
        Step::InvokeTools => Step::CallModel,
        Step::AwaitingSend => Step::AwaitingSend,
    }
}

/// Checks that `resume` may send the final answer of `conversation`.
pub(crate) fn check_resumable(
    conversation: &Conversation,
) -> Result<&str, &'static str> {
    match conversation.stage() {
        Stage::AwaitingSend => conversation
            .final_answer()
            .ok_or("has no final answer to send"),
        Stage::Done => Err("has already been sent"),
        Stage::Open => Err("is not awaiting send confirmation"),
    }
}
