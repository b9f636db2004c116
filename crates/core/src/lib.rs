//! Core logic of the travel agent: the tool-calling loop, tool execution,
//! conversation persistence and the email hand-off.

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

pub mod conversation;
pub mod email;
mod error;
mod model_client;
mod orchestrator;
pub mod store;
pub mod tool;

pub use conversation::{Conversation, Stage};
pub use error::{Error, ErrorKind};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use tool::Tool;
