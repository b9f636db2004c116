//! An abstraction layer for the language models driving the travel agent.
//!
//! This crate establishes a unified protocol for the orchestrator to talk
//! to the supported model providers, so that the orchestrator can switch
//! between them without modifying the core codebase.
//!
//! Messages defined here are also the unit of persistence: a thread's
//! conversation is nothing but a sequence of [`ModelMessage`]s, so every
//! message type is serializable.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
