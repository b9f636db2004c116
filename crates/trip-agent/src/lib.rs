//! A travel agent that looks up flights and hotels, answers the user and
//! emails the answer once the user confirms.
//!
//! The crate includes a CLI tool for using in the terminal. It can also be
//! used as a library, see [`TravelAgentBuilder`].

#![deny(missing_docs)]

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod agent;
pub mod config;
pub mod mail;
pub mod tools;

pub use agent::{TravelAgent, TravelAgentBuilder, system_prompt};

/// Re-exports of [`trip_agent_core`] crate.
pub mod core {
    pub use trip_agent_core::*;
}
