//! The agent loop.

pub mod loop_core;

pub use loop_core::{AgentDeps, AgentLoop};
