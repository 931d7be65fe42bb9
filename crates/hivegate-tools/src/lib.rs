//! Built-in tools for the agent loop.
//!
//! Only the tools the gateway itself depends on live here: `exec`
//! (dispatching through the node-aware [`ExecRouter`]) and `memory`
//! (over the deep memory store). Further tools are external
//! collaborators implementing the same [`Tool`](hivegate_core::tools::Tool)
//! contract.

pub mod exec_tool;
pub mod memory_tool;

pub use exec_tool::ExecTool;
pub use memory_tool::MemoryTool;
