//! Tool registry and self-healing executor.

pub mod executor;
pub mod registry;

pub use executor::{ExecutionResult, RetryConfig, ToolExecutor};
pub use registry::{Tool, ToolError, ToolRegistry};
