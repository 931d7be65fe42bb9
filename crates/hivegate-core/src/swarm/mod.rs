//! Swarm orchestration: decompose an objective into a task DAG, fan it
//! out to worker agents, and aggregate the results.

pub mod orchestrator;
pub mod patterns;
pub mod worker;

pub use orchestrator::{SwarmOrchestrator, SwarmTask, TaskResult, should_use_swarm};
pub use patterns::{pattern_names, tasks_for_pattern};
pub use worker::{SwarmWorker, WorkerPool};
