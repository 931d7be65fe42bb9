//! The swarm orchestrator.
//!
//! Decomposes an objective (via a named pattern or an orchestrator-model
//! call), schedules the task DAG in dependency order with parallel
//! batches, retries transient failures with linear backoff, and
//! aggregates the results into one response. A scheduling round that
//! finds no ready task while work remains is a deadlock: the stuck tasks
//! are surfaced as failures instead of hanging.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use regex::Regex;
use tracing::{info, warn};

use hivegate_llm::ChatClient;
use hivegate_types::config::SwarmConfig;
use hivegate_types::provider::{ChatMessage, ChatOptions};

use crate::classify;

use super::patterns::{pattern_for_label, tasks_for_pattern};
use super::worker::WorkerPool;

/// One task in the swarm DAG.
#[derive(Debug, Clone)]
pub struct SwarmTask {
    pub id: String,
    pub description: String,
    pub instructions: String,
    pub dependencies: Vec<String>,
    pub timeout: Duration,
    pub metadata: HashMap<String, String>,
}

impl SwarmTask {
    /// Create a task.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        instructions: String,
        dependencies: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            instructions,
            dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
            timeout: Duration::from_secs(60),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata key.
    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    fn specialization(&self) -> String {
        if let Some(explicit) = self.metadata.get("specialization") {
            return explicit.clone();
        }
        let desc = self.description.to_lowercase();
        if ["code", "implement", "write"].iter().any(|k| desc.contains(k)) {
            "code".into()
        } else if ["search", "research", "find"].iter().any(|k| desc.contains(k)) {
            "research".into()
        } else if ["review", "analyze", "critique"].iter().any(|k| desc.contains(k)) {
            "review".into()
        } else {
            String::new()
        }
    }
}

/// Result of one task.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    pub result: String,
    pub error: String,
    pub elapsed: Duration,
    pub worker_id: String,
    pub retry_count: u32,
}

/// Transient-error heuristic for swarm task retry. Permanent patterns
/// veto the transient ones.
pub fn is_transient_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    const PERMANENT: &[&str] = &[
        "not found", "invalid", "missing required", "permission denied",
        "unauthorized", "forbidden",
    ];
    if PERMANENT.iter().any(|p| lower.contains(p)) {
        return false;
    }
    const TRANSIENT: &[&str] = &[
        "timeout", "timed out", "connection", "network", "temporary",
        "unavailable", "retry", "rate limit", "no worker available", "busy",
    ];
    TRANSIENT.iter().any(|p| lower.contains(p))
}

/// Whether to divert a message to the swarm.
pub fn should_use_swarm(
    content: &str,
    task_label: &str,
    config: &SwarmConfig,
) -> Option<&'static str> {
    if !config.enabled || !config.auto_trigger {
        return None;
    }
    if classify::complexity_score(content) < config.complexity_threshold {
        return None;
    }
    Some(pattern_for_label(task_label))
}

/// Orchestrates decomposition, scheduling, and aggregation.
pub struct SwarmOrchestrator {
    config: SwarmConfig,
    client: Arc<ChatClient>,
    pool: WorkerPool,
}

impl SwarmOrchestrator {
    /// Create an orchestrator over a chat client.
    pub fn new(config: SwarmConfig, client: Arc<ChatClient>) -> Self {
        let pool = WorkerPool::new(
            config.worker_model.clone(),
            config.max_workers,
            Duration::from_secs(60),
        );
        Self {
            config,
            client,
            pool,
        }
    }

    /// Execute an objective end to end. Returns the aggregated text.
    pub async fn execute(&self, objective: &str, pattern: Option<&str>) -> String {
        if !self.config.enabled {
            return "Swarm system is disabled".into();
        }
        info!(
            objective = %objective.chars().take(50).collect::<String>(),
            "swarm executing"
        );

        let tasks = self.decompose(objective, pattern).await;
        if tasks.is_empty() {
            return "Failed to decompose task into subtasks".into();
        }
        info!(tasks = tasks.len(), "objective decomposed");

        let results = self.run_tasks(tasks).await;
        self.aggregate(objective, &results).await
    }

    /// Decompose: pattern first, orchestrator-model JSON otherwise.
    async fn decompose(&self, objective: &str, pattern: Option<&str>) -> Vec<SwarmTask> {
        if let Some(name) = pattern {
            if let Some(tasks) = tasks_for_pattern(name, objective, "") {
                info!(pattern = name, "using pattern decomposition");
                return tasks;
            }
            warn!(pattern = name, "unknown pattern, falling back to model decomposition");
        }

        let prompt = format!(
            "You are a task orchestrator. Decompose this objective into 2-5 \
             subtasks.\n\nObjective: {objective}\n\n\
             Return a JSON array of tasks:\n\
             [{{\"id\": \"task_1\", \"description\": \"...\", \
             \"instructions\": \"...\", \"dependencies\": []}}, ...]\n\n\
             Make tasks as independent as possible, with clear instructions \
             and logical dependency ordering. Return ONLY the JSON array."
        );
        let options = ChatOptions {
            max_tokens: Some(2000),
            temperature: Some(0.3),
            ..Default::default()
        };
        let response = self
            .client
            .chat(
                &[ChatMessage::user(prompt)],
                &self.config.orchestrator_model,
                &options,
            )
            .await;
        if response.finish_reason == "error" {
            return Vec::new();
        }
        parse_task_array(&response.content)
    }

    /// Schedule the DAG: each round runs every ready task (up to
    /// `max_workers`) in parallel, feeding dependency results forward.
    async fn run_tasks(&self, tasks: Vec<SwarmTask>) -> Vec<TaskResult> {
        let mut pending: HashMap<String, SwarmTask> =
            tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let mut completed: HashSet<String> = HashSet::new();
        let mut results: Vec<TaskResult> = Vec::new();
        let mut dependency_output: HashMap<String, String> = HashMap::new();
        let mut retry_counts: HashMap<String, u32> = HashMap::new();

        while !pending.is_empty() {
            let ready: Vec<SwarmTask> = pending
                .values()
                .filter(|t| t.dependencies.iter().all(|d| completed.contains(d)))
                .take(self.config.max_workers)
                .cloned()
                .collect();

            if ready.is_empty() {
                // Deadlock: surface the stuck tasks instead of spinning.
                warn!(stuck = pending.len(), "no ready tasks, aborting schedule");
                for (id, task) in pending.drain() {
                    results.push(TaskResult {
                        task_id: id.clone(),
                        success: false,
                        result: String::new(),
                        error: format!(
                            "unresolvable dependencies: {}",
                            task.dependencies.join(", ")
                        ),
                        elapsed: Duration::ZERO,
                        worker_id: String::new(),
                        retry_count: *retry_counts.get(&id).unwrap_or(&0),
                    });
                }
                break;
            }

            let batch = join_all(ready.iter().map(|task| {
                let retry_count = *retry_counts.get(&task.id).unwrap_or(&0);
                self.run_single(task, &dependency_output, retry_count)
            }))
            .await;

            for result in batch {
                let task_id = result.task_id.clone();
                if !result.success && self.config.retry_failed {
                    let retries = retry_counts.entry(task_id.clone()).or_insert(0);
                    if *retries < self.config.max_retries
                        && is_transient_error(&result.error)
                    {
                        *retries += 1;
                        info!(
                            task = %task_id,
                            attempt = *retries + 1,
                            "retrying transient task failure"
                        );
                        // Linear backoff with attempt number.
                        tokio::time::sleep(Duration::from_millis(
                            100 * (*retries as u64),
                        ))
                        .await;
                        continue; // Task stays pending for the next round.
                    }
                }

                dependency_output.insert(task_id.clone(), result.result.clone());
                completed.insert(task_id.clone());
                pending.remove(&task_id);
                results.push(result);
            }
        }
        results
    }

    async fn run_single(
        &self,
        task: &SwarmTask,
        dependency_output: &HashMap<String, String>,
        retry_count: u32,
    ) -> TaskResult {
        let start = Instant::now();

        let worker = self.pool.acquire(&task.specialization()).await;

        let mut dep_context = String::new();
        for dep in &task.dependencies {
            if let Some(output) = dependency_output.get(dep) {
                let snippet: String = output.chars().take(500).collect();
                dep_context.push_str(&format!("\nResult from {dep}: {snippet}"));
            }
        }

        let retry_note = if retry_count > 0 {
            format!("\n\n(Note: this is retry attempt {})", retry_count + 1)
        } else {
            String::new()
        };
        let prompt = format!(
            "Task: {}\n\nInstructions:\n{}\n{}{}\n\nProvide a clear, actionable result.",
            task.description,
            task.instructions,
            if dep_context.is_empty() {
                String::new()
            } else {
                format!("\nContext from previous tasks:{dep_context}")
            },
            retry_note,
        );

        let (success, output) = worker.execute(&self.client, &prompt, &dep_context).await;

        TaskResult {
            task_id: task.id.clone(),
            success,
            result: if success { output.clone() } else { String::new() },
            error: if success { String::new() } else { output },
            elapsed: start.elapsed(),
            worker_id: worker.id.clone(),
            retry_count,
        }
    }

    /// Ask the orchestrator model to synthesize; concatenate successful
    /// results when synthesis fails.
    async fn aggregate(&self, objective: &str, results: &[TaskResult]) -> String {
        let summary: Vec<String> = results
            .iter()
            .map(|r| {
                let body = if r.success { &r.result } else { &r.error };
                let snippet: String = body.chars().take(300).collect();
                format!(
                    "{} {}: {}",
                    if r.success { "[ok]" } else { "[failed]" },
                    r.task_id,
                    snippet
                )
            })
            .collect();

        let prompt = format!(
            "You are aggregating results from multiple workers.\n\n\
             Original Objective: {objective}\n\nTask Results:\n{}\n\n\
             Synthesize these into a coherent, comprehensive response that \
             addresses the original objective. If some tasks failed, work \
             with what succeeded and note any gaps.",
            summary.join("\n")
        );
        let options = ChatOptions {
            max_tokens: Some(3000),
            temperature: Some(0.5),
            ..Default::default()
        };
        let response = self
            .client
            .chat(
                &[ChatMessage::user(prompt)],
                &self.config.orchestrator_model,
                &options,
            )
            .await;

        if response.finish_reason != "error" && !response.content.is_empty() {
            return response.content;
        }

        // Fallback: concatenation of successful results under their ids.
        results
            .iter()
            .filter(|r| r.success)
            .map(|r| format!("## {}\n{}", r.task_id, r.result))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Parse a JSON task array out of model output.
fn parse_task_array(content: &str) -> Vec<SwarmTask> {
    let Some(m) = Regex::new(r"(?s)\[.*\]")
        .ok()
        .and_then(|re| re.find(content))
    else {
        return Vec::new();
    };
    let Ok(raw) = serde_json::from_str::<Vec<serde_json::Value>>(m.as_str()) else {
        return Vec::new();
    };
    raw.iter()
        .enumerate()
        .map(|(i, value)| {
            let deps: Vec<&str> = value
                .get("dependencies")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|d| d.as_str()).collect())
                .unwrap_or_default();
            SwarmTask::new(
                value
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| format!("task_{i}")),
                value
                    .get("description")
                    .and_then(|v| v.as_str())
                    .unwrap_or(""),
                value
                    .get("instructions")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                &deps,
            )
        })
        .collect()
}
