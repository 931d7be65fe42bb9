//! Swarm workers.
//!
//! A worker is a lightweight agent: one provider call with a system
//! prompt specialized by task metadata. The pool creates workers lazily
//! up to `max_workers` and reuses them by specialization.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use hivegate_llm::ChatClient;
use hivegate_types::provider::{ChatMessage, ChatOptions};

/// One worker agent.
pub struct SwarmWorker {
    /// Worker id ("worker_1", …).
    pub id: String,
    /// Model the worker calls.
    pub model: String,
    /// Specialization: "code", "research", "review", "creative", or "".
    pub specialization: String,
    timeout: Duration,
    stats: Mutex<WorkerStats>,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub task_count: u64,
    pub success_count: u64,
    pub total_seconds: f64,
}

impl SwarmWorker {
    fn new(id: String, model: String, specialization: String, timeout: Duration) -> Self {
        Self {
            id,
            model,
            specialization,
            timeout,
            stats: Mutex::new(WorkerStats::default()),
        }
    }

    fn system_prompt(&self) -> String {
        let base = format!("You are {} in a swarm system.", self.id);
        let specialization = match self.specialization.as_str() {
            "code" => {
                "You specialize in code tasks: writing clean, well-documented \
                 code, debugging, review, and optimization."
            }
            "research" => {
                "You specialize in research tasks: finding relevant \
                 information, summarizing findings, and synthesizing sources."
            }
            "review" => {
                "You specialize in review tasks: analyzing content for \
                 quality, identifying issues, and giving constructive feedback."
            }
            "creative" => {
                "You specialize in creative tasks: generating original \
                 content, brainstorming, and creative problem-solving."
            }
            _ => {
                "You are a general-purpose worker: follow detailed \
                 instructions and produce clear, actionable output."
            }
        };
        format!("{base}\n{specialization}\n\nFocus on your assigned task and provide clear results.")
    }

    /// Execute one task prompt. Returns `(success, result_or_error)`.
    pub async fn execute(&self, client: &ChatClient, task: &str, context: &str) -> (bool, String) {
        let start = Instant::now();
        {
            let mut stats = self.stats.lock().await;
            stats.task_count += 1;
        }

        let mut messages = vec![ChatMessage::system(self.system_prompt())];
        if !context.is_empty() {
            messages.push(ChatMessage::user(format!("Context:\n{context}")));
        }
        messages.push(ChatMessage::user(task));

        let options = ChatOptions {
            max_tokens: Some(2000),
            temperature: Some(0.7),
            ..Default::default()
        };

        let response = match tokio::time::timeout(
            self.timeout,
            client.chat(&messages, &self.model, &options),
        )
        .await
        {
            Ok(response) => response,
            Err(_) => {
                warn!(worker = %self.id, "task timed out");
                return (false, "Task timed out".into());
            }
        };

        if response.finish_reason == "error" {
            return (false, response.content);
        }

        let mut stats = self.stats.lock().await;
        stats.success_count += 1;
        stats.total_seconds += start.elapsed().as_secs_f64();
        (true, response.content)
    }

    /// Snapshot of this worker's counters.
    pub async fn stats(&self) -> WorkerStats {
        self.stats.lock().await.clone()
    }
}

/// Lazily-populated worker pool.
pub struct WorkerPool {
    model: String,
    max_workers: usize,
    timeout: Duration,
    workers: Mutex<HashMap<String, Arc<SwarmWorker>>>,
}

impl WorkerPool {
    /// Create a pool producing workers on the given model.
    pub fn new(model: impl Into<String>, max_workers: usize, timeout: Duration) -> Self {
        Self {
            model: model.into(),
            max_workers,
            timeout,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Get a worker for a specialization, creating one while under the
    /// limit; at the limit any existing worker is reused.
    pub async fn acquire(&self, specialization: &str) -> Arc<SwarmWorker> {
        let mut workers = self.workers.lock().await;

        if let Some(worker) = workers
            .values()
            .find(|w| w.specialization == specialization)
        {
            return worker.clone();
        }

        if workers.len() < self.max_workers {
            let id = format!("worker_{}", workers.len() + 1);
            debug!(worker = %id, specialization, "creating swarm worker");
            let worker = Arc::new(SwarmWorker::new(
                id.clone(),
                self.model.clone(),
                specialization.to_string(),
                self.timeout,
            ));
            workers.insert(id, worker.clone());
            return worker;
        }

        // At capacity: reuse any worker.
        workers
            .values()
            .next()
            .cloned()
            .expect("non-empty pool at capacity")
    }

    /// Stats for every worker.
    pub async fn all_stats(&self) -> Vec<(String, WorkerStats)> {
        let workers = self.workers.lock().await;
        let mut rows = Vec::with_capacity(workers.len());
        for (id, worker) in workers.iter() {
            rows.push((id.clone(), worker.stats().await));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> WorkerPool {
        WorkerPool::new("worker-model", 3, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn acquire_reuses_by_specialization() {
        let pool = pool();
        let a = pool.acquire("code").await;
        let b = pool.acquire("code").await;
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn acquire_creates_up_to_limit() {
        let pool = pool();
        let a = pool.acquire("code").await;
        let b = pool.acquire("research").await;
        let c = pool.acquire("review").await;
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);

        // Fourth specialization reuses an existing worker.
        let d = pool.acquire("creative").await;
        assert!([a.id.clone(), b.id.clone(), c.id.clone()].contains(&d.id));
    }

    #[tokio::test]
    async fn specialization_shapes_system_prompt() {
        let pool = pool();
        let code = pool.acquire("code").await;
        assert!(code.system_prompt().contains("code tasks"));
        let general = pool.acquire("").await;
        assert!(general.system_prompt().contains("general-purpose"));
    }

    #[tokio::test]
    async fn stats_start_empty() {
        let pool = pool();
        let worker = pool.acquire("code").await;
        let stats = worker.stats().await;
        assert_eq!(stats.task_count, 0);
        assert_eq!(stats.success_count, 0);
    }
}
