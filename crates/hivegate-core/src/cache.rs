//! Response cache for single-turn answers.
//!
//! Keyed by `(content, model)`. Only simple, non-personalized,
//! tool-free answers are worth caching; [`should_cache`] is the
//! gatekeeper. Entries expire after a TTL and the store is capacity
//! bounded, evicting the oldest entry first.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

/// Default entry lifetime.
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default capacity.
const DEFAULT_MAX_SIZE: usize = 500;

#[derive(Debug, Clone)]
struct CacheEntry {
    response: String,
    inserted_at: Instant,
}

/// TTL + capacity bounded response cache.
pub struct ResponseCache {
    ttl: Duration,
    max_size: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResponseCache {
    /// Create a cache with default TTL (1h) and capacity (500).
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_SIZE, DEFAULT_TTL)
    }

    /// Create a cache with explicit limits.
    pub fn with_limits(max_size: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            max_size,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key(content: &str, model: &str) -> String {
        format!("{model}\u{1}{content}")
    }

    /// Look up a cached response; expired entries are dropped on read.
    pub async fn get(&self, content: &str, model: &str) -> Option<String> {
        let key = Self::key(content, model);
        let mut entries = self.entries.lock().await;
        match entries.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                debug!("response cache hit");
                Some(entry.response.clone())
            }
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Insert a response, evicting the oldest entry at capacity.
    pub async fn put(&self, content: &str, model: &str, response: &str) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.max_size {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            Self::key(content, model),
            CacheEntry {
                response: response.to_string(),
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True when empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a query's answer is worth caching.
///
/// Short factual queries benefit; anything long, personalized, or
/// time-sensitive does not.
pub fn should_cache(content: &str, task_type: &str) -> bool {
    if content.split_whitespace().count() > 30 {
        return false;
    }
    let lower = content.to_lowercase();
    const PERSONAL: &[&str] = &[
        "my ", "me ", "our ", "remind", "today", "tomorrow", "now",
        "current", "latest",
    ];
    if PERSONAL.iter().any(|p| lower.contains(p)) {
        return false;
    }
    matches!(task_type, "simple_query" | "chat" | "")
}
