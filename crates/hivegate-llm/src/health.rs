//! Per-model health tracking.
//!
//! Every model gets a [`ModelHealth`] record. A failure marks the model
//! unhealthy and starts a cooldown; the model is skipped by the fallback
//! chain until the cooldown elapses. A success resets the record.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default cooldown after a failure.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(300);

/// Health record for one model.
#[derive(Debug, Clone)]
pub struct ModelHealth {
    /// Whether the model is currently considered usable.
    pub healthy: bool,
    /// When the last failure happened.
    pub last_failure: Option<Instant>,
    /// Consecutive failure count.
    pub failure_count: u32,
    /// The model is skipped until this instant.
    pub cooldown_until: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            last_failure: None,
            failure_count: 0,
            cooldown_until: None,
            last_error: None,
        }
    }
}

impl ModelHealth {
    /// True if the model may be tried now.
    pub fn available(&self, now: Instant) -> bool {
        if self.healthy {
            return true;
        }
        match self.cooldown_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// Thread-safe registry of model health records.
pub struct HealthRegistry {
    cooldown: Duration,
    records: Mutex<HashMap<String, ModelHealth>>,
}

impl HealthRegistry {
    /// Create a registry with the default cooldown.
    pub fn new() -> Self {
        Self::with_cooldown(DEFAULT_COOLDOWN)
    }

    /// Create a registry with a custom cooldown.
    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            cooldown,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// True if the model may be tried now.
    pub fn is_available(&self, model: &str) -> bool {
        let records = self.records.lock().unwrap();
        records
            .get(model)
            .map(|h| h.available(Instant::now()))
            .unwrap_or(true)
    }

    /// Record a success: reset the model to healthy.
    pub fn mark_success(&self, model: &str) {
        let mut records = self.records.lock().unwrap();
        records.insert(model.to_string(), ModelHealth::default());
    }

    /// Record a failure: mark unhealthy and start the cooldown.
    pub fn mark_failure(&self, model: &str, error: &str) {
        let now = Instant::now();
        let mut records = self.records.lock().unwrap();
        let record = records.entry(model.to_string()).or_default();
        record.healthy = false;
        record.failure_count += 1;
        record.last_failure = Some(now);
        record.cooldown_until = Some(now + self.cooldown);
        record.last_error = Some(error.to_string());
    }

    /// Snapshot of a model's health, if tracked.
    pub fn get(&self, model: &str) -> Option<ModelHealth> {
        self.records.lock().unwrap().get(model).cloned()
    }

    /// Snapshot of all tracked models.
    pub fn snapshot(&self) -> HashMap<String, ModelHealth> {
        self.records.lock().unwrap().clone()
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}
