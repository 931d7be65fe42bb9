//! Model profile registry.
//!
//! Persists every profile in a single JSON file
//! (`{version, updated_at, profiles}`), answers selection queries, and
//! accumulates runtime stats with a flush every 100 recorded calls.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hivegate_types::profile::ModelProfile;

/// Calls between runtime-stat flushes.
const FLUSH_INTERVAL: u64 = 100;

#[derive(Debug, Serialize, Deserialize)]
struct ProfilesFile {
    version: String,
    updated_at: DateTime<Utc>,
    profiles: HashMap<String, ModelProfile>,
}

/// Registry of model profiles.
pub struct ModelRegistry {
    storage_path: Option<PathBuf>,
    profiles: Mutex<HashMap<String, ModelProfile>>,
}

impl ModelRegistry {
    /// In-memory registry.
    pub fn new() -> Self {
        Self {
            storage_path: None,
            profiles: Mutex::new(HashMap::new()),
        }
    }

    /// Registry persisting to `path`, loading existing profiles eagerly.
    pub async fn with_storage(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let profiles = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<ProfilesFile>(&content) {
                Ok(file) => {
                    info!(profiles = file.profiles.len(), "loaded model profiles");
                    file.profiles
                }
                Err(e) => {
                    warn!(error = %e, "profiles file unreadable, starting fresh");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self {
            storage_path: Some(path),
            profiles: Mutex::new(profiles),
        }
    }

    async fn persist(&self) {
        let Some(path) = &self.storage_path else { return };
        let file = ProfilesFile {
            version: "1.0".into(),
            updated_at: Utc::now(),
            profiles: self.profiles.lock().await.clone(),
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!(error = %e, "failed to persist profiles");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize profiles"),
        }
    }

    /// Look up a profile.
    pub async fn get(&self, model_id: &str) -> Option<ModelProfile> {
        self.profiles.lock().await.get(model_id).cloned()
    }

    /// Save or replace a profile, persisting immediately.
    pub async fn save(&self, profile: ModelProfile) {
        debug!(model = %profile.model_id, "saving profile");
        self.profiles
            .lock()
            .await
            .insert(profile.model_id.clone(), profile);
        self.persist().await;
    }

    /// Remove a profile. Returns `true` if it existed.
    pub async fn delete(&self, model_id: &str) -> bool {
        let existed = self.profiles.lock().await.remove(model_id).is_some();
        if existed {
            self.persist().await;
        }
        existed
    }

    /// All profiled model ids.
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.profiles.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Best model for a task type among `available` (all profiled models
    /// when `None`), requiring at least `min_score` suitability.
    pub async fn best_for_task(
        &self,
        task_type: &str,
        available: Option<&[String]>,
        min_score: f64,
    ) -> Option<String> {
        let profiles = self.profiles.lock().await;
        let candidates: Vec<&ModelProfile> = match available {
            Some(models) => models.iter().filter_map(|m| profiles.get(m)).collect(),
            None => profiles.values().collect(),
        };

        let mut best: Option<(String, f64)> = None;
        for profile in candidates {
            let (suitable, score, _) = profile.task_suitability(task_type);
            if suitable
                && score > min_score
                && best.as_ref().map(|(_, b)| score > *b).unwrap_or(true)
            {
                best = Some((profile.model_id.clone(), score));
            }
        }
        best.map(|(model, _)| model)
    }

    /// Models whose named capability meets `min_score`, sorted best
    /// first.
    pub async fn models_by_capability(
        &self,
        axis: &str,
        min_score: f64,
    ) -> Vec<(String, f64)> {
        let profiles = self.profiles.lock().await;
        let mut rows: Vec<(String, f64)> = profiles
            .values()
            .map(|p| (p.model_id.clone(), p.capabilities.get(axis)))
            .filter(|(_, score)| *score >= min_score)
            .collect();
        rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        rows
    }

    /// Role recommendations: `(model, suitability, reasoning)`, top `n`.
    pub async fn role_recommendations(
        &self,
        role: &str,
        available: Option<&[String]>,
        top_n: usize,
    ) -> Vec<(String, f64, String)> {
        let profiles = self.profiles.lock().await;
        let candidates: Vec<&ModelProfile> = match available {
            Some(models) => models.iter().filter_map(|m| profiles.get(m)).collect(),
            None => profiles.values().collect(),
        };
        let mut rows: Vec<(String, f64, String)> = candidates
            .into_iter()
            .map(|p| {
                let (score, reasoning) = p.role_suitability(role);
                (p.model_id.clone(), score, reasoning)
            })
            .collect();
        rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        rows.truncate(top_n);
        rows
    }

    /// True when the model has no profile or its profile is older than
    /// `max_age_days`.
    pub async fn needs_reinterview(&self, model_id: &str, max_age_days: i64) -> bool {
        match self.profiles.lock().await.get(model_id) {
            Some(profile) => {
                Utc::now() - profile.interviewed_at > Duration::days(max_age_days)
            }
            None => true,
        }
    }

    /// Update a model's rolling runtime stats; flushes every
    /// [`FLUSH_INTERVAL`] recorded calls.
    pub async fn update_runtime_stats(
        &self,
        model_id: &str,
        success: bool,
        tool_success: Option<bool>,
        tokens: u64,
        latency_ms: f64,
        error_type: Option<&str>,
    ) {
        let should_flush = {
            let mut profiles = self.profiles.lock().await;
            let Some(profile) = profiles.get_mut(model_id) else {
                return;
            };
            profile.runtime_stats.record_call(
                success,
                tool_success,
                tokens,
                latency_ms,
                error_type,
            );
            profile.runtime_stats.total_calls % FLUSH_INTERVAL == 0
        };
        if should_flush {
            self.persist().await;
        }
    }

    /// Human-readable summary for one profile.
    pub async fn format_summary(&self, model_id: &str) -> Option<String> {
        let profile = self.get(model_id).await?;
        let mut lines = vec![
            format!("Model Profile: {}", profile.model_id),
            format!("Overall Score: {:.2}", profile.overall_score()),
            String::new(),
            "Capabilities:".to_string(),
        ];
        for axis in hivegate_types::profile::CAPABILITY_AXES {
            lines.push(format!("  {:26} {:.2}", axis, profile.capabilities.get(axis)));
        }
        if !profile.strengths.is_empty() {
            lines.push(format!("Strengths: {}", profile.strengths.join(", ")));
        }
        if !profile.weaknesses.is_empty() {
            lines.push(format!("Weaknesses: {}", profile.weaknesses.join(", ")));
        }
        if profile.runtime_stats.total_calls > 0 {
            lines.push(format!(
                "Runtime: {} calls, {:.0}% success",
                profile.runtime_stats.total_calls,
                profile.runtime_stats.success_rate() * 100.0
            ));
        }
        Some(lines.join("\n"))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
