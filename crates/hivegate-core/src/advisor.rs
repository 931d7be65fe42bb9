//! Adaptive tool advice.
//!
//! The advisor tracks every `(model, tool)` pair the executor reports and
//! answers: how confident should the loop be handing this tool to this
//! model, and is there a better-performing alternative? Stats persist to
//! a single JSON file, flushed every
//! [`AUTO_SAVE_INTERVAL`](ToolAdvisor::AUTO_SAVE_INTERVAL) recorded calls.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use hivegate_types::config::ToolReinforcementConfig;
use hivegate_types::profile::ModelProfile;

/// Usage statistics for one `(model, tool)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUsageStats {
    pub tool_name: String,
    pub model_id: String,
    #[serde(default)]
    pub total_calls: u64,
    #[serde(default)]
    pub successful_calls: u64,
    #[serde(default)]
    pub total_latency_ms: f64,
    #[serde(default = "Utc::now")]
    pub last_used: DateTime<Utc>,
    /// Error category -> occurrence count.
    #[serde(default)]
    pub common_errors: HashMap<String, u64>,
}

impl ToolUsageStats {
    fn new(model_id: &str, tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            model_id: model_id.to_string(),
            total_calls: 0,
            successful_calls: 0,
            total_latency_ms: 0.0,
            last_used: Utc::now(),
            common_errors: HashMap::new(),
        }
    }

    /// Success rate; neutral 0.5 for unused pairs.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.5;
        }
        self.successful_calls as f64 / self.total_calls as f64
    }

    /// Average latency over successful calls.
    pub fn average_latency_ms(&self) -> f64 {
        if self.successful_calls == 0 {
            return 0.0;
        }
        self.total_latency_ms / self.successful_calls as f64
    }

    fn record(&mut self, success: bool, latency_ms: f64, error: &str) {
        self.total_calls += 1;
        self.last_used = Utc::now();
        if success {
            self.successful_calls += 1;
            self.total_latency_ms += latency_ms;
        } else if !error.is_empty() {
            let category = categorize_error(error);
            *self.common_errors.entry(category.to_string()).or_insert(0) += 1;
        }
    }
}

/// Bucket an error string for tracking.
fn categorize_error(error: &str) -> &'static str {
    let lower = error.to_lowercase();
    if lower.contains("timeout") {
        "timeout"
    } else if lower.contains("permission") || lower.contains("denied") {
        "permission"
    } else if lower.contains("not found") {
        "not_found"
    } else if lower.contains("invalid") || lower.contains("missing") {
        "invalid_params"
    } else if lower.contains("rate") || lower.contains("limit") {
        "rate_limit"
    } else {
        "other"
    }
}

/// Tools that can substitute for one another.
fn alternatives_for(tool: &str) -> &'static [&'static str] {
    match tool {
        "read_file" => &["list_dir"],
        "edit_file" => &["write_file"],
        "web_search" => &["web_fetch"],
        "exec" => &["process"],
        _ => &[],
    }
}

/// A recommendation for one upcoming tool call.
#[derive(Debug, Clone)]
pub struct ToolRecommendation {
    pub tool_name: String,
    pub confidence: f64,
    pub reason: String,
    pub alternative: Option<String>,
    pub warnings: Vec<String>,
}

/// Persisted file shape.
#[derive(Debug, Serialize, Deserialize)]
struct StatsFile {
    version: String,
    updated_at: DateTime<Utc>,
    stats: HashMap<String, ToolUsageStats>,
}

/// Tracks per-(model, tool) performance and advises on tool selection.
pub struct ToolAdvisor {
    config: ToolReinforcementConfig,
    storage_path: Option<PathBuf>,
    stats: Mutex<HashMap<String, ToolUsageStats>>,
}

impl ToolAdvisor {
    /// Stats are flushed every this many recorded calls.
    pub const AUTO_SAVE_INTERVAL: u64 = 50;

    /// In-memory advisor (tests, ephemeral runs).
    pub fn new(config: ToolReinforcementConfig) -> Self {
        Self {
            config,
            storage_path: None,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Advisor persisting to `path`, loading existing stats eagerly.
    pub async fn with_storage(
        config: ToolReinforcementConfig,
        path: impl Into<PathBuf>,
    ) -> Self {
        let advisor = Self {
            config,
            storage_path: Some(path.into()),
            stats: Mutex::new(HashMap::new()),
        };
        advisor.load().await;
        advisor
    }

    fn key(model_id: &str, tool_name: &str) -> String {
        format!("{model_id}:{tool_name}")
    }

    async fn load(&self) {
        let Some(path) = &self.storage_path else { return };
        let Ok(content) = tokio::fs::read_to_string(path).await else {
            return;
        };
        match serde_json::from_str::<StatsFile>(&content) {
            Ok(file) => {
                debug!(records = file.stats.len(), "loaded tool usage stats");
                *self.stats.lock().await = file.stats;
            }
            Err(e) => warn!(error = %e, "failed to parse tool advisor stats"),
        }
    }

    /// Flush stats to disk now.
    pub async fn save(&self) {
        let Some(path) = &self.storage_path else { return };
        let file = StatsFile {
            version: "1.0".into(),
            updated_at: Utc::now(),
            stats: self.stats.lock().await.clone(),
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!(error = %e, "failed to save tool advisor stats");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize tool advisor stats"),
        }
    }

    /// Record one tool call outcome.
    pub async fn record(
        &self,
        model_id: &str,
        tool_name: &str,
        success: bool,
        latency_ms: f64,
        error: &str,
    ) {
        let total = {
            let mut stats = self.stats.lock().await;
            stats
                .entry(Self::key(model_id, tool_name))
                .or_insert_with(|| ToolUsageStats::new(model_id, tool_name))
                .record(success, latency_ms, error);
            stats.values().map(|s| s.total_calls).sum::<u64>()
        };
        if total > 0 && total % Self::AUTO_SAVE_INTERVAL == 0 {
            self.save().await;
        }
    }

    /// Stats snapshot for a pair, if tracked.
    pub async fn stats_for(
        &self,
        model_id: &str,
        tool_name: &str,
    ) -> Option<ToolUsageStats> {
        self.stats
            .lock()
            .await
            .get(&Self::key(model_id, tool_name))
            .cloned()
    }

    /// Confidence and warnings for handing `tool_name` to `model_id`.
    pub async fn recommendation(
        &self,
        model_id: &str,
        tool_name: &str,
        profile: Option<&ModelProfile>,
    ) -> ToolRecommendation {
        let cfg = &self.config;
        let stats = {
            let stats = self.stats.lock().await;
            stats
                .get(&Self::key(model_id, tool_name))
                .cloned()
                .unwrap_or_else(|| ToolUsageStats::new(model_id, tool_name))
        };

        let mut warnings = Vec::new();
        let mut confidence = if stats.total_calls >= cfg.min_calls_for_confidence {
            stats.success_rate()
        } else {
            cfg.default_confidence
        };

        if let Some((category, count)) = stats
            .common_errors
            .iter()
            .max_by_key(|(_, count)| **count)
            && *count > cfg.error_warning_threshold
        {
            warnings.push(format!("frequent '{category}' errors with this tool"));
            confidence *= 0.8;
        }

        if let Some(profile) = profile {
            if profile.guardrails.avoid_parallel_tools {
                warnings.push("model struggles with parallel tool calls".into());
            }
            if profile.guardrails.needs_tool_examples {
                warnings.push("model benefits from tool examples in prompt".into());
            }
            if profile.capabilities.tool_calling_accuracy < 0.7 {
                confidence *= 0.9;
                warnings.push("model has lower tool calling accuracy".into());
            }
        }

        let mut alternative = None;
        if confidence < cfg.suggest_alternative_threshold {
            for candidate in alternatives_for(tool_name) {
                let alt_stats = {
                    let stats = self.stats.lock().await;
                    stats.get(&Self::key(model_id, candidate)).cloned()
                };
                let promising = match alt_stats {
                    Some(s) => {
                        s.success_rate() > confidence
                            || s.total_calls < cfg.min_calls_for_confidence
                    }
                    None => true,
                };
                if promising {
                    alternative = Some(candidate.to_string());
                    break;
                }
            }
        }

        let reason = if stats.total_calls == 0 {
            "no usage history, proceeding with caution".to_string()
        } else if confidence >= 0.8 {
            format!("good track record ({:.0}% success rate)", stats.success_rate() * 100.0)
        } else if confidence >= 0.6 {
            format!("acceptable success rate ({:.0}%)", stats.success_rate() * 100.0)
        } else {
            format!(
                "low success rate ({:.0}%), consider alternative",
                stats.success_rate() * 100.0
            )
        };

        ToolRecommendation {
            tool_name: tool_name.to_string(),
            confidence,
            reason,
            alternative,
            warnings,
        }
    }

    /// Best model for a tool among `available`, by observed success rate.
    pub async fn best_model_for_tool(
        &self,
        tool_name: &str,
        available: &[String],
        min_calls: u64,
    ) -> Option<(String, f64)> {
        let stats = self.stats.lock().await;
        let mut best: Option<(String, f64)> = None;
        for model in available {
            if let Some(s) = stats.get(&Self::key(model, tool_name))
                && s.total_calls >= min_calls
            {
                let rate = s.success_rate();
                if best.as_ref().map(|(_, b)| rate > *b).unwrap_or(true) {
                    best = Some((model.clone(), rate));
                }
            }
        }
        best
    }

    /// Top models for a tool: `(model, success_rate, total_calls)`.
    pub async fn leaderboard(
        &self,
        tool_name: &str,
        top_n: usize,
    ) -> Vec<(String, f64, u64)> {
        let stats = self.stats.lock().await;
        let mut rows: Vec<(String, f64, u64)> = stats
            .values()
            .filter(|s| s.tool_name == tool_name && s.total_calls > 0)
            .map(|s| (s.model_id.clone(), s.success_rate(), s.total_calls))
            .collect();
        rows.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.2.cmp(&a.2))
        });
        rows.truncate(top_n);
        rows
    }

    /// Pairs with poor success rates: `(model, tool, rate, calls)`,
    /// worst first.
    pub async fn problematic_combinations(
        &self,
        min_calls: u64,
        max_success_rate: f64,
    ) -> Vec<(String, String, f64, u64)> {
        let stats = self.stats.lock().await;
        let mut rows: Vec<(String, String, f64, u64)> = stats
            .values()
            .filter(|s| {
                s.total_calls >= min_calls && s.success_rate() <= max_success_rate
            })
            .map(|s| {
                (
                    s.model_id.clone(),
                    s.tool_name.clone(),
                    s.success_rate(),
                    s.total_calls,
                )
            })
            .collect();
        rows.sort_by(|a, b| a.2.partial_cmp(&b.2).unwrap_or(std::cmp::Ordering::Equal));
        rows
    }

    /// Success-rate matrix: model -> tool -> rate.
    pub async fn matrix(&self) -> HashMap<String, HashMap<String, f64>> {
        let stats = self.stats.lock().await;
        let mut matrix: HashMap<String, HashMap<String, f64>> = HashMap::new();
        for s in stats.values() {
            matrix
                .entry(s.model_id.clone())
                .or_default()
                .insert(s.tool_name.clone(), s.success_rate());
        }
        matrix
    }

    /// Aggregate counters across all pairs.
    pub async fn summary(&self) -> AdvisorSummary {
        let stats = self.stats.lock().await;
        let total_calls: u64 = stats.values().map(|s| s.total_calls).sum();
        let total_successes: u64 = stats.values().map(|s| s.successful_calls).sum();
        let models: std::collections::HashSet<&str> =
            stats.values().map(|s| s.model_id.as_str()).collect();
        let tools: std::collections::HashSet<&str> =
            stats.values().map(|s| s.tool_name.as_str()).collect();
        AdvisorSummary {
            total_combinations: stats.len(),
            unique_models: models.len(),
            unique_tools: tools.len(),
            total_calls,
            overall_success_rate: if total_calls > 0 {
                total_successes as f64 / total_calls as f64
            } else {
                0.0
            },
        }
    }
}

/// Aggregate advisor counters.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisorSummary {
    pub total_combinations: usize,
    pub unique_models: usize,
    pub unique_tools: usize,
    pub total_calls: u64,
    pub overall_success_rate: f64,
}
