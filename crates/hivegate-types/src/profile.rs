//! Model capability profiles.
//!
//! A [`ModelProfile`] is the output of the interviewer: eight capability
//! scores, qualitative strengths/weaknesses, a guardrail bundle, and
//! rolling runtime statistics. Derivations (overall score, role and task
//! suitability) live on the profile so callers never re-implement the
//! weighting.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Profile schema version for migrations.
pub const PROFILE_VERSION: &str = "1.0";

/// The eight capability axes, by canonical name.
pub const CAPABILITY_AXES: [&str; 8] = [
    "tool_calling_accuracy",
    "instruction_following",
    "context_utilization",
    "code_generation",
    "reasoning_depth",
    "hallucination_resistance",
    "structured_output",
    "long_context_handling",
];

/// Capability scores from model evaluation, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct CapabilityScores {
    /// Can format tool calls correctly.
    #[serde(default)]
    pub tool_calling_accuracy: f64,
    /// Follows system prompts precisely.
    #[serde(default)]
    pub instruction_following: f64,
    /// Uses provided context effectively.
    #[serde(default)]
    pub context_utilization: f64,
    /// Code quality and correctness.
    #[serde(default)]
    pub code_generation: f64,
    /// Multi-step logical reasoning.
    #[serde(default)]
    pub reasoning_depth: f64,
    /// Sticks to facts, admits uncertainty.
    #[serde(default)]
    pub hallucination_resistance: f64,
    /// JSON / format compliance.
    #[serde(default)]
    pub structured_output: f64,
    /// Performance with large contexts.
    #[serde(default)]
    pub long_context_handling: f64,
}

impl CapabilityScores {
    /// Score for a named axis; unknown names score 0.
    pub fn get(&self, axis: &str) -> f64 {
        match axis {
            "tool_calling_accuracy" => self.tool_calling_accuracy,
            "instruction_following" => self.instruction_following,
            "context_utilization" => self.context_utilization,
            "code_generation" => self.code_generation,
            "reasoning_depth" => self.reasoning_depth,
            "hallucination_resistance" => self.hallucination_resistance,
            "structured_output" => self.structured_output,
            "long_context_handling" => self.long_context_handling,
            _ => 0.0,
        }
    }

    /// Weighted mean over the given `(axis, weight)` pairs.
    pub fn weighted_average(&self, weights: &[(&str, f64)]) -> f64 {
        let mut total = 0.0;
        let mut weight_sum = 0.0;
        for (axis, weight) in weights {
            total += self.get(axis) * weight;
            weight_sum += weight;
        }
        if weight_sum > 0.0 { total / weight_sum } else { 0.0 }
    }
}

/// Guardrails derived from a profile to compensate for weaknesses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Guardrails {
    /// Requires explicit JSON-mode instructions.
    #[serde(default)]
    pub needs_structured_output: bool,
    /// Needs format examples in the prompt.
    #[serde(default)]
    pub needs_explicit_format: bool,
    /// Benefits from tool-call examples.
    #[serde(default)]
    pub needs_tool_examples: bool,
    /// Tokens before performance degrades.
    #[serde(default = "default_max_context")]
    pub max_reliable_context: u64,
    /// Optimal sampling temperature.
    #[serde(default = "default_temperature")]
    pub recommended_temperature: f64,
    /// Safe tool retry budget before escalation.
    #[serde(default = "default_retry_limit")]
    pub tool_call_retry_limit: u32,
    /// Benefits from chain-of-thought prompting.
    #[serde(default)]
    pub needs_step_by_step: bool,
    /// Struggles with multiple tool calls per turn.
    #[serde(default)]
    pub avoid_parallel_tools: bool,
}

fn default_max_context() -> u64 {
    128_000
}

fn default_temperature() -> f64 {
    0.7
}

fn default_retry_limit() -> u32 {
    3
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            needs_structured_output: false,
            needs_explicit_format: false,
            needs_tool_examples: false,
            max_reliable_context: default_max_context(),
            recommended_temperature: default_temperature(),
            tool_call_retry_limit: default_retry_limit(),
            needs_step_by_step: false,
            avoid_parallel_tools: false,
        }
    }
}

/// Rolling runtime statistics updated during operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RuntimeStats {
    /// Total provider calls.
    #[serde(default)]
    pub total_calls: u64,
    /// Calls that produced a usable response.
    #[serde(default)]
    pub successful_calls: u64,
    /// Tool calls that executed successfully.
    #[serde(default)]
    pub tool_call_successes: u64,
    /// Tool calls that failed.
    #[serde(default)]
    pub tool_call_failures: u64,
    /// Total tokens used.
    #[serde(default)]
    pub total_tokens_used: u64,
    /// Exponential moving average of latency.
    #[serde(default)]
    pub average_latency_ms: f64,
    /// Error type -> occurrence count.
    #[serde(default)]
    pub common_errors: HashMap<String, u64>,
}

impl RuntimeStats {
    /// Overall call success rate; 0 with no history.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.successful_calls as f64 / self.total_calls as f64
    }

    /// Tool-call accuracy; 0 with no tool history.
    pub fn tool_accuracy(&self) -> f64 {
        let total = self.tool_call_successes + self.tool_call_failures;
        if total == 0 {
            return 0.0;
        }
        self.tool_call_successes as f64 / total as f64
    }

    /// Record one call outcome.
    pub fn record_call(
        &mut self,
        success: bool,
        tool_success: Option<bool>,
        tokens: u64,
        latency_ms: f64,
        error_type: Option<&str>,
    ) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        }
        match tool_success {
            Some(true) => self.tool_call_successes += 1,
            Some(false) => self.tool_call_failures += 1,
            None => {}
        }
        self.total_tokens_used += tokens;
        if latency_ms > 0.0 {
            if self.average_latency_ms == 0.0 {
                self.average_latency_ms = latency_ms;
            } else {
                self.average_latency_ms =
                    0.9 * self.average_latency_ms + 0.1 * latency_ms;
            }
        }
        if let Some(err) = error_type {
            *self.common_errors.entry(err.to_string()).or_insert(0) += 1;
        }
    }
}

/// Capability requirements per role, with per-axis weights.
///
/// Required axes gate suitability: any required axis below 0.6 caps the
/// score at that axis's value.
fn role_requirements(role: &str) -> Option<(&'static [&'static str], Vec<(&'static str, f64)>)> {
    match role {
        "architect" => Some((
            &["reasoning_depth", "context_utilization"],
            vec![
                ("reasoning_depth", 0.3),
                ("context_utilization", 0.25),
                ("hallucination_resistance", 0.2),
                ("long_context_handling", 0.15),
                ("instruction_following", 0.1),
            ],
        )),
        "lead_dev" => Some((
            &["code_generation", "reasoning_depth"],
            vec![
                ("code_generation", 0.3),
                ("reasoning_depth", 0.25),
                ("tool_calling_accuracy", 0.2),
                ("instruction_following", 0.15),
                ("context_utilization", 0.1),
            ],
        )),
        "senior_dev" => Some((
            &["code_generation", "tool_calling_accuracy"],
            vec![
                ("code_generation", 0.35),
                ("tool_calling_accuracy", 0.25),
                ("instruction_following", 0.2),
                ("reasoning_depth", 0.2),
            ],
        )),
        "junior_dev" => Some((
            &["instruction_following", "code_generation"],
            vec![
                ("instruction_following", 0.4),
                ("code_generation", 0.4),
                ("tool_calling_accuracy", 0.2),
            ],
        )),
        "qa_engineer" => Some((
            &["reasoning_depth", "instruction_following"],
            vec![
                ("reasoning_depth", 0.3),
                ("instruction_following", 0.3),
                ("hallucination_resistance", 0.2),
                ("code_generation", 0.2),
            ],
        )),
        "auditor" => Some((
            &["hallucination_resistance", "reasoning_depth"],
            vec![
                ("hallucination_resistance", 0.35),
                ("reasoning_depth", 0.3),
                ("context_utilization", 0.2),
                ("instruction_following", 0.15),
            ],
        )),
        "researcher" => Some((
            &["context_utilization", "hallucination_resistance"],
            vec![
                ("context_utilization", 0.3),
                ("hallucination_resistance", 0.3),
                ("long_context_handling", 0.2),
                ("reasoning_depth", 0.2),
            ],
        )),
        _ => None,
    }
}

/// Axes a task type requires; unknown task types require only
/// instruction following.
pub fn task_required_axes(task_type: &str) -> &'static [&'static str] {
    match task_type {
        "code" => &["code_generation", "reasoning_depth", "instruction_following"],
        "implement" => &["code_generation", "instruction_following", "context_utilization"],
        "debug" => &["code_generation", "reasoning_depth", "context_utilization"],
        "refactor" => &["code_generation", "reasoning_depth"],
        "research" => &["context_utilization", "hallucination_resistance", "reasoning_depth"],
        "analysis" => &["reasoning_depth", "context_utilization", "hallucination_resistance"],
        "review" => &["reasoning_depth", "hallucination_resistance", "instruction_following"],
        "test" => &["code_generation", "reasoning_depth", "instruction_following"],
        "design" => &["reasoning_depth", "context_utilization"],
        "chat" => &["instruction_following", "hallucination_resistance"],
        _ => &["instruction_following"],
    }
}

/// Complete capability profile for one model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelProfile {
    /// The profiled model id.
    pub model_id: String,

    /// Schema version.
    #[serde(default = "default_version")]
    pub profile_version: String,

    /// When the interview ran.
    #[serde(default = "Utc::now")]
    pub interviewed_at: DateTime<Utc>,

    /// The model that conducted the interview.
    #[serde(default)]
    pub interviewer_model: String,

    /// Whether this profile came from a quick assessment.
    #[serde(default)]
    pub quick: bool,

    /// Capability scores.
    #[serde(default)]
    pub capabilities: CapabilityScores,

    /// Qualitative assessment.
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    #[serde(default)]
    pub optimal_tasks: Vec<String>,
    #[serde(default)]
    pub avoid_tasks: Vec<String>,

    /// Guardrail bundle.
    #[serde(default)]
    pub guardrails: Guardrails,

    /// Rolling runtime stats.
    #[serde(default)]
    pub runtime_stats: RuntimeStats,

    /// Free-form notes from the interviewer model.
    #[serde(default)]
    pub interview_notes: String,
}

fn default_version() -> String {
    PROFILE_VERSION.to_string()
}

impl ModelProfile {
    /// Create an empty profile for a model.
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            profile_version: PROFILE_VERSION.into(),
            interviewed_at: Utc::now(),
            interviewer_model: String::new(),
            quick: false,
            capabilities: CapabilityScores::default(),
            strengths: Vec::new(),
            weaknesses: Vec::new(),
            optimal_tasks: Vec::new(),
            avoid_tasks: Vec::new(),
            guardrails: Guardrails::default(),
            runtime_stats: RuntimeStats::default(),
            interview_notes: String::new(),
        }
    }

    /// Weighted mean over all eight axes.
    pub fn overall_score(&self) -> f64 {
        self.capabilities.weighted_average(&[
            ("tool_calling_accuracy", 0.15),
            ("instruction_following", 0.15),
            ("context_utilization", 0.15),
            ("code_generation", 0.15),
            ("reasoning_depth", 0.15),
            ("hallucination_resistance", 0.15),
            ("structured_output", 0.05),
            ("long_context_handling", 0.05),
        ])
    }

    /// Suitability of this model for a role: `(score, reasoning)`.
    pub fn role_suitability(&self, role: &str) -> (f64, String) {
        let Some((required, weights)) = role_requirements(role) else {
            return (0.5, format!("unknown role: {role}"));
        };

        for axis in required {
            let score = self.capabilities.get(axis);
            if score < 0.6 {
                return (
                    score,
                    format!("insufficient {axis} ({score:.2} < 0.60 required)"),
                );
            }
        }

        let suitability = self.capabilities.weighted_average(&weights);
        let reasoning = if suitability >= 0.8 {
            "excellent fit, strong in all required capabilities".to_string()
        } else if suitability >= 0.7 {
            "good fit, meets requirements".to_string()
        } else if suitability >= 0.6 {
            "adequate fit, meets minimum requirements".to_string()
        } else {
            let weak: Vec<&str> = required
                .iter()
                .copied()
                .filter(|axis| self.capabilities.get(axis) < 0.7)
                .collect();
            format!("poor fit, weak in: {}", weak.join(", "))
        };
        (suitability, reasoning)
    }

    /// Suitability for a task type: `(is_suitable, confidence, reasoning)`.
    pub fn task_suitability(&self, task_type: &str) -> (bool, f64, String) {
        if self.avoid_tasks.iter().any(|t| t == task_type) {
            return (false, 0.9, format!("task '{task_type}' is in the avoid list"));
        }
        if self.optimal_tasks.iter().any(|t| t == task_type) {
            return (true, 0.9, format!("task '{task_type}' is in the optimal list"));
        }

        let axes = task_required_axes(task_type);
        let avg = axes.iter().map(|a| self.capabilities.get(a)).sum::<f64>()
            / axes.len() as f64;
        (
            avg >= 0.6,
            avg,
            format!("average score {avg:.2} for required capabilities"),
        )
    }

    /// Extra system-prompt lines compensating for known weaknesses.
    pub fn guardrail_prompt(&self) -> String {
        let mut lines = Vec::new();
        if self.guardrails.needs_structured_output {
            lines.push(
                "Always format structured data as valid JSON.".to_string(),
            );
        }
        if self.guardrails.needs_explicit_format {
            lines.push(
                "Follow the exact format specified in the instructions."
                    .to_string(),
            );
        }
        if self.guardrails.needs_tool_examples {
            lines.push(
                "When calling tools, provide every required parameter with the correct type."
                    .to_string(),
            );
        }
        if self.guardrails.needs_step_by_step {
            lines.push(
                "Think through the problem step by step before answering."
                    .to_string(),
            );
        }
        if self.guardrails.avoid_parallel_tools {
            lines.push(
                "Call tools one at a time, waiting for each result before proceeding."
                    .to_string(),
            );
        }
        lines.join("\n")
    }
}
