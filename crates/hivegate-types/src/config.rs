//! Typed configuration surface.
//!
//! These structs define every option the gateway recognizes. Loading them
//! from a file is the embedding application's concern; the defaults here
//! are the documented defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Agent subsystem configuration.
    #[serde(default)]
    pub agents: AgentsConfig,
    /// Security configuration.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Remote node configuration.
    #[serde(default)]
    pub nodes: NodesConfig,
    /// Exec routing configuration.
    #[serde(default)]
    pub exec: ExecConfig,
}

/// Agent subsystem configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsConfig {
    #[serde(default)]
    pub defaults: AgentDefaults,
    #[serde(default)]
    pub tiered_routing: TieredRoutingConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub self_heal: SelfHealConfig,
    #[serde(default)]
    pub tool_reinforcement: ToolReinforcementConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
}

/// Default agent parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    /// Workspace directory for persisted state.
    pub workspace: String,
    /// Default model when routing is disabled.
    pub model: String,
    /// Max tokens per completion.
    pub max_tokens: u32,
    /// Default sampling temperature.
    pub temperature: f64,
    /// Cap on provider calls per inbound message.
    pub max_tool_iterations: u32,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.hivegate/workspace".into(),
            model: "anthropic/claude-opus-4-5".into(),
            max_tokens: 8192,
            temperature: 0.7,
            max_tool_iterations: 20,
        }
    }
}

/// One tier: models in preference order plus the trigger labels that
/// select it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TierConfig {
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
}

/// Tiered routing configuration.
///
/// Tier order matters: the first tier whose triggers contain the
/// classified label wins. `BTreeMap` keeps the serialized form stable;
/// ordering for lookup is the declaration order in `tier_order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieredRoutingConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tiers")]
    pub tiers: BTreeMap<String, TierConfig>,
    /// Ordered tier names; tiers absent from this list are appended in
    /// map order.
    #[serde(default = "default_tier_order")]
    pub tier_order: Vec<String>,
    /// Lightweight model used for classification; empty = rule-based.
    #[serde(default)]
    pub classifier_model: String,
    #[serde(default = "default_fallback_tier")]
    pub fallback_tier: String,
}

fn default_tiers() -> BTreeMap<String, TierConfig> {
    let mut tiers = BTreeMap::new();
    tiers.insert(
        "daily_driver".into(),
        TierConfig {
            models: vec![
                "moonshot/kimi-k2.5".into(),
                "google/gemini-2.0-flash".into(),
            ],
            triggers: vec!["chat".into(), "simple_query".into(), "task_management".into()],
        },
    );
    tiers.insert(
        "coder".into(),
        TierConfig {
            models: vec![
                "anthropic/claude-sonnet-4-5".into(),
                "openai/gpt-4.1".into(),
            ],
            triggers: vec![
                "code".into(),
                "debug".into(),
                "implement".into(),
                "refactor".into(),
            ],
        },
    );
    tiers.insert(
        "specialist".into(),
        TierConfig {
            models: vec![
                "anthropic/claude-opus-4-5".into(),
                "google/gemini-2.0-pro".into(),
            ],
            triggers: vec![
                "brainstorm".into(),
                "creative".into(),
                "complex_analysis".into(),
                "research".into(),
            ],
        },
    );
    tiers
}

fn default_tier_order() -> Vec<String> {
    vec!["daily_driver".into(), "coder".into(), "specialist".into()]
}

fn default_fallback_tier() -> String {
    "daily_driver".into()
}

impl Default for TieredRoutingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tiers: default_tiers(),
            tier_order: default_tier_order(),
            classifier_model: String::new(),
            fallback_tier: default_fallback_tier(),
        }
    }
}

/// Swarm configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_worker_model")]
    pub worker_model: String,
    #[serde(default = "default_orchestrator_model")]
    pub orchestrator_model: String,
    /// Engage the swarm automatically for complex messages.
    #[serde(default = "default_true")]
    pub auto_trigger: bool,
    /// Complexity score at or above which auto-trigger fires.
    #[serde(default = "default_complexity_threshold")]
    pub complexity_threshold: u32,
    #[serde(default = "default_true")]
    pub retry_failed: bool,
    #[serde(default = "default_swarm_retries")]
    pub max_retries: u32,
}

fn default_max_workers() -> usize {
    5
}
fn default_worker_model() -> String {
    "moonshot/kimi-k2.5".into()
}
fn default_orchestrator_model() -> String {
    "anthropic/claude-sonnet-4-5".into()
}
fn default_complexity_threshold() -> u32 {
    3
}
fn default_swarm_retries() -> u32 {
    2
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_workers: default_max_workers(),
            worker_model: default_worker_model(),
            orchestrator_model: default_orchestrator_model(),
            auto_trigger: true,
            complexity_threshold: default_complexity_threshold(),
            retry_failed: true,
            max_retries: default_swarm_retries(),
        }
    }
}

/// Deep memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub vector_search: bool,
    /// Memories to include in context.
    #[serde(default = "default_context_memories")]
    pub context_memories: usize,
    #[serde(default = "default_true")]
    pub auto_extract_facts: bool,
    #[serde(default = "default_true")]
    pub save_compaction_summaries: bool,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,
    #[serde(default = "default_recency_days")]
    pub recency_days: i64,
}

fn default_context_memories() -> usize {
    5
}
fn default_vector_weight() -> f64 {
    0.6
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_recency_weight() -> f64 {
    0.1
}
fn default_recency_days() -> i64 {
    30
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            vector_search: true,
            context_memories: default_context_memories(),
            auto_extract_facts: true,
            save_compaction_summaries: true,
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            recency_weight: default_recency_weight(),
            recency_days: default_recency_days(),
        }
    }
}

/// Self-healing controls: tool retries and circuit breakers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfHealConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tool_retries")]
    pub max_tool_retries: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: f64,
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: f64,
    #[serde(default = "default_retry_exponential_base")]
    pub retry_exponential_base: f64,
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_threshold: u32,
    /// Seconds before a half-open probe is allowed.
    #[serde(default = "default_breaker_cooldown")]
    pub circuit_breaker_cooldown: u64,
    #[serde(default = "default_swarm_retries")]
    pub swarm_max_retries: u32,
}

fn default_tool_retries() -> u32 {
    3
}
fn default_retry_base_delay() -> f64 {
    1.0
}
fn default_retry_max_delay() -> f64 {
    30.0
}
fn default_retry_exponential_base() -> f64 {
    2.0
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    300
}

impl Default for SelfHealConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tool_retries: default_tool_retries(),
            retry_base_delay: default_retry_base_delay(),
            retry_max_delay: default_retry_max_delay(),
            retry_exponential_base: default_retry_exponential_base(),
            circuit_breaker_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown: default_breaker_cooldown(),
            swarm_max_retries: default_swarm_retries(),
        }
    }
}

/// Adaptive tool-selection configuration (the advisor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolReinforcementConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub pre_validation: bool,
    #[serde(default = "default_true")]
    pub adaptive_selection: bool,
    #[serde(default = "default_min_calls")]
    pub min_calls_for_confidence: u64,
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
    #[serde(default = "default_error_warning_threshold")]
    pub error_warning_threshold: u64,
    #[serde(default = "default_alternative_threshold")]
    pub suggest_alternative_threshold: f64,
}

fn default_min_calls() -> u64 {
    5
}
fn default_confidence() -> f64 {
    0.7
}
fn default_error_warning_threshold() -> u64 {
    3
}
fn default_alternative_threshold() -> f64 {
    0.5
}

impl Default for ToolReinforcementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pre_validation: true,
            adaptive_selection: true,
            min_calls_for_confidence: default_min_calls(),
            default_confidence: default_confidence(),
            error_warning_threshold: default_error_warning_threshold(),
            suggest_alternative_threshold: default_alternative_threshold(),
        }
    }
}

/// Model profiler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interviewer")]
    pub interviewer_model: String,
    /// Interview unknown models automatically in the background.
    #[serde(default = "default_true")]
    pub auto_interview: bool,
    #[serde(default = "default_profile_max_age")]
    pub profile_max_age_days: i64,
    /// Run a quick assessment after provider failures.
    #[serde(default = "default_true")]
    pub quick_assess_on_failure: bool,
    /// Timeout per interview test, in seconds.
    #[serde(default = "default_test_timeout")]
    pub test_timeout: u64,
}

fn default_interviewer() -> String {
    "anthropic/claude-opus-4-5".into()
}
fn default_profile_max_age() -> i64 {
    30
}
fn default_test_timeout() -> u64 {
    30
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interviewer_model: default_interviewer(),
            auto_interview: true,
            profile_max_age_days: default_profile_max_age(),
            quick_assess_on_failure: true,
            test_timeout: default_test_timeout(),
        }
    }
}

/// Security configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub tool_policy: ToolPolicyConfig,
}

/// Declarative tool policy lists. Names may be literal, glob patterns, or
/// `@group` references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicyConfig {
    #[serde(default = "default_allow_all")]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
    #[serde(default)]
    pub require_approval: Vec<String>,
    #[serde(default = "default_require_elevated")]
    pub require_elevated: Vec<String>,
}

fn default_allow_all() -> Vec<String> {
    vec!["*".into()]
}

fn default_require_elevated() -> Vec<String> {
    vec!["gateway".into()]
}

impl Default for ToolPolicyConfig {
    fn default() -> Self {
        Self {
            allow: default_allow_all(),
            deny: Vec::new(),
            require_approval: Vec::new(),
            require_elevated: default_require_elevated(),
        }
    }
}

/// Remote node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Shared token nodes must present on connect.
    #[serde(default)]
    pub auth_token: String,
    /// Approve new nodes without operator action.
    #[serde(default)]
    pub auto_approve: bool,
    /// Keepalive interval in seconds.
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
}

fn default_ping_interval() -> u64 {
    30
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auth_token: String::new(),
            auto_approve: false,
            ping_interval: default_ping_interval(),
        }
    }
}

/// Exec routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// "local" or "node".
    #[serde(default = "default_exec_host")]
    pub host: String,
    /// Preferred node id or display name.
    #[serde(default)]
    pub node: String,
    #[serde(default = "default_true")]
    pub fallback_to_local: bool,
    /// Default command timeout in seconds.
    #[serde(default = "default_exec_timeout")]
    pub timeout: u64,
    /// Host-side approval defaults.
    #[serde(default)]
    pub allow_by_default: bool,
    #[serde(default = "default_true")]
    pub use_default_safe: bool,
    #[serde(default = "default_true")]
    pub use_default_deny: bool,
}

fn default_exec_host() -> String {
    "local".into()
}
fn default_exec_timeout() -> u64 {
    60
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            host: default_exec_host(),
            node: String::new(),
            fallback_to_local: true,
            timeout: default_exec_timeout(),
            allow_by_default: false,
            use_default_safe: true,
            use_default_deny: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_object() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.agents.defaults.max_tool_iterations, 20);
        assert!(!config.agents.tiered_routing.enabled);
        assert_eq!(config.agents.self_heal.circuit_breaker_threshold, 5);
        assert_eq!(config.exec.host, "local");
        assert!(config.exec.fallback_to_local);
    }

    #[test]
    fn default_tiers_present_and_ordered() {
        let routing = TieredRoutingConfig::default();
        assert_eq!(routing.tier_order.len(), 3);
        assert_eq!(routing.tier_order[0], "daily_driver");
        assert!(routing.tiers["coder"].triggers.contains(&"debug".to_string()));
        assert_eq!(routing.fallback_tier, "daily_driver");
    }

    #[test]
    fn policy_defaults() {
        let policy = ToolPolicyConfig::default();
        assert_eq!(policy.allow, vec!["*"]);
        assert_eq!(policy.require_elevated, vec!["gateway"]);
    }

    #[test]
    fn memory_weights_default() {
        let m = MemoryConfig::default();
        assert!((m.vector_weight - 0.6).abs() < f64::EPSILON);
        assert!((m.keyword_weight - 0.3).abs() < f64::EPSILON);
        assert!((m.recency_weight - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let json = r#"{"agents": {"swarm": {"enabled": true, "max_workers": 2}}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.agents.swarm.enabled);
        assert_eq!(config.agents.swarm.max_workers, 2);
        assert_eq!(config.agents.swarm.orchestrator_model, "anthropic/claude-sonnet-4-5");
        assert!(config.agents.swarm.retry_failed);
    }
}
