//! Self-healing tool executor.
//!
//! [`ToolExecutor::execute_with_retry`] runs every tool call through a
//! fixed pipeline: argument validation, policy check, circuit-breaker
//! gate, then a retry loop with classified errors and exponential
//! backoff. Repeated failures open a per-tool breaker that refuses calls
//! until a cooldown elapses, then admits exactly one probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use hivegate_types::config::SelfHealConfig;
use hivegate_types::profile::ModelProfile;

use crate::approvals::{ApprovalManager, ApprovalStatus};
use crate::policy::{PolicyDecision, ToolPolicy};
use crate::tools::registry::{ToolError, ToolRegistry, validate_arguments};

/// Classification of a tool execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network issues, timeouts: retry.
    Transient,
    /// Invalid params, missing resources: do not retry.
    Permanent,
    /// API limits: retry with doubled delay.
    RateLimit,
    /// Unclassified: retry once.
    Unknown,
}

/// Classify an error string by substring heuristics.
pub fn classify_error(error: &str) -> ErrorKind {
    let lower = error.to_lowercase();

    const TRANSIENT: &[&str] = &[
        "timeout", "timed out", "connection", "network", "temporary",
        "unavailable", "retry", "econnreset", "socket", "dns", "resolve",
    ];
    if TRANSIENT.iter().any(|p| lower.contains(p)) {
        return ErrorKind::Transient;
    }

    const RATE_LIMIT: &[&str] = &[
        "rate limit", "rate_limit", "too many requests", "429", "quota",
        "throttl",
    ];
    if RATE_LIMIT.iter().any(|p| lower.contains(p)) {
        return ErrorKind::RateLimit;
    }

    const PERMANENT: &[&str] = &[
        "not found", "invalid", "missing", "required", "permission",
        "denied", "unauthorized", "forbidden", "400", "401", "403", "404",
        "422",
    ];
    if PERMANENT.iter().any(|p| lower.contains(p)) {
        return ErrorKind::Permanent;
    }

    ErrorKind::Unknown
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry budget (attempts = retries + 1).
    pub max_retries: u32,
    /// Initial delay.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub exponential_base: f64,
    /// Jitter fraction added on top of the delay.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
            jitter: 0.1,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// Cooldown before a half-open probe is allowed.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        }
    }
}

/// Per-tool health and breaker state.
#[derive(Debug, Clone)]
pub struct ToolHealth {
    pub name: String,
    pub consecutive_failures: u32,
    pub total_calls: u64,
    pub total_failures: u64,
    pub circuit_open: bool,
    pub circuit_open_at: Option<Instant>,
}

impl ToolHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            consecutive_failures: 0,
            total_calls: 0,
            total_failures: 0,
            circuit_open: false,
            circuit_open_at: None,
        }
    }

    /// Success rate over all recorded calls (1.0 with no history).
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 1.0;
        }
        (self.total_calls - self.total_failures) as f64 / self.total_calls as f64
    }

    fn record_success(&mut self) {
        self.total_calls += 1;
        self.consecutive_failures = 0;
        if self.circuit_open {
            info!(tool = %self.name, "circuit closed after successful call");
            self.circuit_open = false;
            self.circuit_open_at = None;
        }
    }

    fn record_failure(&mut self) {
        self.total_calls += 1;
        self.total_failures += 1;
        self.consecutive_failures += 1;
    }
}

/// Result of a managed tool execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Whether the tool ultimately succeeded.
    pub success: bool,
    /// The textual result (or error text) handed back to the model.
    pub result: String,
    /// Executions attempted (0 when blocked before execution).
    pub attempts: u32,
    /// Wall-clock time spent.
    pub elapsed: Duration,
    /// Classification of the final error, if any.
    pub error_kind: Option<ErrorKind>,
    /// The call was refused by an open breaker.
    pub circuit_open: bool,
    /// Validation errors, when validation rejected the call.
    pub validation_errors: Vec<String>,
    /// The call was blocked by policy.
    pub policy_blocked: bool,
    /// The policy decision that applied.
    pub policy_decision: Option<PolicyDecision>,
}

impl ExecutionResult {
    fn blocked(
        result: String,
        decision: PolicyDecision,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: false,
            result,
            attempts: 0,
            elapsed,
            error_kind: None,
            circuit_open: false,
            validation_errors: Vec::new(),
            policy_blocked: true,
            policy_decision: Some(decision),
        }
    }
}

/// Executes tools with validation, policy enforcement, retries, and a
/// per-tool circuit breaker.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    retry: RetryConfig,
    circuit: CircuitConfig,
    policy: Arc<Mutex<ToolPolicy>>,
    approvals: Option<Arc<ApprovalManager>>,
    validation_enabled: bool,
    health: Mutex<HashMap<String, ToolHealth>>,
}

impl ToolExecutor {
    /// Create an executor with default retry and breaker settings.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            retry: RetryConfig::default(),
            circuit: CircuitConfig::default(),
            policy: Arc::new(Mutex::new(ToolPolicy::default())),
            approvals: None,
            validation_enabled: true,
            health: Mutex::new(HashMap::new()),
        }
    }

    /// Build retry/breaker settings from the self-heal config.
    pub fn from_config(registry: Arc<ToolRegistry>, config: &SelfHealConfig) -> Self {
        Self {
            retry: RetryConfig {
                max_retries: config.max_tool_retries,
                base_delay: Duration::from_secs_f64(config.retry_base_delay),
                max_delay: Duration::from_secs_f64(config.retry_max_delay),
                exponential_base: config.retry_exponential_base,
                jitter: 0.1,
            },
            circuit: CircuitConfig {
                failure_threshold: config.circuit_breaker_threshold,
                cooldown: Duration::from_secs(config.circuit_breaker_cooldown),
            },
            ..Self::new(registry)
        }
    }

    /// Replace the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the breaker configuration.
    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }

    /// Attach a shared tool policy.
    pub fn with_policy(mut self, policy: Arc<Mutex<ToolPolicy>>) -> Self {
        self.policy = policy;
        self
    }

    /// Attach an approval manager; require-approval decisions then block
    /// on a human decision instead of failing immediately.
    pub fn with_approvals(mut self, approvals: Arc<ApprovalManager>) -> Self {
        self.approvals = Some(approvals);
        self
    }

    /// Disable pre-execution validation.
    pub fn without_validation(mut self) -> Self {
        self.validation_enabled = false;
        self
    }

    /// The shared policy handle.
    pub fn policy(&self) -> Arc<Mutex<ToolPolicy>> {
        self.policy.clone()
    }

    /// Compute the backoff delay for an attempt.
    fn delay_for(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let mut delay = self.retry.base_delay.as_secs_f64()
            * self.retry.exponential_base.powi(attempt as i32);
        if kind == ErrorKind::RateLimit {
            delay *= 2.0;
        }
        delay = delay.min(self.retry.max_delay.as_secs_f64());
        let jitter = delay * self.retry.jitter * rand::thread_rng().r#gen::<f64>();
        Duration::from_secs_f64(delay + jitter)
    }

    fn should_retry(kind: ErrorKind, attempt: u32, max_retries: u32) -> bool {
        if attempt >= max_retries {
            return false;
        }
        match kind {
            ErrorKind::Permanent => false,
            ErrorKind::Transient | ErrorKind::RateLimit => true,
            ErrorKind::Unknown => attempt < 1,
        }
    }

    /// Gate on the breaker. Returns `false` when the call must be
    /// refused. When the cooldown has elapsed, exactly one caller is
    /// admitted as the half-open probe (the open timer is re-armed so
    /// concurrent callers keep being refused until the probe resolves).
    async fn breaker_allows(&self, tool: &str) -> bool {
        let mut health = self.health.lock().await;
        let entry = health
            .entry(tool.to_string())
            .or_insert_with(|| ToolHealth::new(tool));
        if !entry.circuit_open {
            return true;
        }
        let opened = entry.circuit_open_at.unwrap_or_else(Instant::now);
        if opened.elapsed() >= self.circuit.cooldown {
            info!(tool, "circuit half-open, admitting probe call");
            entry.circuit_open_at = Some(Instant::now());
            return true;
        }
        false
    }

    async fn record_success(&self, tool: &str) {
        let mut health = self.health.lock().await;
        health
            .entry(tool.to_string())
            .or_insert_with(|| ToolHealth::new(tool))
            .record_success();
    }

    /// Record a failure and open the breaker when the consecutive-failure
    /// threshold is reached.
    async fn record_failure(&self, tool: &str) {
        let mut health = self.health.lock().await;
        let entry = health
            .entry(tool.to_string())
            .or_insert_with(|| ToolHealth::new(tool));
        entry.record_failure();
        if !entry.circuit_open
            && entry.consecutive_failures >= self.circuit.failure_threshold
        {
            warn!(
                tool,
                failures = entry.consecutive_failures,
                "circuit opened after consecutive failures"
            );
            entry.circuit_open = true;
            entry.circuit_open_at = Some(Instant::now());
        } else if entry.circuit_open {
            // A failed half-open probe re-arms the open timer.
            entry.circuit_open_at = Some(Instant::now());
        }
    }

    /// Health snapshot for one tool.
    pub async fn tool_health(&self, tool: &str) -> Option<ToolHealth> {
        self.health.lock().await.get(tool).cloned()
    }

    /// Manually close a tool's breaker. Returns `true` if it was open.
    pub async fn reset_circuit(&self, tool: &str) -> bool {
        let mut health = self.health.lock().await;
        match health.get_mut(tool) {
            Some(entry) if entry.circuit_open => {
                entry.circuit_open = false;
                entry.circuit_open_at = None;
                entry.consecutive_failures = 0;
                info!(tool, "circuit manually reset");
                true
            }
            _ => false,
        }
    }

    /// Manually close every open breaker; returns how many were open.
    pub async fn reset_all_circuits(&self) -> usize {
        let mut health = self.health.lock().await;
        let mut count = 0;
        for entry in health.values_mut() {
            if entry.circuit_open {
                entry.circuit_open = false;
                entry.circuit_open_at = None;
                entry.consecutive_failures = 0;
                count += 1;
            }
        }
        count
    }

    /// Run the full execution pipeline for one tool call.
    pub async fn execute_with_retry(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
        profile: Option<&ModelProfile>,
        call_id: &str,
    ) -> ExecutionResult {
        let start = Instant::now();

        // 1. Validation.
        if self.validation_enabled {
            let Some(tool) = self.registry.get(tool_name) else {
                return ExecutionResult {
                    success: false,
                    result: format!("Error: tool '{tool_name}' not found"),
                    attempts: 0,
                    elapsed: start.elapsed(),
                    error_kind: Some(ErrorKind::Permanent),
                    circuit_open: false,
                    validation_errors: vec![format!("tool '{tool_name}' not found")],
                    policy_blocked: false,
                    policy_decision: None,
                };
            };
            let (errors, warnings) = validate_arguments(&tool.parameters(), &arguments);
            for warning in &warnings {
                debug!(tool = tool_name, warning, "validation warning");
            }
            if !errors.is_empty() {
                return ExecutionResult {
                    success: false,
                    result: format!("Validation failed: {}", errors.join("; ")),
                    attempts: 0,
                    elapsed: start.elapsed(),
                    error_kind: None,
                    circuit_open: false,
                    validation_errors: errors,
                    policy_blocked: false,
                    policy_decision: None,
                };
            }
        }

        // 2. Policy.
        let decision = {
            let policy = self.policy.lock().await;
            policy.check(tool_name, call_id)
        };
        match decision {
            PolicyDecision::Allow => {}
            PolicyDecision::Deny => {
                return ExecutionResult::blocked(
                    format!("Policy blocked: tool '{tool_name}' is denied by security policy"),
                    decision,
                    start.elapsed(),
                );
            }
            PolicyDecision::RequireElevated => {
                return ExecutionResult::blocked(
                    format!("Policy blocked: tool '{tool_name}' requires elevated mode"),
                    decision,
                    start.elapsed(),
                );
            }
            PolicyDecision::RequireApproval => {
                if !self.await_approval(tool_name, &arguments, call_id).await {
                    return ExecutionResult::blocked(
                        format!(
                            "Policy blocked: tool '{tool_name}' requires approval (call id {call_id})"
                        ),
                        decision,
                        start.elapsed(),
                    );
                }
            }
        }

        // 3. Circuit breaker gate.
        if !self.breaker_allows(tool_name).await {
            return ExecutionResult {
                success: false,
                result: format!(
                    "Error: tool '{tool_name}' is temporarily disabled (circuit breaker open)"
                ),
                attempts: 0,
                elapsed: start.elapsed(),
                error_kind: None,
                circuit_open: true,
                validation_errors: Vec::new(),
                policy_blocked: false,
                policy_decision: Some(decision),
            };
        }

        // 4. Retry loop. A profile may narrow the budget.
        let max_retries = profile
            .map(|p| p.guardrails.tool_call_retry_limit)
            .unwrap_or(self.retry.max_retries);

        let mut last_error = String::new();
        let mut last_kind = None;

        for attempt in 0..=max_retries {
            let outcome = self
                .registry
                .execute(tool_name, arguments.clone())
                .await;

            let error = match outcome {
                Ok(text) if !text.starts_with("Error:") => {
                    self.record_success(tool_name).await;
                    return ExecutionResult {
                        success: true,
                        result: text,
                        attempts: attempt + 1,
                        elapsed: start.elapsed(),
                        error_kind: None,
                        circuit_open: false,
                        validation_errors: Vec::new(),
                        policy_blocked: false,
                        policy_decision: Some(decision),
                    };
                }
                Ok(soft_error) => soft_error,
                Err(ToolError::Timeout(secs)) => {
                    format!("Error: tool execution timed out after {secs}s")
                }
                Err(e) => format!("Error: {e}"),
            };

            let kind = classify_error(&error);
            self.record_failure(tool_name).await;
            last_error = error;
            last_kind = Some(kind);

            if Self::should_retry(kind, attempt, max_retries) {
                let delay = self.delay_for(attempt, kind);
                debug!(
                    tool = tool_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error.chars().take(100).collect::<String>(),
                    "tool failed, retrying"
                );
                tokio::time::sleep(delay).await;
            } else {
                return ExecutionResult {
                    success: false,
                    result: last_error,
                    attempts: attempt + 1,
                    elapsed: start.elapsed(),
                    error_kind: last_kind,
                    circuit_open: false,
                    validation_errors: Vec::new(),
                    policy_blocked: false,
                    policy_decision: Some(decision),
                };
            }
        }

        ExecutionResult {
            success: false,
            result: if last_error.is_empty() {
                format!("Error: tool '{tool_name}' failed after {} attempts", max_retries + 1)
            } else {
                last_error
            },
            attempts: max_retries + 1,
            elapsed: start.elapsed(),
            error_kind: last_kind,
            circuit_open: false,
            validation_errors: Vec::new(),
            policy_blocked: false,
            policy_decision: Some(decision),
        }
    }

    /// Request approval and wait for the decision. Returns `true` when
    /// granted, in which case the call id is recorded on the policy.
    async fn await_approval(
        &self,
        tool_name: &str,
        arguments: &serde_json::Value,
        call_id: &str,
    ) -> bool {
        let Some(approvals) = &self.approvals else {
            return false;
        };
        let approval = approvals
            .request(
                tool_name,
                arguments.clone(),
                "tool-executor",
                &format!("Policy requires approval for '{tool_name}'"),
            )
            .await;
        match approvals.wait_for_decision(&approval.id, None).await {
            Ok(decided) if decided.status == ApprovalStatus::Approved => {
                let mut policy = self.policy.lock().await;
                policy.approve_call(call_id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::tools::registry::Tool;

    /// Tool that fails `failures` times with the given error, then
    /// succeeds.
    struct FlakyTool {
        name: String,
        failures: AtomicU32,
        error: String,
    }

    impl FlakyTool {
        fn new(name: &str, failures: u32, error: &str) -> Self {
            Self {
                name: name.into(),
                failures: AtomicU32::new(failures),
                error: error.into(),
            }
        }
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "Flaky test tool"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "q": { "type": "string" } },
                "required": ["q"]
            })
        }
        async fn execute(&self, _args: serde_json::Value) -> Result<String, ToolError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ToolError::ExecutionFailed(self.error.clone()));
            }
            Ok("ok".into())
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
            jitter: 0.0,
        }
    }

    fn executor_with(tool: Arc<dyn Tool>) -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(tool);
        ToolExecutor::new(Arc::new(registry)).with_retry(fast_retry())
    }

    #[test]
    fn classification_table() {
        assert_eq!(classify_error("connection reset by peer"), ErrorKind::Transient);
        assert_eq!(classify_error("Request timed out"), ErrorKind::Transient);
        assert_eq!(classify_error("429 Too Many Requests"), ErrorKind::RateLimit);
        assert_eq!(classify_error("quota exceeded"), ErrorKind::RateLimit);
        assert_eq!(classify_error("file not found"), ErrorKind::Permanent);
        assert_eq!(classify_error("permission denied"), ErrorKind::Permanent);
        assert_eq!(classify_error("something odd happened"), ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn validation_rejects_without_executing() {
        let tool = Arc::new(FlakyTool::new("web_search", 0, ""));
        let executor = executor_with(tool.clone());
        let result = executor
            .execute_with_retry("web_search", serde_json::json!({}), None, "c1")
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 0);
        assert!(!result.validation_errors.is_empty());
        // The tool was never touched.
        assert_eq!(tool.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failures_retried_to_success() {
        let executor = executor_with(Arc::new(FlakyTool::new(
            "web_search",
            2,
            "connection refused",
        )));
        let result = executor
            .execute_with_retry(
                "web_search",
                serde_json::json!({"q": "rust"}),
                None,
                "c1",
            )
            .await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.result, "ok");
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let executor = executor_with(Arc::new(FlakyTool::new(
            "web_search",
            10,
            "404 not found",
        )));
        let result = executor
            .execute_with_retry(
                "web_search",
                serde_json::json!({"q": "x"}),
                None,
                "c1",
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error_kind, Some(ErrorKind::Permanent));
    }

    #[tokio::test]
    async fn unknown_error_retried_exactly_once() {
        let tool = Arc::new(FlakyTool::new("web_search", 10, "weird glitch"));
        let executor = executor_with(tool.clone());
        let result = executor
            .execute_with_retry(
                "web_search",
                serde_json::json!({"q": "x"}),
                None,
                "c1",
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn profile_overrides_retry_budget() {
        let mut profile = ModelProfile::new("m");
        profile.guardrails.tool_call_retry_limit = 1;
        let executor = executor_with(Arc::new(FlakyTool::new(
            "web_search",
            10,
            "connection refused",
        )));
        let result = executor
            .execute_with_retry(
                "web_search",
                serde_json::json!({"q": "x"}),
                Some(&profile),
                "c1",
            )
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_refuses() {
        let executor = executor_with(Arc::new(FlakyTool::new(
            "web_search",
            1000,
            "connection refused",
        )))
        .with_circuit(CircuitConfig {
            failure_threshold: 5,
            cooldown: Duration::from_secs(300),
        });

        // Exhaust retries a couple of times; failures accumulate past 5.
        for _ in 0..2 {
            executor
                .execute_with_retry(
                    "web_search",
                    serde_json::json!({"q": "x"}),
                    None,
                    "c",
                )
                .await;
        }
        let health = executor.tool_health("web_search").await.unwrap();
        assert!(health.circuit_open);

        // Next call within cooldown is refused without touching the tool.
        let result = executor
            .execute_with_retry(
                "web_search",
                serde_json::json!({"q": "x"}),
                None,
                "c",
            )
            .await;
        assert!(result.circuit_open);
        assert_eq!(result.attempts, 0);
        assert!(result.result.contains("temporarily disabled"));
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_breaker() {
        // Tool fails 5 times (tripping the breaker mid-loop), then the
        // sixth attempt succeeds and closes it.
        let executor = executor_with(Arc::new(FlakyTool::new(
            "web_search",
            5,
            "connection refused",
        )))
        .with_retry(RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            exponential_base: 2.0,
            jitter: 0.0,
        })
        .with_circuit(CircuitConfig {
            failure_threshold: 5,
            cooldown: Duration::from_millis(1),
        });

        let result = executor
            .execute_with_retry(
                "web_search",
                serde_json::json!({"q": "x"}),
                None,
                "c",
            )
            .await;
        assert!(result.success);
        let health = executor.tool_health("web_search").await.unwrap();
        assert!(!health.circuit_open);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn probe_after_cooldown_is_admitted() {
        let executor = executor_with(Arc::new(FlakyTool::new(
            "web_search",
            6,
            "connection refused",
        )))
        .with_retry(RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            exponential_base: 2.0,
            jitter: 0.0,
        })
        .with_circuit(CircuitConfig {
            failure_threshold: 3,
            cooldown: Duration::from_millis(5),
        });

        // Trip the breaker (3 consecutive failures opens it; retries
        // continue and the 7th attempt would succeed, but the budget of
        // 5 retries = 6 attempts exhausts first).
        let result = executor
            .execute_with_retry(
                "web_search",
                serde_json::json!({"q": "x"}),
                None,
                "c",
            )
            .await;
        assert!(!result.success);
        assert!(executor.tool_health("web_search").await.unwrap().circuit_open);

        // After the cooldown, the probe is admitted and succeeds.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let result = executor
            .execute_with_retry(
                "web_search",
                serde_json::json!({"q": "x"}),
                None,
                "c",
            )
            .await;
        assert!(result.success);
        assert!(!executor.tool_health("web_search").await.unwrap().circuit_open);
    }

    #[tokio::test]
    async fn policy_deny_blocks_before_execution() {
        let tool = Arc::new(FlakyTool::new("exec", 0, ""));
        let executor = executor_with(tool.clone());
        {
            let policy = executor.policy();
            policy.lock().await.deny = vec!["exec".into()];
        }
        let result = executor
            .execute_with_retry("exec", serde_json::json!({"q": "x"}), None, "c")
            .await;
        assert!(result.policy_blocked);
        assert_eq!(result.policy_decision, Some(PolicyDecision::Deny));
        assert_eq!(result.attempts, 0);
    }

    #[tokio::test]
    async fn require_approval_without_manager_blocks() {
        let executor = executor_with(Arc::new(FlakyTool::new("exec", 0, "")));
        {
            let policy = executor.policy();
            policy.lock().await.require_approval = vec!["exec".into()];
        }
        let result = executor
            .execute_with_retry("exec", serde_json::json!({"q": "x"}), None, "c9")
            .await;
        assert!(result.policy_blocked);
        assert_eq!(
            result.policy_decision,
            Some(PolicyDecision::RequireApproval)
        );
        assert!(result.result.contains("c9"));
    }

    #[tokio::test]
    async fn pre_approved_call_id_passes_policy() {
        let executor = executor_with(Arc::new(FlakyTool::new("exec", 0, "")));
        {
            let policy = executor.policy();
            let mut policy = policy.lock().await;
            policy.require_approval = vec!["exec".into()];
            policy.approve_call("c1");
        }
        let result = executor
            .execute_with_retry("exec", serde_json::json!({"q": "x"}), None, "c1")
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn manual_reset_closes_breaker() {
        let executor = executor_with(Arc::new(FlakyTool::new(
            "web_search",
            1000,
            "connection refused",
        )))
        .with_circuit(CircuitConfig {
            failure_threshold: 2,
            cooldown: Duration::from_secs(300),
        });
        executor
            .execute_with_retry("web_search", serde_json::json!({"q": "x"}), None, "c")
            .await;
        assert!(executor.tool_health("web_search").await.unwrap().circuit_open);
        assert!(executor.reset_circuit("web_search").await);
        assert!(!executor.tool_health("web_search").await.unwrap().circuit_open);
        assert!(!executor.reset_circuit("web_search").await);
    }

    #[tokio::test]
    async fn soft_error_strings_count_as_failures() {
        struct SoftErrorTool;
        #[async_trait]
        impl Tool for SoftErrorTool {
            fn name(&self) -> &str {
                "soft"
            }
            fn description(&self) -> &str {
                "always reports an in-band error"
            }
            fn parameters(&self) -> serde_json::Value {
                serde_json::json!({"type": "object", "properties": {}, "required": []})
            }
            async fn execute(
                &self,
                _args: serde_json::Value,
            ) -> Result<String, ToolError> {
                Ok("Error: resource not found".into())
            }
        }
        let executor = executor_with(Arc::new(SoftErrorTool));
        let result = executor
            .execute_with_retry("soft", serde_json::json!({}), None, "c")
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Permanent));
    }
}
