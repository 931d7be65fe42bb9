//! Exec routing.
//!
//! One `execute` surface for "run this shell command": dispatched to a
//! local subprocess or, via the node manager, to a paired remote node.
//! Node resolution tries id, then display name, then the first connected
//! paired node; with `fallback_to_local` set an unreachable node falls
//! back to local execution instead of failing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use hivegate_types::node::error_code;

use crate::manager::NodeManager;

/// Where a command runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecHost {
    Local,
    Node,
}

impl ExecHost {
    /// Parse from configuration ("local" / "node").
    pub fn parse(value: &str) -> Self {
        match value {
            "node" => Self::Node,
            _ => Self::Local,
        }
    }
}

/// One exec request.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub command: String,
    /// Target override; `None` uses the router default.
    pub host: Option<ExecHost>,
    /// Node id or display name (host = node).
    pub node: String,
    pub cwd: String,
    pub env: Vec<(String, String)>,
    /// Timeout in seconds; `None` uses the router default.
    pub timeout: Option<u64>,
}

impl ExecRequest {
    /// A plain local-default request.
    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }
}

/// Result of an exec dispatch.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub host: ExecHost,
    pub node_id: Option<String>,
    pub error: Option<String>,
    pub duration_ms: f64,
}

impl ExecResult {
    fn failure(host: ExecHost, error: String, duration_ms: f64) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: -1,
            host,
            node_id: None,
            error: Some(error),
            duration_ms,
        }
    }

    /// Render as a tool-output string.
    pub fn to_output(&self) -> String {
        let mut parts = Vec::new();
        if !self.stdout.is_empty() {
            parts.push(self.stdout.clone());
        }
        if !self.stderr.is_empty() {
            parts.push(format!("STDERR: {}", self.stderr));
        }
        if self.exit_code != 0 {
            parts.push(format!("Exit code: {}", self.exit_code));
        }
        if let Some(error) = &self.error {
            parts.push(format!("Error: {error}"));
        }
        if parts.is_empty() {
            "Command completed successfully".into()
        } else {
            parts.join("\n")
        }
    }
}

/// Cap per captured output stream.
const MAX_STREAM_CHARS: usize = 10_000;

/// Routes exec requests to local or node execution.
pub struct ExecRouter {
    manager: Option<Arc<NodeManager>>,
    default_host: ExecHost,
    default_node: String,
    fallback_to_local: bool,
    default_timeout: Duration,
}

impl ExecRouter {
    /// Local-only router.
    pub fn local_only() -> Self {
        Self {
            manager: None,
            default_host: ExecHost::Local,
            default_node: String::new(),
            fallback_to_local: true,
            default_timeout: Duration::from_secs(60),
        }
    }

    /// Router with node dispatch available.
    pub fn new(
        manager: Arc<NodeManager>,
        default_host: ExecHost,
        default_node: impl Into<String>,
        fallback_to_local: bool,
    ) -> Self {
        Self {
            manager: Some(manager),
            default_host,
            default_node: default_node.into(),
            fallback_to_local,
            default_timeout: Duration::from_secs(60),
        }
    }

    /// Default command timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Execute a request.
    pub async fn execute(&self, request: ExecRequest) -> ExecResult {
        let host = request.host.unwrap_or(self.default_host);
        match host {
            ExecHost::Local => self.execute_local(&request).await,
            ExecHost::Node => self.execute_node(&request).await,
        }
    }

    async fn execute_local(&self, request: &ExecRequest) -> ExecResult {
        let start = Instant::now();
        let timeout = Duration::from_secs(
            request
                .timeout
                .unwrap_or(self.default_timeout.as_secs()),
        );
        debug!(command = %request.command, "executing locally");

        #[cfg(unix)]
        let mut builder = {
            let mut c = tokio::process::Command::new("sh");
            c.arg("-c").arg(&request.command);
            c
        };
        #[cfg(windows)]
        let mut builder = {
            let mut c = tokio::process::Command::new("cmd");
            c.arg("/C").arg(&request.command);
            c
        };

        if !request.cwd.is_empty() {
            builder.current_dir(&request.cwd);
        }
        for (key, value) in &request.env {
            builder.env(key, value);
        }
        builder
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let child = match builder.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecResult::failure(
                    ExecHost::Local,
                    e.to_string(),
                    start.elapsed().as_secs_f64() * 1000.0,
                );
            }
        };

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecResult::failure(
                    ExecHost::Local,
                    e.to_string(),
                    start.elapsed().as_secs_f64() * 1000.0,
                );
            }
            Err(_) => {
                // kill_on_drop terminates the child.
                return ExecResult::failure(
                    ExecHost::Local,
                    format!("command timed out after {}s", timeout.as_secs()),
                    start.elapsed().as_secs_f64() * 1000.0,
                );
            }
        };

        ExecResult {
            success: output.status.success(),
            stdout: truncate(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: truncate(String::from_utf8_lossy(&output.stderr).into_owned()),
            exit_code: output.status.code().unwrap_or(-1),
            host: ExecHost::Local,
            node_id: None,
            error: None,
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        }
    }

    async fn execute_node(&self, request: &ExecRequest) -> ExecResult {
        let start = Instant::now();

        let Some(manager) = &self.manager else {
            if self.fallback_to_local {
                debug!("no node manager, falling back to local");
                return self.execute_local(request).await;
            }
            return ExecResult::failure(
                ExecHost::Node,
                "node manager not configured".into(),
                0.0,
            );
        };

        // Resolve: explicit id -> display name -> first connected node.
        let target = if request.node.is_empty() {
            self.default_node.clone()
        } else {
            request.node.clone()
        };
        let node = if target.is_empty() {
            manager.default_node().await
        } else {
            match manager.get_node(&target).await {
                Some(node) => Some(node),
                None => manager.get_node_by_name(&target).await,
            }
        };

        let Some(node) = node else {
            if self.fallback_to_local {
                info!(node = %target, "node not found, falling back to local");
                return self.execute_local(request).await;
            }
            return ExecResult::failure(
                ExecHost::Node,
                format!(
                    "node not found: {}",
                    if target.is_empty() { "default" } else { &target }
                ),
                start.elapsed().as_secs_f64() * 1000.0,
            );
        };

        if !manager.is_connected(&node.id).await {
            if self.fallback_to_local {
                info!(node = %node.display_name, "node not connected, falling back to local");
                return self.execute_local(request).await;
            }
            let mut result = ExecResult::failure(
                ExecHost::Node,
                format!("node not connected: {}", node.display_name),
                start.elapsed().as_secs_f64() * 1000.0,
            );
            result.node_id = Some(node.id);
            return result;
        }

        let mut params = serde_json::json!({ "command": request.command });
        if !request.cwd.is_empty() {
            params["cwd"] = serde_json::json!(request.cwd);
        }
        if !request.env.is_empty() {
            let env: serde_json::Map<String, serde_json::Value> = request
                .env
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::json!(v)))
                .collect();
            params["env"] = serde_json::Value::Object(env);
        }
        let timeout_s = request.timeout.unwrap_or(self.default_timeout.as_secs());
        params["timeout"] = serde_json::json!(timeout_s);

        let invoke_result = manager
            .invoke(&node.id, "system.run", params, timeout_s * 1000)
            .await;

        if invoke_result.success || invoke_result.error_code.is_empty() {
            let payload = &invoke_result.result;
            let exit_code = payload
                .get("exit_code")
                .and_then(|v| v.as_i64())
                .unwrap_or(-1) as i32;
            return ExecResult {
                success: exit_code == 0,
                stdout: payload
                    .get("stdout")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                stderr: payload
                    .get("stderr")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                exit_code,
                host: ExecHost::Node,
                node_id: Some(node.id),
                error: None,
                duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            };
        }

        if self.fallback_to_local
            && invoke_result.error_code == error_code::NODE_UNAVAILABLE
        {
            info!(node = %node.id, "node invoke failed, falling back to local");
            return self.execute_local(request).await;
        }

        let mut result = ExecResult::failure(
            ExecHost::Node,
            invoke_result.error,
            start.elapsed().as_secs_f64() * 1000.0,
        );
        result.node_id = Some(node.id);
        result
    }
}

fn truncate(text: String) -> String {
    if text.chars().count() <= MAX_STREAM_CHARS {
        return text;
    }
    let total = text.chars().count();
    let kept: String = text.chars().take(MAX_STREAM_CHARS).collect();
    format!("{kept}\n... [truncated, {total} chars total]")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hivegate_types::node::{NodeInfo, NodeStatus, capability_system_run};

    fn paired_node(id: &str, name: &str) -> NodeInfo {
        let mut node = NodeInfo::pending(id, name);
        node.status = NodeStatus::Paired;
        node.paired_at = Some(Utc::now());
        node.capabilities = vec![capability_system_run()];
        node
    }

    #[tokio::test]
    async fn local_execution_captures_streams() {
        let router = ExecRouter::local_only();
        let result = router
            .execute(ExecRequest::command("echo out && echo err 1>&2"))
            .await;
        assert!(result.success);
        assert_eq!(result.host, ExecHost::Local);
        assert!(result.stdout.contains("out"));
        assert!(result.stderr.contains("err"));
        assert!(result.node_id.is_none());
    }

    #[tokio::test]
    async fn local_nonzero_exit_reported() {
        let router = ExecRouter::local_only();
        let result = router.execute(ExecRequest::command("exit 7")).await;
        assert!(!result.success);
        assert_eq!(result.exit_code, 7);
        assert!(result.to_output().contains("Exit code: 7"));
    }

    #[tokio::test]
    async fn local_timeout_kills_process() {
        let router =
            ExecRouter::local_only().with_default_timeout(Duration::from_secs(1));
        let start = Instant::now();
        let result = router.execute(ExecRequest::command("sleep 10")).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn node_host_falls_back_when_node_disconnected() {
        // Scenario: node is paired but not connected; fallback_to_local
        // runs the command locally and reports host=local.
        let manager = Arc::new(NodeManager::new("", false));
        manager
            .upsert_node(paired_node("n1", "build-server"))
            .await;

        let router = ExecRouter::new(manager, ExecHost::Node, "build-server", true);
        let result = router.execute(ExecRequest::command("echo fallback")).await;
        assert!(result.success);
        assert_eq!(result.host, ExecHost::Local);
        assert!(result.node_id.is_none());
        assert!(result.stdout.contains("fallback"));
    }

    #[tokio::test]
    async fn node_host_without_fallback_errors() {
        let manager = Arc::new(NodeManager::new("", false));
        manager
            .upsert_node(paired_node("n1", "build-server"))
            .await;

        let router = ExecRouter::new(manager, ExecHost::Node, "build-server", false);
        let result = router.execute(ExecRequest::command("echo x")).await;
        assert!(!result.success);
        assert_eq!(result.host, ExecHost::Node);
        assert_eq!(result.node_id.as_deref(), Some("n1"));
        assert!(result.error.as_deref().unwrap().contains("not connected"));
    }

    #[tokio::test]
    async fn unknown_node_without_fallback_errors() {
        let manager = Arc::new(NodeManager::new("", false));
        let router = ExecRouter::new(manager, ExecHost::Node, "ghost", false);
        let result = router.execute(ExecRequest::command("echo x")).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("node not found"));
    }

    #[tokio::test]
    async fn resolution_prefers_id_then_name() {
        let manager = Arc::new(NodeManager::new("", false));
        manager.upsert_node(paired_node("id-1", "alpha")).await;
        manager.upsert_node(paired_node("id-2", "id-1-lookalike")).await;

        let router = ExecRouter::new(manager.clone(), ExecHost::Node, "", false);
        let mut request = ExecRequest::command("echo x");
        request.node = "alpha".into();
        let result = router.execute(request).await;
        // Resolved by display name to id-1 (which is not connected).
        assert_eq!(result.node_id.as_deref(), Some("id-1"));
    }

    #[tokio::test]
    async fn request_host_override_beats_default() {
        let manager = Arc::new(NodeManager::new("", false));
        let router = ExecRouter::new(manager, ExecHost::Node, "ghost", false);
        let mut request = ExecRequest::command("echo local-override");
        request.host = Some(ExecHost::Local);
        let result = router.execute(request).await;
        assert!(result.success);
        assert_eq!(result.host, ExecHost::Local);
    }

    #[test]
    fn exec_host_parse() {
        assert_eq!(ExecHost::parse("node"), ExecHost::Node);
        assert_eq!(ExecHost::parse("local"), ExecHost::Local);
        assert_eq!(ExecHost::parse("anything"), ExecHost::Local);
    }

    #[test]
    fn output_rendering() {
        let result = ExecResult {
            success: true,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: 0,
            host: ExecHost::Local,
            node_id: None,
            error: None,
            duration_ms: 1.0,
        };
        assert_eq!(result.to_output(), "Command completed successfully");
    }
}
