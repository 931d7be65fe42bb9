//! Headless node host.
//!
//! Connects out to the gateway over a persistent WebSocket, handshakes
//! with its identity and capabilities, answers keepalives, and executes
//! `system.run` / `system.which` invokes. Every `system.run` passes the
//! local [`ExecApprovalManager`] first. On socket loss the host
//! reconnects with exponential backoff from 1s to 60s; identity persists
//! in a local config file so the node id survives restarts.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hivegate_types::Result;
use hivegate_types::node::{
    NodeInvoke, NodeInvokeResult, NodeMessage, NodeMessageType,
    capability_system_run, capability_system_which, error_code,
};

use crate::approvals::ExecApprovalManager;

/// Initial reconnect delay.
const RECONNECT_BASE: Duration = Duration::from_secs(1);

/// Reconnect delay cap.
const RECONNECT_MAX: Duration = Duration::from_secs(60);

/// Cap per output stream handed back from `system.run`.
const MAX_STREAM_CHARS: usize = 10_000;

/// Persistent host identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HostIdentity {
    node_id: String,
    display_name: String,
    gateway_url: String,
    token: String,
    updated_at: chrono::DateTime<Utc>,
}

/// The headless node host.
pub struct NodeHost {
    gateway_url: String,
    token: String,
    display_name: String,
    node_id: String,
    config_path: Option<PathBuf>,
    approvals: ExecApprovalManager,
}

impl NodeHost {
    /// Create a host; a fresh node id is generated unless one is loaded
    /// from the config file later.
    pub fn new(
        gateway_url: impl Into<String>,
        token: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            token: token.into(),
            display_name: display_name.into(),
            node_id: Uuid::new_v4().to_string(),
            config_path: None,
            approvals: ExecApprovalManager::new(),
        }
    }

    /// Persist/restore identity at `path`. An existing file overrides
    /// the generated node id and fills empty fields.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Ok(content) = std::fs::read_to_string(&path)
            && let Ok(identity) = serde_json::from_str::<HostIdentity>(&content)
        {
            debug!(node_id = %identity.node_id, "loaded host identity");
            self.node_id = identity.node_id;
            if self.token.is_empty() {
                self.token = identity.token;
            }
            if self.display_name.is_empty() {
                self.display_name = identity.display_name;
            }
            if self.gateway_url.is_empty() {
                self.gateway_url = identity.gateway_url;
            }
        }
        self.config_path = Some(path);
        self
    }

    /// Use a specific exec-approval manager.
    pub fn with_approvals(mut self, approvals: ExecApprovalManager) -> Self {
        self.approvals = approvals;
        self
    }

    /// This host's node id.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    fn save_identity(&self) -> Result<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let identity = HostIdentity {
            node_id: self.node_id.clone(),
            display_name: self.display_name.clone(),
            gateway_url: self.gateway_url.clone(),
            token: self.token.clone(),
            updated_at: Utc::now(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&identity)?)?;
        Ok(())
    }

    /// Run until cancelled: connect, serve, reconnect with backoff.
    pub async fn run(&self) -> Result<()> {
        self.save_identity()?;
        info!(
            node_id = %self.node_id,
            gateway = %self.gateway_url,
            "node host starting"
        );

        let mut attempts: u32 = 0;
        loop {
            match self.connect_and_serve().await {
                Ok(ServeEnd::GatewayRequestedStop) => {
                    info!("gateway requested disconnect, host stopping");
                    return Ok(());
                }
                Ok(ServeEnd::SocketClosed) => {
                    attempts += 1;
                }
                Err(e) => {
                    warn!(error = %e, "connection error");
                    attempts += 1;
                }
            }
            let delay = RECONNECT_BASE
                .saturating_mul(2u32.saturating_pow(attempts.saturating_sub(1)))
                .min(RECONNECT_MAX);
            info!(delay_s = delay.as_secs(), "reconnecting");
            tokio::time::sleep(delay).await;
        }
    }

    async fn connect_and_serve(&self) -> Result<ServeEnd> {
        let (ws, _) = connect_async(&self.gateway_url).await.map_err(|e| {
            hivegate_types::GatewayError::Node {
                code: error_code::NODE_UNAVAILABLE.into(),
                message: format!("websocket connect failed: {e}"),
            }
        })?;
        let (mut sink, mut stream) = ws.split();

        // Handshake.
        let connect = NodeMessage::connect(
            &self.node_id,
            &self.display_name,
            &[capability_system_run(), capability_system_which()],
            std::env::consts::OS,
            &hostname(),
            &self.token,
        );
        sink.send(Message::Text(serde_json::to_string(&connect)?))
            .await
            .map_err(|e| hivegate_types::GatewayError::Node {
                code: error_code::NODE_UNAVAILABLE.into(),
                message: format!("handshake send failed: {e}"),
            })?;

        while let Some(message) = stream.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return Ok(ServeEnd::SocketClosed),
                Ok(_) => continue,
                Err(_) => return Ok(ServeEnd::SocketClosed),
            };
            let frame: NodeMessage = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "invalid frame from gateway");
                    continue;
                }
            };

            match frame.message_type {
                NodeMessageType::ConnectAck => {
                    let paired = frame
                        .payload
                        .get("paired")
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false);
                    info!(
                        paired,
                        "connected to gateway{}",
                        if paired { "" } else { " (pending approval)" }
                    );
                }
                NodeMessageType::ConnectReject => {
                    let reason = frame
                        .payload
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    warn!(reason, "connection rejected by gateway");
                    return Ok(ServeEnd::SocketClosed);
                }
                NodeMessageType::Ping => {
                    let pong = NodeMessage::pong(&self.node_id);
                    if sink
                        .send(Message::Text(serde_json::to_string(&pong)?))
                        .await
                        .is_err()
                    {
                        return Ok(ServeEnd::SocketClosed);
                    }
                }
                NodeMessageType::Invoke => {
                    let result = self.handle_invoke(&frame.payload).await;
                    let reply = NodeMessage::invoke_result(&self.node_id, &result);
                    if sink
                        .send(Message::Text(serde_json::to_string(&reply)?))
                        .await
                        .is_err()
                    {
                        return Ok(ServeEnd::SocketClosed);
                    }
                }
                NodeMessageType::Disconnect => {
                    return Ok(ServeEnd::GatewayRequestedStop);
                }
                _ => {}
            }
        }
        Ok(ServeEnd::SocketClosed)
    }

    /// Dispatch one invoke to its capability handler.
    pub async fn handle_invoke(&self, payload: &serde_json::Value) -> NodeInvokeResult {
        let invoke: NodeInvoke = match serde_json::from_value(payload.clone()) {
            Ok(invoke) => invoke,
            Err(e) => {
                return NodeInvokeResult::failure(
                    "",
                    format!("malformed invoke payload: {e}"),
                    error_code::COMMAND_NOT_FOUND,
                );
            }
        };
        let start = Instant::now();

        let mut result = match invoke.command.as_str() {
            "system.run" => self.exec_system_run(&invoke).await,
            "system.which" => self.exec_system_which(&invoke),
            other => NodeInvokeResult::failure(
                &invoke.id,
                format!("unknown command: {other}"),
                error_code::CAPABILITY_NOT_SUPPORTED,
            ),
        };
        result.duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        result
    }

    async fn exec_system_run(&self, invoke: &NodeInvoke) -> NodeInvokeResult {
        let command = invoke
            .params
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if command.is_empty() {
            return NodeInvokeResult::failure(
                &invoke.id,
                "no command provided",
                error_code::COMMAND_NOT_FOUND,
            );
        }

        let check = self.approvals.check(command);
        if !check.allowed {
            return NodeInvokeResult::failure(
                &invoke.id,
                format!("command not approved: {}", check.reason),
                error_code::EXEC_DENIED,
            );
        }

        let cwd = invoke.params.get("cwd").and_then(|v| v.as_str());
        let env: Vec<(String, String)> = invoke
            .params
            .get("env")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| {
                        v.as_str().map(|s| (k.clone(), s.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let timeout = invoke
            .params
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(60);

        debug!(command, "executing system.run");
        match run_shell(command, cwd, &env, Duration::from_secs(timeout)).await {
            Ok((stdout, stderr, exit_code)) => NodeInvokeResult {
                invoke_id: invoke.id.clone(),
                success: exit_code == 0,
                result: serde_json::json!({
                    "stdout": stdout,
                    "stderr": stderr,
                    "exit_code": exit_code,
                }),
                error: if exit_code == 0 { String::new() } else { stderr },
                error_code: String::new(),
                duration_ms: 0.0,
            },
            Err(ShellError::Timeout) => NodeInvokeResult::failure(
                &invoke.id,
                format!("command timed out after {timeout}s"),
                error_code::TIMEOUT,
            ),
            Err(ShellError::Spawn(e)) => {
                NodeInvokeResult::failure(&invoke.id, e, error_code::COMMAND_NOT_FOUND)
            }
        }
    }

    fn exec_system_which(&self, invoke: &NodeInvoke) -> NodeInvokeResult {
        let command = invoke
            .params
            .get("command")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if command.is_empty() {
            return NodeInvokeResult::failure(
                &invoke.id,
                "no command provided",
                error_code::COMMAND_NOT_FOUND,
            );
        }

        let path = which::which(command).ok();
        NodeInvokeResult {
            invoke_id: invoke.id.clone(),
            success: true,
            result: serde_json::json!({
                "exists": path.is_some(),
                "path": path.map(|p| p.display().to_string()),
            }),
            error: String::new(),
            error_code: String::new(),
            duration_ms: 0.0,
        }
    }
}

enum ServeEnd {
    SocketClosed,
    GatewayRequestedStop,
}

enum ShellError {
    Timeout,
    Spawn(String),
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}

fn truncate_stream(text: String) -> String {
    if text.chars().count() <= MAX_STREAM_CHARS {
        return text;
    }
    let total = text.chars().count();
    let kept: String = text.chars().take(MAX_STREAM_CHARS).collect();
    format!("{kept}\n... [truncated, {total} chars total]")
}

/// Run a shell command with redirected output, killed on timeout.
async fn run_shell(
    command: &str,
    cwd: Option<&str>,
    env: &[(String, String)],
    timeout: Duration,
) -> std::result::Result<(String, String, i32), ShellError> {
    #[cfg(unix)]
    let mut builder = {
        let mut c = tokio::process::Command::new("sh");
        c.arg("-c").arg(command);
        c
    };
    #[cfg(windows)]
    let mut builder = {
        let mut c = tokio::process::Command::new("cmd");
        c.arg("/C").arg(command);
        c
    };

    if let Some(cwd) = cwd {
        builder.current_dir(cwd);
    }
    for (key, value) in env {
        builder.env(key, value);
    }
    builder
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);

    let child = builder
        .spawn()
        .map_err(|e| ShellError::Spawn(e.to_string()))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(ShellError::Spawn(e.to_string())),
        // kill_on_drop reaps the process when the future is dropped.
        Err(_) => return Err(ShellError::Timeout),
    };

    Ok((
        truncate_stream(String::from_utf8_lossy(&output.stdout).into_owned()),
        truncate_stream(String::from_utf8_lossy(&output.stderr).into_owned()),
        output.status.code().unwrap_or(-1),
    ))
}
