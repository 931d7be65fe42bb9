//! The `exec` tool.
//!
//! Advertises shell execution to the model and dispatches through the
//! [`ExecRouter`], so a single tool call can run locally or on a paired
//! node depending on arguments and configuration.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use hivegate_core::tools::{Tool, ToolError};
use hivegate_nodes::{ExecHost, ExecRequest, ExecRouter};

/// Shell execution tool backed by the exec router.
pub struct ExecTool {
    router: Arc<ExecRouter>,
}

impl ExecTool {
    /// Create the tool over a router.
    pub fn new(router: Arc<ExecRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Set host=\"node\" \
         and optionally node=<id or name> to run on a paired remote node."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "host": {
                    "type": "string",
                    "enum": ["local", "node"],
                    "description": "Where to run the command"
                },
                "node": {
                    "type": "string",
                    "description": "Node id or display name (host=node)"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<String, ToolError> {
        let command = args
            .get("command")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArgs("missing 'command'".into()))?;

        let mut request = ExecRequest::command(command);
        if let Some(host) = args.get("host").and_then(|v| v.as_str()) {
            request.host = Some(ExecHost::parse(host));
        }
        if let Some(node) = args.get("node").and_then(|v| v.as_str()) {
            request.node = node.to_string();
        }
        if let Some(cwd) = args.get("cwd").and_then(|v| v.as_str()) {
            request.cwd = cwd.to_string();
        }
        if let Some(timeout) = args.get("timeout").and_then(|v| v.as_u64()) {
            request.timeout = Some(timeout);
        }

        debug!(command, "exec tool dispatching");
        let result = self.router.execute(request).await;
        if !result.success && result.error.is_some() {
            // In-band error string so the executor can classify and retry.
            return Ok(format!("Error: {}", result.error.unwrap()));
        }
        Ok(result.to_output())
    }
}
