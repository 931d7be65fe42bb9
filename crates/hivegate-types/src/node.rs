//! Node protocol data model.
//!
//! Every frame on the gateway <-> node socket is a [`NodeMessage`]: a
//! tagged object with shared fields `{type, node_id, message_id,
//! timestamp, payload}`. Handshake, keepalive and invocation flows are
//! built from these frames; correlation is by `invoke_id` inside the
//! payload.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a node in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Waiting for pairing approval.
    Pending,
    /// Approved but not connected.
    Paired,
    /// Actively connected.
    Connected,
    /// Was connected, now offline and never paired.
    Disconnected,
}

/// Frame types in the node protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMessageType {
    Connect,
    ConnectAck,
    ConnectReject,
    Disconnect,
    Ping,
    Pong,
    Invoke,
    InvokeResult,
    Status,
    Capabilities,
}

/// A capability advertised by a node (`system.run`, `system.which`, …).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeCapability {
    /// Capability name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Capability version.
    #[serde(default = "default_capability_version")]
    pub version: String,
    /// Additional info.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_capability_version() -> String {
    "1.0".into()
}

impl NodeCapability {
    /// Create a capability with a name and description.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            version: default_capability_version(),
            metadata: HashMap::new(),
        }
    }
}

/// The capability every host advertises for shell execution.
pub fn capability_system_run() -> NodeCapability {
    NodeCapability::new("system.run", "Execute shell commands")
}

/// The capability every host advertises for command discovery.
pub fn capability_system_which() -> NodeCapability {
    NodeCapability::new("system.which", "Check if a command exists")
}

/// Persistent identity record for a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub display_name: String,
    /// Lifecycle status.
    pub status: NodeStatus,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: Vec<NodeCapability>,
    /// Last observed IP address.
    #[serde(default)]
    pub ip_address: String,
    /// Reported hostname.
    #[serde(default)]
    pub hostname: String,
    /// Reported OS platform.
    #[serde(default)]
    pub platform: String,
    /// When the node was first seen.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
    /// When the operator approved pairing.
    #[serde(default)]
    pub paired_at: Option<DateTime<Utc>>,
}

impl NodeInfo {
    /// Create a pending node record.
    pub fn pending(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            status: NodeStatus::Pending,
            capabilities: Vec::new(),
            ip_address: String::new(),
            hostname: String::new(),
            platform: String::new(),
            created_at: Utc::now(),
            last_seen: None,
            paired_at: None,
        }
    }

    /// True if the node advertises the named capability.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == name)
    }
}

/// One command invocation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInvoke {
    /// Invoke id, unique per request.
    pub id: String,
    /// Command name (a capability, e.g. "system.run").
    pub command: String,
    /// Command parameters.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Timeout in milliseconds.
    #[serde(default = "default_invoke_timeout_ms")]
    pub timeout_ms: u64,
    /// Optional idempotency key.
    #[serde(default)]
    pub idempotency_key: String,
}

fn default_invoke_timeout_ms() -> u64 {
    30_000
}

impl NodeInvoke {
    /// Create an invoke with a fresh id.
    pub fn new(command: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            command: command.into(),
            params,
            timeout_ms: default_invoke_timeout_ms(),
            idempotency_key: String::new(),
        }
    }

    /// Set the timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

/// Result of a command invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeInvokeResult {
    /// Id of the invoke this answers.
    pub invoke_id: String,
    /// Whether the command succeeded.
    pub success: bool,
    /// Result payload (command-specific).
    #[serde(default)]
    pub result: serde_json::Value,
    /// Error message on failure.
    #[serde(default)]
    pub error: String,
    /// Machine-readable error code (see [`error_code`]).
    #[serde(default)]
    pub error_code: String,
    /// Execution duration in milliseconds.
    #[serde(default)]
    pub duration_ms: f64,
}

impl NodeInvokeResult {
    /// Build a failure result with a coded error.
    pub fn failure(
        invoke_id: impl Into<String>,
        error: impl Into<String>,
        code: &str,
    ) -> Self {
        Self {
            invoke_id: invoke_id.into(),
            success: false,
            result: serde_json::Value::Null,
            error: error.into(),
            error_code: code.to_string(),
            duration_ms: 0.0,
        }
    }
}

/// A frame on the node socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeMessage {
    /// Frame type tag.
    #[serde(rename = "type")]
    pub message_type: NodeMessageType,
    /// Sending/target node id.
    #[serde(default)]
    pub node_id: String,
    /// Unique frame id.
    #[serde(default)]
    pub message_id: String,
    /// When the frame was created.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Type-specific payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl NodeMessage {
    /// Create a frame with a fresh message id.
    pub fn new(
        message_type: NodeMessageType,
        node_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            message_type,
            node_id: node_id.into(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// CONNECT frame sent by a host on socket open.
    pub fn connect(
        node_id: &str,
        display_name: &str,
        capabilities: &[NodeCapability],
        platform: &str,
        hostname: &str,
        token: &str,
    ) -> Self {
        Self::new(
            NodeMessageType::Connect,
            node_id,
            serde_json::json!({
                "display_name": display_name,
                "capabilities": capabilities,
                "platform": platform,
                "hostname": hostname,
                "token": token,
            }),
        )
    }

    /// CONNECT_ACK frame; `paired=false` means connected pending approval.
    pub fn connect_ack(node_id: &str, paired: bool) -> Self {
        Self::new(
            NodeMessageType::ConnectAck,
            node_id,
            serde_json::json!({ "paired": paired }),
        )
    }

    /// CONNECT_REJECT frame with a reason.
    pub fn connect_reject(node_id: &str, reason: &str) -> Self {
        Self::new(
            NodeMessageType::ConnectReject,
            node_id,
            serde_json::json!({ "reason": reason }),
        )
    }

    /// DISCONNECT frame.
    pub fn disconnect(node_id: &str) -> Self {
        Self::new(NodeMessageType::Disconnect, node_id, serde_json::Value::Null)
    }

    /// Keepalive PING.
    pub fn ping(node_id: &str) -> Self {
        Self::new(NodeMessageType::Ping, node_id, serde_json::Value::Null)
    }

    /// Keepalive PONG.
    pub fn pong(node_id: &str) -> Self {
        Self::new(NodeMessageType::Pong, node_id, serde_json::Value::Null)
    }

    /// INVOKE frame carrying a [`NodeInvoke`] payload.
    pub fn invoke(node_id: &str, invoke: &NodeInvoke) -> Self {
        Self::new(
            NodeMessageType::Invoke,
            node_id,
            serde_json::to_value(invoke).unwrap_or(serde_json::Value::Null),
        )
    }

    /// INVOKE_RESULT frame carrying a [`NodeInvokeResult`] payload.
    pub fn invoke_result(node_id: &str, result: &NodeInvokeResult) -> Self {
        Self::new(
            NodeMessageType::InvokeResult,
            node_id,
            serde_json::to_value(result).unwrap_or(serde_json::Value::Null),
        )
    }
}

/// Standard error codes for node operations.
pub mod error_code {
    pub const PERMISSION_DENIED: &str = "PERMISSION_DENIED";
    pub const COMMAND_NOT_FOUND: &str = "COMMAND_NOT_FOUND";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const NODE_UNAVAILABLE: &str = "NODE_UNAVAILABLE";
    pub const NODE_NOT_PAIRED: &str = "NODE_NOT_PAIRED";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const CAPABILITY_NOT_SUPPORTED: &str = "CAPABILITY_NOT_SUPPORTED";
    pub const EXEC_APPROVAL_REQUIRED: &str = "EXEC_APPROVAL_REQUIRED";
    pub const EXEC_DENIED: &str = "EXEC_DENIED";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_tags_are_snake_case() {
        let cases = [
            (NodeMessageType::Connect, "\"connect\""),
            (NodeMessageType::ConnectAck, "\"connect_ack\""),
            (NodeMessageType::ConnectReject, "\"connect_reject\""),
            (NodeMessageType::InvokeResult, "\"invoke_result\""),
            (NodeMessageType::Capabilities, "\"capabilities\""),
        ];
        for (t, expected) in cases {
            assert_eq!(serde_json::to_string(&t).unwrap(), expected);
        }
    }

    #[test]
    fn frame_roundtrip_every_type() {
        let types = [
            NodeMessageType::Connect,
            NodeMessageType::ConnectAck,
            NodeMessageType::ConnectReject,
            NodeMessageType::Disconnect,
            NodeMessageType::Ping,
            NodeMessageType::Pong,
            NodeMessageType::Invoke,
            NodeMessageType::InvokeResult,
            NodeMessageType::Status,
            NodeMessageType::Capabilities,
        ];
        for t in types {
            let frame = NodeMessage::new(t, "n1", serde_json::json!({"k": 1}));
            let json = serde_json::to_string(&frame).unwrap();
            let back: NodeMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(back, frame);
        }
    }

    #[test]
    fn frame_wire_uses_type_key() {
        let frame = NodeMessage::ping("n1");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ping");
        assert!(json.get("message_type").is_none());
    }

    #[test]
    fn connect_frame_payload() {
        let caps = vec![capability_system_run(), capability_system_which()];
        let frame =
            NodeMessage::connect("n1", "laptop", &caps, "linux", "host-a", "secret");
        assert_eq!(frame.payload["display_name"], "laptop");
        assert_eq!(frame.payload["token"], "secret");
        assert_eq!(frame.payload["capabilities"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn invoke_roundtrip_through_frame() {
        let invoke = NodeInvoke::new(
            "system.run",
            serde_json::json!({"command": "uptime"}),
        )
        .with_timeout_ms(5_000);
        let frame = NodeMessage::invoke("n1", &invoke);
        let back: NodeInvoke = serde_json::from_value(frame.payload).unwrap();
        assert_eq!(back, invoke);
    }

    #[test]
    fn invoke_result_failure_helper() {
        let r = NodeInvokeResult::failure("i1", "offline", error_code::NODE_UNAVAILABLE);
        assert!(!r.success);
        assert_eq!(r.error_code, "NODE_UNAVAILABLE");
    }

    #[test]
    fn invoke_defaults() {
        let json = r#"{"id": "i1", "command": "system.run"}"#;
        let invoke: NodeInvoke = serde_json::from_str(json).unwrap();
        assert_eq!(invoke.timeout_ms, 30_000);
        assert!(invoke.idempotency_key.is_empty());
    }

    #[test]
    fn node_info_capability_lookup() {
        let mut info = NodeInfo::pending("n1", "laptop");
        info.capabilities.push(capability_system_run());
        assert!(info.has_capability("system.run"));
        assert!(!info.has_capability("system.notify"));
    }

    #[test]
    fn node_status_serde() {
        assert_eq!(
            serde_json::to_string(&NodeStatus::Pending).unwrap(),
            "\"pending\""
        );
        let s: NodeStatus = serde_json::from_str("\"disconnected\"").unwrap();
        assert_eq!(s, NodeStatus::Disconnected);
    }
}
