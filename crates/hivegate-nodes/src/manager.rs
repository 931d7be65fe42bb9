//! Gateway-side node manager.
//!
//! Owns the persistent node registry (`nodes.json`), the live socket
//! connections, and the pending-invoke table. A node's lifecycle:
//! `pending` on first connect, `paired` after operator (or auto)
//! approval, `connected` while a socket is up, back to `paired` when it
//! drops. Pending invokes are oneshot futures keyed by invoke id,
//! resolved by `invoke_result` frames and cancelled on disconnect.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use hivegate_types::node::{
    NodeCapability, NodeInfo, NodeInvoke, NodeInvokeResult, NodeMessage,
    NodeMessageType, NodeStatus, error_code,
};
use hivegate_types::Result;

/// Compare two secrets without early exit on the first mismatch.
fn timing_safe_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= (x ^ y) as usize;
    }
    diff == 0
}

type PendingInvokes = Arc<Mutex<HashMap<String, oneshot::Sender<NodeInvokeResult>>>>;

/// A live connection: a frame sender plus its pending-invoke table.
struct Connection {
    outbound: mpsc::Sender<NodeMessage>,
    pending: PendingInvokes,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryFile {
    nodes: Vec<NodeInfo>,
    updated_at: chrono::DateTime<Utc>,
}

/// Manages nodes connected to the gateway.
pub struct NodeManager {
    storage_path: Option<PathBuf>,
    auth_token: String,
    auto_approve: bool,
    ping_interval: Duration,
    nodes: Mutex<HashMap<String, NodeInfo>>,
    connections: Mutex<HashMap<String, Connection>>,
}

impl NodeManager {
    /// In-memory manager (tests).
    pub fn new(auth_token: impl Into<String>, auto_approve: bool) -> Self {
        Self {
            storage_path: None,
            auth_token: auth_token.into(),
            auto_approve,
            ping_interval: Duration::from_secs(30),
            nodes: Mutex::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Manager with a persistent registry. A node loaded as `connected`
    /// is demoted to `paired`: connections never survive a restart.
    pub fn with_storage(
        auth_token: impl Into<String>,
        auto_approve: bool,
        path: impl Into<PathBuf>,
    ) -> Self {
        let path = path.into();
        let mut nodes = HashMap::new();
        if let Ok(content) = std::fs::read_to_string(&path) {
            match serde_json::from_str::<RegistryFile>(&content) {
                Ok(file) => {
                    for mut node in file.nodes {
                        if node.status == NodeStatus::Connected {
                            node.status = NodeStatus::Paired;
                        }
                        nodes.insert(node.id.clone(), node);
                    }
                    info!(nodes = nodes.len(), "loaded node registry");
                }
                Err(e) => warn!(error = %e, "node registry unreadable, starting fresh"),
            }
        }
        Self {
            storage_path: Some(path),
            auth_token: auth_token.into(),
            auto_approve,
            ping_interval: Duration::from_secs(30),
            nodes: Mutex::new(nodes),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Keepalive interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    async fn save_registry(&self) {
        let Some(path) = &self.storage_path else { return };
        let file = RegistryFile {
            nodes: self.nodes.lock().await.values().cloned().collect(),
            updated_at: Utc::now(),
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!(error = %e, "failed to save node registry");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize node registry"),
        }
    }

    /// Accept loop: bind and serve node sockets until the listener
    /// errors. Spawns one task per connection plus the ping loop.
    pub async fn listen(self: Arc<Self>, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr, "node manager listening");

        let pinger = self.clone();
        tokio::spawn(async move { pinger.ping_loop().await });

        loop {
            let (stream, peer) = listener.accept().await?;
            let manager = self.clone();
            tokio::spawn(async move {
                match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => manager.handle_socket(ws, peer.ip().to_string()).await,
                    Err(e) => warn!(error = %e, "websocket handshake failed"),
                }
            });
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.ping_interval).await;
            let connections = self.connections.lock().await;
            for (node_id, connection) in connections.iter() {
                if connection
                    .outbound
                    .send(NodeMessage::ping(node_id))
                    .await
                    .is_err()
                {
                    debug!(node = %node_id, "ping channel closed");
                }
            }
        }
    }

    /// Drive one node socket: handshake, then the frame loop.
    pub async fn handle_socket<S>(
        self: Arc<Self>,
        ws: WebSocketStream<S>,
        ip_address: String,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<NodeMessage>(64);

        // Writer task: serialize frames onto the socket.
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let Ok(json) = serde_json::to_string(&frame) else {
                    continue;
                };
                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let mut node_id: Option<String> = None;

        while let Some(message) = stream.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    debug!(error = %e, "socket error");
                    break;
                }
            };
            let frame: NodeMessage = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "invalid frame from node");
                    continue;
                }
            };

            match frame.message_type {
                NodeMessageType::Connect => {
                    match self
                        .handle_connect(&frame, &ip_address, outbound_tx.clone())
                        .await
                    {
                        Some(id) => node_id = Some(id),
                        None => break,
                    }
                }
                NodeMessageType::Pong => {
                    if let Some(id) = &node_id {
                        let mut nodes = self.nodes.lock().await;
                        if let Some(node) = nodes.get_mut(id) {
                            node.last_seen = Some(Utc::now());
                        }
                    }
                }
                NodeMessageType::InvokeResult => {
                    if let Some(id) = &node_id {
                        self.handle_invoke_result(id, &frame.payload).await;
                    }
                }
                NodeMessageType::Capabilities => {
                    if let Some(id) = &node_id {
                        let capabilities: Vec<NodeCapability> = frame
                            .payload
                            .get("capabilities")
                            .and_then(|v| serde_json::from_value(v.clone()).ok())
                            .unwrap_or_default();
                        let mut nodes = self.nodes.lock().await;
                        if let Some(node) = nodes.get_mut(id) {
                            node.capabilities = capabilities;
                        }
                        drop(nodes);
                        self.save_registry().await;
                    }
                }
                NodeMessageType::Disconnect => break,
                _ => {}
            }
        }

        if let Some(id) = node_id {
            self.disconnect_node(&id).await;
        }
        writer.abort();
    }

    /// Handshake: verify the token, upsert the registry record, decide
    /// pending vs paired, and register the connection.
    async fn handle_connect(
        &self,
        frame: &NodeMessage,
        ip_address: &str,
        outbound: mpsc::Sender<NodeMessage>,
    ) -> Option<String> {
        let node_id = frame.node_id.clone();
        let token = frame
            .payload
            .get("token")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        if !self.auth_token.is_empty() && !timing_safe_eq(token, &self.auth_token) {
            warn!(node = %node_id, "node rejected: invalid token");
            let _ = outbound
                .send(NodeMessage::connect_reject(
                    &node_id,
                    "invalid authentication token",
                ))
                .await;
            return None;
        }

        let short_id: String = node_id.chars().take(8).collect();
        let display_name = frame
            .payload
            .get("display_name")
            .and_then(|v| v.as_str())
            .unwrap_or(&short_id)
            .to_string();
        let capabilities: Vec<NodeCapability> = frame
            .payload
            .get("capabilities")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        let paired = {
            let mut nodes = self.nodes.lock().await;
            let node = nodes
                .entry(node_id.clone())
                .or_insert_with(|| NodeInfo::pending(&node_id, &display_name));

            node.ip_address = ip_address.to_string();
            node.hostname = frame
                .payload
                .get("hostname")
                .and_then(|v| v.as_str())
                .unwrap_or(&node.hostname)
                .to_string();
            node.platform = frame
                .payload
                .get("platform")
                .and_then(|v| v.as_str())
                .unwrap_or(&node.platform)
                .to_string();
            node.capabilities = capabilities;
            node.last_seen = Some(Utc::now());

            if node.paired_at.is_none() && self.auto_approve {
                node.paired_at = Some(Utc::now());
                info!(node = %node_id, "node auto-approved");
            }
            node.status = NodeStatus::Connected;
            node.paired_at.is_some()
        };

        self.connections.lock().await.insert(
            node_id.clone(),
            Connection {
                outbound: outbound.clone(),
                pending: Arc::new(Mutex::new(HashMap::new())),
            },
        );
        self.save_registry().await;

        let _ = outbound
            .send(NodeMessage::connect_ack(&node_id, paired))
            .await;
        info!(
            node = %node_id,
            paired,
            "node connected{}",
            if paired { "" } else { " (pending approval)" }
        );
        Some(node_id)
    }

    async fn handle_invoke_result(&self, node_id: &str, payload: &serde_json::Value) {
        let Ok(result) = serde_json::from_value::<NodeInvokeResult>(payload.clone())
        else {
            warn!(node = %node_id, "malformed invoke_result payload");
            return;
        };
        let connections = self.connections.lock().await;
        if let Some(connection) = connections.get(node_id) {
            let mut pending = connection.pending.lock().await;
            if let Some(waiter) = pending.remove(&result.invoke_id) {
                let _ = waiter.send(result);
            }
        }
    }

    /// Tear down a connection: cancel its pending invokes and demote the
    /// node to `paired` (or `disconnected` when it never paired).
    pub async fn disconnect_node(&self, node_id: &str) {
        if let Some(connection) = self.connections.lock().await.remove(node_id) {
            let mut pending = connection.pending.lock().await;
            for (invoke_id, waiter) in pending.drain() {
                let _ = waiter.send(NodeInvokeResult::failure(
                    &invoke_id,
                    "node disconnected during invoke",
                    error_code::NODE_UNAVAILABLE,
                ));
            }
        }

        let mut nodes = self.nodes.lock().await;
        if let Some(node) = nodes.get_mut(node_id) {
            node.status = if node.paired_at.is_some() {
                NodeStatus::Paired
            } else {
                NodeStatus::Disconnected
            };
            node.last_seen = Some(Utc::now());
        }
        drop(nodes);
        self.save_registry().await;
        info!(node = %node_id, "node disconnected");
    }

    /// Operator approval of a pending node. The node is notified when
    /// connected.
    pub async fn approve(&self, node_id: &str) -> bool {
        let approved = {
            let mut nodes = self.nodes.lock().await;
            match nodes.get_mut(node_id) {
                Some(node) if node.paired_at.is_none() => {
                    node.paired_at = Some(Utc::now());
                    if node.status == NodeStatus::Pending
                        || node.status == NodeStatus::Disconnected
                    {
                        node.status = NodeStatus::Paired;
                    }
                    true
                }
                _ => false,
            }
        };
        if !approved {
            return false;
        }

        if let Some(connection) = self.connections.lock().await.get(node_id) {
            let _ = connection
                .outbound
                .send(NodeMessage::connect_ack(node_id, true))
                .await;
        }
        self.save_registry().await;
        info!(node = %node_id, "node approved");
        true
    }

    /// Operator rejection: notify, disconnect, and remove from the
    /// registry.
    pub async fn reject(&self, node_id: &str, reason: &str) -> bool {
        let existed = self.nodes.lock().await.contains_key(node_id);
        if !existed {
            return false;
        }
        if let Some(connection) = self.connections.lock().await.get(node_id) {
            let _ = connection
                .outbound
                .send(NodeMessage::connect_reject(node_id, reason))
                .await;
        }
        self.disconnect_node(node_id).await;
        self.nodes.lock().await.remove(node_id);
        self.save_registry().await;
        info!(node = %node_id, reason, "node rejected");
        true
    }

    /// Invoke a capability on a node and wait for the correlated result.
    pub async fn invoke(
        &self,
        node_id: &str,
        command: &str,
        params: serde_json::Value,
        timeout_ms: u64,
    ) -> NodeInvokeResult {
        let node = self.nodes.lock().await.get(node_id).cloned();
        let Some(node) = node else {
            return NodeInvokeResult::failure(
                "",
                format!("node {node_id} not found"),
                error_code::NODE_UNAVAILABLE,
            );
        };
        if node.paired_at.is_none() {
            return NodeInvokeResult::failure(
                "",
                format!("node {node_id} is not paired"),
                error_code::NODE_NOT_PAIRED,
            );
        }
        if !node.has_capability(command) {
            return NodeInvokeResult::failure(
                "",
                format!("node {node_id} does not support {command}"),
                error_code::CAPABILITY_NOT_SUPPORTED,
            );
        }

        let invoke = NodeInvoke::new(command, params).with_timeout_ms(timeout_ms);
        let invoke_id = invoke.id.clone();

        let (result_tx, result_rx) = oneshot::channel();
        let pending = {
            let connections = self.connections.lock().await;
            let Some(connection) = connections.get(node_id) else {
                return NodeInvokeResult::failure(
                    &invoke_id,
                    format!("node {node_id} is not connected"),
                    error_code::NODE_UNAVAILABLE,
                );
            };
            connection
                .pending
                .lock()
                .await
                .insert(invoke_id.clone(), result_tx);
            if connection
                .outbound
                .send(NodeMessage::invoke(node_id, &invoke))
                .await
                .is_err()
            {
                connection.pending.lock().await.remove(&invoke_id);
                return NodeInvokeResult::failure(
                    &invoke_id,
                    "connection closed before invoke was sent",
                    error_code::NODE_UNAVAILABLE,
                );
            }
            connection.pending.clone()
        };

        match tokio::time::timeout(Duration::from_millis(timeout_ms), result_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => NodeInvokeResult::failure(
                &invoke_id,
                "invoke cancelled",
                error_code::NODE_UNAVAILABLE,
            ),
            Err(_) => {
                pending.lock().await.remove(&invoke_id);
                NodeInvokeResult::failure(
                    &invoke_id,
                    format!("invoke timed out after {timeout_ms}ms"),
                    error_code::TIMEOUT,
                )
            }
        }
    }

    /// Look up a node by id.
    pub async fn get_node(&self, node_id: &str) -> Option<NodeInfo> {
        self.nodes.lock().await.get(node_id).cloned()
    }

    /// Look up a node by display name.
    pub async fn get_node_by_name(&self, name: &str) -> Option<NodeInfo> {
        self.nodes
            .lock()
            .await
            .values()
            .find(|n| n.display_name == name)
            .cloned()
    }

    /// List nodes, optionally filtered by status.
    pub async fn list(&self, status: Option<NodeStatus>) -> Vec<NodeInfo> {
        let nodes = self.nodes.lock().await;
        let mut rows: Vec<NodeInfo> = nodes
            .values()
            .filter(|n| status.map(|s| n.status == s).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// True when the node has a live socket.
    pub async fn is_connected(&self, node_id: &str) -> bool {
        self.connections.lock().await.contains_key(node_id)
    }

    /// The first connected and paired node.
    pub async fn default_node(&self) -> Option<NodeInfo> {
        let connections = self.connections.lock().await;
        let nodes = self.nodes.lock().await;
        connections
            .keys()
            .filter_map(|id| nodes.get(id))
            .find(|n| n.paired_at.is_some())
            .cloned()
    }

    /// Test/diagnostic hook: register a raw connection for a node.
    #[doc(hidden)]
    pub async fn register_connection(
        &self,
        node_id: &str,
        outbound: mpsc::Sender<NodeMessage>,
    ) {
        self.connections.lock().await.insert(
            node_id.to_string(),
            Connection {
                outbound,
                pending: Arc::new(Mutex::new(HashMap::new())),
            },
        );
    }

    /// Test/diagnostic hook: resolve a pending invoke by id.
    #[doc(hidden)]
    pub async fn resolve_invoke(&self, node_id: &str, result: NodeInvokeResult) {
        self.handle_invoke_result(node_id, &serde_json::to_value(&result).unwrap())
            .await;
    }

    /// Upsert a registry record directly (pairing bootstrap, tests).
    pub async fn upsert_node(&self, node: NodeInfo) {
        self.nodes.lock().await.insert(node.id.clone(), node);
        self.save_registry().await;
    }
}

impl std::fmt::Debug for NodeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeManager")
            .field("auto_approve", &self.auto_approve)
            .finish()
    }
}
