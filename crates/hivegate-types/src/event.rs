//! Bus envelope types.
//!
//! [`InboundEnvelope`] is what a channel adapter publishes when a user
//! message arrives; [`OutboundEnvelope`] is what the agent loop emits in
//! reply. The pair `(fabric, conversation)` identifies a session.
//!
//! Messages originated by the system itself (cron fires, subagent
//! announcements) use the reserved fabric [`SYSTEM_FABRIC`] and encode the
//! real delivery target in the conversation id as
//! `"<origin-fabric>:<origin-conversation>"`, so the loop can route the
//! eventual reply back to where it belongs.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reserved fabric identifier for system-originated envelopes.
pub const SYSTEM_FABRIC: &str = "system";

/// An inbound envelope received from a chat fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEnvelope {
    /// Source fabric (e.g. "whatsapp", "teams", "matrix", "cli").
    pub fabric: String,

    /// Sender identifier within the fabric.
    pub sender: String,

    /// Conversation identifier within the fabric.
    pub conversation: String,

    /// Message text content.
    pub content: String,

    /// When the envelope was created.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Arbitrary fabric-specific metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundEnvelope {
    /// Create an envelope with empty metadata and the current timestamp.
    pub fn new(
        fabric: impl Into<String>,
        sender: impl Into<String>,
        conversation: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            fabric: fabric.into(),
            sender: sender.into(),
            conversation: conversation.into(),
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Create a system envelope whose conversation id encodes the origin.
    pub fn system(
        origin_fabric: impl AsRef<str>,
        origin_conversation: impl AsRef<str>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(
            SYSTEM_FABRIC,
            SYSTEM_FABRIC,
            format!(
                "{}:{}",
                origin_fabric.as_ref(),
                origin_conversation.as_ref()
            ),
            content,
        )
    }

    /// True if this envelope carries the reserved system fabric.
    pub fn is_system(&self) -> bool {
        self.fabric == SYSTEM_FABRIC
    }

    /// The `(fabric, conversation)` pair replies must be routed to.
    ///
    /// For ordinary envelopes this is the envelope's own pair. For system
    /// envelopes the conversation id is split at the first `:` into the
    /// origin fabric and origin conversation; a system envelope with no
    /// separator falls back to the "cli" fabric so the reply is not lost.
    pub fn origin(&self) -> (String, String) {
        if self.is_system() {
            match self.conversation.split_once(':') {
                Some((fabric, conversation)) => {
                    (fabric.to_string(), conversation.to_string())
                }
                None => ("cli".to_string(), self.conversation.clone()),
            }
        } else {
            (self.fabric.clone(), self.conversation.clone())
        }
    }

    /// Stable session key: `"{origin_fabric}:{origin_conversation}"`.
    pub fn session_key(&self) -> String {
        let (fabric, conversation) = self.origin();
        format!("{fabric}:{conversation}")
    }
}

/// An outbound envelope addressed to a chat fabric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    /// Target fabric.
    pub fabric: String,

    /// Target conversation identifier.
    pub conversation: String,

    /// Message text content.
    pub content: String,
}

impl OutboundEnvelope {
    /// Create an outbound envelope.
    pub fn new(
        fabric: impl Into<String>,
        conversation: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            fabric: fabric.into(),
            conversation: conversation.into(),
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_key_from_ordinary_envelope() {
        let env = InboundEnvelope::new("whatsapp", "u1", "chat-9", "hi");
        assert_eq!(env.session_key(), "whatsapp:chat-9");
        assert!(!env.is_system());
    }

    #[test]
    fn system_envelope_encodes_origin() {
        let env = InboundEnvelope::system("teams", "thread-4", "cron fired");
        assert!(env.is_system());
        assert_eq!(env.conversation, "teams:thread-4");
        assert_eq!(env.origin(), ("teams".to_string(), "thread-4".to_string()));
        assert_eq!(env.session_key(), "teams:thread-4");
    }

    #[test]
    fn system_envelope_without_separator_falls_back_to_cli() {
        let mut env = InboundEnvelope::system("teams", "t", "x");
        env.conversation = "orphan".into();
        assert_eq!(env.origin(), ("cli".to_string(), "orphan".to_string()));
    }

    #[test]
    fn origin_preserves_colons_in_conversation() {
        // Conversation ids may themselves contain ':'; only the first one
        // separates the fabric.
        let env = InboundEnvelope::system("matrix", "!room:server.org", "x");
        assert_eq!(
            env.origin(),
            ("matrix".to_string(), "!room:server.org".to_string())
        );
    }

    #[test]
    fn inbound_serde_defaults() {
        let json = r#"{
            "fabric": "cli",
            "sender": "me",
            "conversation": "local",
            "content": "hello"
        }"#;
        let env: InboundEnvelope = serde_json::from_str(json).unwrap();
        assert!(env.metadata.is_empty());
    }

    #[test]
    fn outbound_roundtrip() {
        let out = OutboundEnvelope::new("slack", "C1", "done");
        let json = serde_json::to_string(&out).unwrap();
        let back: OutboundEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.fabric, "slack");
        assert_eq!(back.conversation, "C1");
        assert_eq!(back.content, "done");
    }
}
