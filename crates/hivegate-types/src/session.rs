//! Conversation session type.
//!
//! A [`Session`] holds the ordered turn history for one
//! `(fabric, conversation)` pair. Turns are stored as raw JSON objects so
//! tool-call stubs and tool results survive round-trips unchanged.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ChatMessage;

/// A conversation session, keyed by `"{fabric}:{conversation}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session key.
    pub key: String,

    /// Ordered turn history (append-only).
    #[serde(default)]
    pub turns: Vec<serde_json::Value>,

    /// When the session was created.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the session was last updated.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    /// Arbitrary session metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    /// Create an empty session.
    pub fn new(key: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key: key.into(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Append a turn.
    ///
    /// `tool_calls` attaches assistant tool-call stubs in wire shape;
    /// `tool_call_id` marks a tool-role turn answering that call.
    pub fn append(
        &mut self,
        role: &str,
        content: &str,
        tool_calls: Option<Vec<serde_json::Value>>,
        tool_call_id: Option<&str>,
    ) {
        let mut turn = serde_json::json!({
            "role": role,
            "content": content,
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(obj) = turn.as_object_mut() {
            if let Some(calls) = tool_calls {
                obj.insert("tool_calls".into(), serde_json::Value::Array(calls));
            }
            if let Some(id) = tool_call_id {
                obj.insert("tool_call_id".into(), serde_json::json!(id));
            }
        }
        self.turns.push(turn);
        self.updated_at = Utc::now();
    }

    /// The LLM-shaped message sequence for this session.
    ///
    /// Returns at most `max_turns` entries from the tail, preserving
    /// tool-call stubs and tool-result linkage.
    pub fn history(&self, max_turns: usize) -> Vec<ChatMessage> {
        let start = self.turns.len().saturating_sub(max_turns);
        self.turns[start..]
            .iter()
            .map(|t| ChatMessage {
                role: t
                    .get("role")
                    .and_then(|v| v.as_str())
                    .unwrap_or("user")
                    .to_string(),
                content: t
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                tool_call_id: t
                    .get("tool_call_id")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                name: t.get("name").and_then(|v| v.as_str()).map(String::from),
                tool_calls: t
                    .get("tool_calls")
                    .and_then(|v| v.as_array())
                    .map(|a| a.to_vec()),
            })
            .collect()
    }

    /// Clear all turns.
    pub fn clear(&mut self) {
        self.turns.clear();
        self.updated_at = Utc::now();
    }
}
