//! Provider-facing chat types.
//!
//! These are the shapes the agent loop and its collaborators exchange with
//! the provider abstraction: conversation messages, the normalized
//! response, and the streaming chunk union. The OpenAI wire format lives
//! in `hivegate-llm`; this module is transport-agnostic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A message in a chat conversation.
///
/// Role is one of `system`, `user`, `assistant`, `tool`. Assistant
/// messages may carry tool-call stubs; tool messages answer exactly one
/// of those stubs by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Author role.
    pub role: String,

    /// Text content.
    pub content: String,

    /// For tool messages: the id of the call this answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// For tool messages: the tool name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// For assistant messages: tool calls requested by the model, in the
    /// provider wire shape (`{id, type, function: {name, arguments}}`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<serde_json::Value>>,
}

impl ChatMessage {
    /// Create a plain message with role and content.
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    /// Create a tool-result message answering `call_id`.
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: "tool".into(),
            content: content.into(),
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            tool_calls: None,
        }
    }
}

/// A tool call extracted from a provider response, with arguments already
/// parsed into a JSON map.
///
/// Providers return arguments either as a serialized string or as an
/// object; the abstraction always delivers a map. When the raw string is
/// not valid JSON it is wrapped as `{"raw": <original>}` so validation can
/// fail cleanly instead of the parse being lost.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    /// Stable id, unique within one provider response.
    pub id: String,

    /// Tool name.
    pub name: String,

    /// Parsed argument map.
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    /// Parse provider-supplied arguments best-effort.
    ///
    /// Accepts an object as-is, parses a string if it holds valid JSON,
    /// and otherwise wraps the original under `{"raw": …}`.
    pub fn parse_arguments(raw: &serde_json::Value) -> serde_json::Value {
        match raw {
            serde_json::Value::Object(_) => raw.clone(),
            serde_json::Value::String(s) => match serde_json::from_str(s) {
                Ok(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
                _ => serde_json::json!({ "raw": s }),
            },
            other => serde_json::json!({ "raw": other }),
        }
    }

    /// The wire shape of this call for an assistant message
    /// (`{id, type: "function", function: {name, arguments}}`).
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "type": "function",
            "function": {
                "name": self.name,
                "arguments": serde_json::to_string(&self.arguments)
                    .unwrap_or_else(|_| "{}".into()),
            }
        })
    }
}

/// Token usage counters, accumulated across fallback attempts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    /// Tokens in the prompt.
    pub prompt_tokens: u64,
    /// Tokens in the completion.
    pub completion_tokens: u64,
    /// Total tokens.
    pub total_tokens: u64,
}

impl Usage {
    /// Add another usage record into this one.
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// The normalized response from a chat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Assistant text content (may be empty when only tools were called).
    pub content: String,

    /// Tool calls requested by the model.
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,

    /// Why generation stopped: "stop", "tool_calls", "length", "error".
    pub finish_reason: String,

    /// Token usage for the call, including failed fallback attempts.
    #[serde(default)]
    pub usage: Usage,

    /// The model that actually produced the response (after fallbacks).
    #[serde(default)]
    pub model: String,
}

impl LlmResponse {
    /// True if the model asked for at least one tool call.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Build an error response carrying the last failure in `content`.
    pub fn error(message: impl Into<String>, usage: Usage) -> Self {
        Self {
            content: message.into(),
            tool_calls: Vec::new(),
            finish_reason: "error".into(),
            usage,
            model: String::new(),
        }
    }
}

/// A chunk of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text.
    Text(String),

    /// A fully assembled tool call (emitted before [`StreamEvent::Done`]).
    ToolCall(ToolInvocation),

    /// Terminal chunk with the finish reason and usage, when known.
    Done {
        /// Finish reason from the final delta.
        finish_reason: Option<String>,
        /// Usage counters if the provider reported them.
        usage: Option<Usage>,
    },
}

/// Per-call generation options passed through to the provider.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Maximum tokens to generate.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: Option<f64>,
    /// Tool definitions in OpenAI function-calling shape.
    pub tools: Vec<serde_json::Value>,
    /// Extra provider metadata (unused by the core, forwarded verbatim).
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_helpers() {
        let sys = ChatMessage::system("be brief");
        assert_eq!(sys.role, "system");
        let tool = ChatMessage::tool_result("c1", "exec", "ok");
        assert_eq!(tool.role, "tool");
        assert_eq!(tool.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool.name.as_deref(), Some("exec"));
    }

    #[test]
    fn message_skips_absent_fields() {
        let json = serde_json::to_string(&ChatMessage::user("hi")).unwrap();
        assert!(!json.contains("tool_call_id"));
        assert!(!json.contains("tool_calls"));
    }

    #[test]
    fn parse_arguments_object_passthrough() {
        let raw = serde_json::json!({"command": "ls"});
        assert_eq!(ToolInvocation::parse_arguments(&raw), raw);
    }

    #[test]
    fn parse_arguments_string_parses() {
        let raw = serde_json::json!(r#"{"command": "ls /tmp"}"#);
        let parsed = ToolInvocation::parse_arguments(&raw);
        assert_eq!(parsed["command"], "ls /tmp");
    }

    #[test]
    fn parse_arguments_malformed_wraps_raw() {
        let raw = serde_json::json!("{not json");
        let parsed = ToolInvocation::parse_arguments(&raw);
        assert_eq!(parsed["raw"], "{not json");
    }

    #[test]
    fn parse_arguments_json_scalar_wraps_raw() {
        // A string holding valid-but-non-object JSON is still not an
        // argument map.
        let raw = serde_json::json!("42");
        let parsed = ToolInvocation::parse_arguments(&raw);
        assert_eq!(parsed["raw"], "42");
    }

    #[test]
    fn invocation_wire_shape() {
        let inv = ToolInvocation {
            id: "call-1".into(),
            name: "exec".into(),
            arguments: serde_json::json!({"command": "pwd"}),
        };
        let wire = inv.to_wire();
        assert_eq!(wire["type"], "function");
        assert_eq!(wire["function"]["name"], "exec");
        // Arguments must be a serialized string on the wire.
        assert!(wire["function"]["arguments"].is_string());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.accumulate(&Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        });
        total.accumulate(&Usage {
            prompt_tokens: 7,
            completion_tokens: 3,
            total_tokens: 10,
        });
        assert_eq!(total.total_tokens, 25);
    }

    #[test]
    fn error_response_shape() {
        let resp = LlmResponse::error("all models failed", Usage::default());
        assert_eq!(resp.finish_reason, "error");
        assert!(!resp.has_tool_calls());
        assert_eq!(resp.content, "all models failed");
    }
}
