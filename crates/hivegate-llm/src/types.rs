//! OpenAI-compatible wire types.
//!
//! These mirror the chat completion request/response format most hosted
//! providers accept. Conversion to the transport-agnostic shapes in
//! `hivegate-types` happens in [`client`](crate::client).

use serde::{Deserialize, Serialize};

use hivegate_types::provider::ChatMessage;

/// A chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct WireRequest {
    /// Model identifier.
    pub model: String,

    /// Conversation messages.
    pub messages: Vec<ChatMessage>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Tool definitions in function-calling shape.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

/// A chat completion response.
#[derive(Debug, Clone, Deserialize)]
pub struct WireResponse {
    #[serde(default)]
    pub id: String,
    pub choices: Vec<WireChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
    #[serde(default)]
    pub model: String,
}

/// One completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct WireChoice {
    #[serde(default)]
    pub index: u32,
    pub message: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The assistant message inside a choice.
#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    #[serde(default)]
    pub role: String,
    /// Content may be null when the model only calls tools.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

/// A tool call in a response.
#[derive(Debug, Clone, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    pub call_type: String,
    pub function: WireFunction,
}

/// Function name plus arguments.
///
/// Arguments are usually a serialized JSON string, but some providers
/// hand back an object; accept either.
#[derive(Debug, Clone, Deserialize)]
pub struct WireFunction {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Token usage in a response.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct WireUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

// ── Streaming deltas ────────────────────────────────────────────────────

/// One `data:` line of a streamed completion.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub choices: Vec<StreamDeltaChoice>,
    #[serde(default)]
    pub usage: Option<WireUsage>,
}

/// A choice within a streaming delta.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamDeltaChoice {
    #[serde(default)]
    pub delta: StreamDeltaContent,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Partial content within a streaming choice.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDeltaContent {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<StreamDeltaToolCall>>,
}

/// A partial tool call keyed by array index.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamDeltaToolCall {
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<StreamDeltaFunction>,
}

/// Partial function info within a tool-call delta.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamDeltaFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}
