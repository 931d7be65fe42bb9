//! The model-level chat client.
//!
//! [`ChatClient`] is the surface the agent loop calls. It owns a single
//! transport [`Provider`], a table of per-model fallback chains, and a
//! [`HealthRegistry`]. A call for model `M` walks `[M, fallback1, …]`,
//! skipping models in cooldown; the first success resets that model's
//! health; a chain where every member fails produces a response with
//! `finish_reason = "error"` rather than an `Err`, so the loop can always
//! surface something to the user.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use hivegate_types::provider::{
    ChatMessage, ChatOptions, LlmResponse, StreamEvent, ToolInvocation, Usage,
};

use crate::error::{ProviderError, Result};
use crate::health::HealthRegistry;
use crate::provider::Provider;
use crate::types::{WireRequest, WireResponse};

/// Chat client with per-model health and fallback chains.
pub struct ChatClient {
    provider: Arc<dyn Provider>,
    health: Arc<HealthRegistry>,
    fallbacks: HashMap<String, Vec<String>>,
}

impl ChatClient {
    /// Create a client over a transport provider.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            health: Arc::new(HealthRegistry::new()),
            fallbacks: HashMap::new(),
        }
    }

    /// Use a shared health registry (the router reads the same one).
    pub fn with_health(mut self, health: Arc<HealthRegistry>) -> Self {
        self.health = health;
        self
    }

    /// Declare the fallback chain for a model.
    pub fn with_fallbacks(
        mut self,
        model: impl Into<String>,
        fallbacks: Vec<String>,
    ) -> Self {
        self.fallbacks.insert(model.into(), fallbacks);
        self
    }

    /// The health registry backing this client.
    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    /// The ordered chain for a model: the model itself plus fallbacks.
    fn chain(&self, model: &str) -> Vec<String> {
        let mut chain = vec![model.to_string()];
        if let Some(fallbacks) = self.fallbacks.get(model) {
            chain.extend(fallbacks.iter().cloned());
        }
        chain
    }

    fn build_request(
        model: &str,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> WireRequest {
        WireRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tools: options.tools.clone(),
            stream: None,
        }
    }

    /// Execute a chat call against the first available member of the
    /// model's fallback chain.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
    ) -> LlmResponse {
        let mut usage = Usage::default();
        let mut attempts: Vec<String> = Vec::new();

        for candidate in self.chain(model) {
            if !self.health.is_available(&candidate) {
                debug!(model = %candidate, "skipping model in cooldown");
                attempts.push(format!("{candidate}: skipped (cooldown)"));
                continue;
            }

            let request = Self::build_request(&candidate, messages, options);
            match self.provider.complete(&request).await {
                Ok(wire) => {
                    self.health.mark_success(&candidate);
                    let mut response = convert_response(wire, &candidate);
                    usage.accumulate(&response.usage);
                    response.usage = usage;
                    return response;
                }
                Err(err) => {
                    warn!(
                        model = %candidate,
                        error = %err,
                        "model failed, trying next in chain"
                    );
                    self.health.mark_failure(&candidate, &err.to_string());
                    attempts.push(format!("{candidate}: {err}"));
                }
            }
        }

        LlmResponse::error(
            format!("all models failed: {}", attempts.join("; ")),
            usage,
        )
    }

    /// Streaming variant. Walks the chain like [`chat`](Self::chat); a
    /// model that fails before producing any chunk fails over silently,
    /// buffering its chunks until success is certain so a consumer never
    /// sees partial output from a failed attempt.
    pub async fn chat_stream(
        &self,
        messages: &[ChatMessage],
        model: &str,
        options: &ChatOptions,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let mut attempts: Vec<String> = Vec::new();

        for candidate in self.chain(model) {
            if !self.health.is_available(&candidate) {
                attempts.push(format!("{candidate}: skipped (cooldown)"));
                continue;
            }

            let request = Self::build_request(&candidate, messages, options);
            let (attempt_tx, mut attempt_rx) = mpsc::channel::<StreamEvent>(256);

            match self.provider.complete_stream(&request, attempt_tx).await {
                Ok(()) => {
                    self.health.mark_success(&candidate);
                    while let Some(event) = attempt_rx.recv().await {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    return Ok(());
                }
                Err(err) => {
                    self.health.mark_failure(&candidate, &err.to_string());
                    attempts.push(format!("{candidate}: {err}"));
                }
            }
        }

        Err(ProviderError::AllModelsExhausted { attempts })
    }
}

/// Normalize a wire response.
fn convert_response(wire: WireResponse, model: &str) -> LlmResponse {
    let usage = wire
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    let Some(choice) = wire.choices.into_iter().next() else {
        return LlmResponse::error("response contained no choices", usage);
    };

    let tool_calls: Vec<ToolInvocation> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolInvocation {
            arguments: ToolInvocation::parse_arguments(&call.function.arguments),
            id: call.id,
            name: call.function.name,
        })
        .collect();

    let finish_reason = choice.finish_reason.unwrap_or_else(|| {
        if tool_calls.is_empty() { "stop" } else { "tool_calls" }.to_string()
    });

    LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        finish_reason,
        usage,
        model: model.to_string(),
    }
}
