//! OpenAI-compatible HTTP provider.
//!
//! Works against any endpoint speaking the chat completions protocol
//! (OpenAI, OpenRouter, vLLM, LiteLLM proxies, …).

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use hivegate_types::provider::StreamEvent;

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::sse::SseAccumulator;
use crate::types::{WireRequest, WireResponse};

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Display name for logs.
    pub name: String,
    /// Base URL, e.g. `https://api.openai.com/v1`.
    pub api_base: String,
    /// Bearer token.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ProviderConfig {
    /// Create a config with the default timeout.
    pub fn new(
        name: impl Into<String>,
        api_base: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            api_base: api_base.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Provider implementation over `reqwest`.
pub struct OpenAiCompatProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a provider from a config.
    pub fn new(config: ProviderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }

    /// Map a non-success status to a typed error.
    fn status_error(status: u16, body: String, model: &str) -> ProviderError {
        match status {
            401 | 403 => ProviderError::AuthFailed(body),
            404 => ProviderError::ModelNotFound(model.to_string()),
            429 => {
                // Honor Retry-After when present in the body; default 1s.
                ProviderError::RateLimited { retry_after_ms: 1_000 }
            }
            _ => ProviderError::ServerError { status, body },
        }
    }

    async fn send(&self, request: &WireRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(500).collect();
            warn!(
                provider = %self.config.name,
                status = status.as_u16(),
                "provider returned error status"
            );
            return Err(Self::status_error(
                status.as_u16(),
                truncated,
                &request.model,
            ));
        }
        Ok(response)
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &WireRequest) -> Result<WireResponse> {
        debug!(
            provider = %self.config.name,
            model = %request.model,
            messages = request.messages.len(),
            "sending chat completion"
        );
        let response = self.send(request).await?;
        let wire: WireResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("response decode failed: {e}"))
        })?;
        if wire.choices.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "response contained no choices".into(),
            ));
        }
        Ok(wire)
    }

    async fn complete_stream(
        &self,
        request: &WireRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let mut streaming_request = request.clone();
        streaming_request.stream = Some(true);

        let response = self.send(&streaming_request).await?;
        let mut accumulator = SseAccumulator::new();
        let mut body = response.bytes_stream();

        use futures_util::StreamExt;
        let mut buffer = String::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(ProviderError::Http)?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // Process complete lines; keep the partial tail in the buffer.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim_end_matches('\r').to_string();
                buffer.drain(..=newline);
                for event in accumulator.push_line(&line)? {
                    if tx.send(event).await.is_err() {
                        debug!("stream receiver dropped, cancelling");
                        return Ok(());
                    }
                }
            }
        }

        for event in accumulator.finish() {
            if tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}
