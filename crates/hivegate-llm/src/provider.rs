//! The [`Provider`] trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use hivegate_types::provider::StreamEvent;

use crate::error::Result;
use crate::types::{WireRequest, WireResponse};

/// One chat-completion backend.
///
/// Implementations handle transport details for a specific endpoint. The
/// main implementation is [`OpenAiCompatProvider`](crate::openai_compat::OpenAiCompatProvider);
/// tests substitute mocks.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging ("openai", "openrouter", …).
    fn name(&self) -> &str;

    /// Execute a chat completion request.
    async fn complete(&self, request: &WireRequest) -> Result<WireResponse>;

    /// Execute a streaming chat completion, pushing [`StreamEvent`]s into
    /// `tx`. Implementations must emit assembled tool calls before the
    /// terminal [`StreamEvent::Done`]. Dropping the receiver cancels the
    /// stream.
    async fn complete_stream(
        &self,
        request: &WireRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        // Default: run the blocking completion and replay it as a stream.
        let response = self.complete(request).await?;
        let choice = response.choices.into_iter().next();
        let mut finish_reason = None;
        if let Some(choice) = choice {
            finish_reason = choice.finish_reason;
            if let Some(content) = choice.message.content
                && !content.is_empty()
            {
                let _ = tx.send(StreamEvent::Text(content)).await;
            }
            for call in choice.message.tool_calls.unwrap_or_default() {
                let arguments =
                    hivegate_types::provider::ToolInvocation::parse_arguments(
                        &call.function.arguments,
                    );
                let _ = tx
                    .send(StreamEvent::ToolCall(
                        hivegate_types::provider::ToolInvocation {
                            id: call.id,
                            name: call.function.name,
                            arguments,
                        },
                    ))
                    .await;
            }
        }
        let usage = response.usage.map(|u| hivegate_types::provider::Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        let _ = tx.send(StreamEvent::Done { finish_reason, usage }).await;
        Ok(())
    }
}
