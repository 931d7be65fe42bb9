//! Context window management.
//!
//! [`ContextGuard`] watches token usage and replaces the middle of a long
//! conversation with a model-written summary; [`ContextBuilder`] turns a
//! session plus memory context into the initial message list.
//!
//! Token counting uses one canonical estimator everywhere: four
//! characters per token plus a small per-message overhead. The gateway
//! deliberately carries no tokenizer dependency; the estimate only has to
//! be consistent with itself.

use std::sync::Arc;

use tracing::{info, warn};

use hivegate_llm::ChatClient;
use hivegate_types::provider::{ChatMessage, ChatOptions};

/// Approximate characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Fixed overhead per message (role, separators).
const PER_MESSAGE_OVERHEAD: usize = 4;

/// Substitute summary text when the provider cannot produce one.
const FALLBACK_SUMMARY: &str =
    "[Previous conversation truncated to stay within the context limit]";

/// Estimate tokens for one message, counting tool-call stubs.
pub fn estimate_message_tokens(message: &ChatMessage) -> usize {
    let mut total = PER_MESSAGE_OVERHEAD + message.content.len() / CHARS_PER_TOKEN;
    if let Some(calls) = &message.tool_calls {
        for call in calls {
            let name_len = call
                .pointer("/function/name")
                .and_then(|v| v.as_str())
                .map(str::len)
                .unwrap_or(0);
            let args_len = call
                .pointer("/function/arguments")
                .and_then(|v| v.as_str())
                .map(str::len)
                .unwrap_or(0);
            total += (name_len + args_len) / CHARS_PER_TOKEN;
        }
    }
    total
}

/// Estimate tokens for a message list.
pub fn estimate_tokens(messages: &[ChatMessage]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Report returned by a compaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionReport {
    /// Token estimate before compaction.
    pub original_tokens: usize,
    /// Token estimate after compaction.
    pub compacted_tokens: usize,
    /// Messages replaced by the summary.
    pub messages_removed: usize,
    /// Whether a summary message was inserted.
    pub summary_added: bool,
}

impl CompactionReport {
    fn noop(tokens: usize) -> Self {
        Self {
            original_tokens: tokens,
            compacted_tokens: tokens,
            messages_removed: 0,
            summary_added: false,
        }
    }
}

/// Callback fired with `(session_key, summary_text)` after a compaction,
/// letting the memory layer persist the summary.
pub type SummaryHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Guards against context overflow.
pub struct ContextGuard {
    /// Context window size in tokens.
    pub max_tokens: usize,
    /// Fraction of the window that triggers compaction.
    pub threshold: f64,
    /// Recent messages always preserved.
    pub preserve_recent: usize,
    /// Whether system messages are always preserved.
    pub preserve_system: bool,
    summary_hook: Option<SummaryHook>,
}

impl ContextGuard {
    /// Create a guard with the given window and trigger threshold.
    pub fn new(max_tokens: usize, threshold: f64) -> Self {
        Self {
            max_tokens,
            threshold,
            preserve_recent: 10,
            preserve_system: true,
            summary_hook: None,
        }
    }

    /// Install a hook that receives compaction summaries.
    pub fn with_summary_hook(mut self, hook: SummaryHook) -> Self {
        self.summary_hook = Some(hook);
        self
    }

    /// Number of recent messages to preserve.
    pub fn with_preserve_recent(mut self, n: usize) -> Self {
        self.preserve_recent = n;
        self
    }

    /// True when the estimate exceeds `threshold * max_tokens`.
    pub fn needs_compaction(&self, messages: &[ChatMessage]) -> bool {
        let threshold_tokens = (self.max_tokens as f64 * self.threshold) as usize;
        estimate_tokens(messages) > threshold_tokens
    }

    /// Compact if needed; otherwise return the messages unchanged.
    pub async fn compact_if_needed(
        &self,
        messages: Vec<ChatMessage>,
        client: &ChatClient,
        summarizer_model: &str,
        session_key: &str,
    ) -> (Vec<ChatMessage>, CompactionReport) {
        if !self.needs_compaction(&messages) {
            let tokens = estimate_tokens(&messages);
            return (messages, CompactionReport::noop(tokens));
        }
        self.compact(messages, client, summarizer_model, session_key)
            .await
    }

    /// Compact unconditionally: summarize the middle, keep system
    /// messages and the recent tail.
    pub async fn compact(
        &self,
        messages: Vec<ChatMessage>,
        client: &ChatClient,
        summarizer_model: &str,
        session_key: &str,
    ) -> (Vec<ChatMessage>, CompactionReport) {
        let original_tokens = estimate_tokens(&messages);

        let tail_start = messages.len().saturating_sub(self.preserve_recent);
        let mut system_messages = Vec::new();
        let mut middle = Vec::new();
        let mut tail = Vec::new();

        for (i, msg) in messages.into_iter().enumerate() {
            if msg.role == "system" && self.preserve_system {
                system_messages.push(msg);
            } else if i >= tail_start {
                tail.push(msg);
            } else {
                middle.push(msg);
            }
        }

        if middle.is_empty() {
            let mut restored = system_messages;
            restored.extend(tail);
            return (restored, CompactionReport::noop(original_tokens));
        }

        info!(
            session = session_key,
            original_tokens,
            summarizing = middle.len(),
            "context compaction triggered"
        );

        let summary = self
            .summarize(&middle, client, summarizer_model)
            .await
            .unwrap_or_else(|| FALLBACK_SUMMARY.to_string());

        if let Some(hook) = &self.summary_hook {
            hook(session_key, &summary);
        }

        let removed = middle.len();
        let mut compacted = system_messages;
        compacted.push(ChatMessage::system(format!(
            "[Context Summary]\n{summary}\n[End Summary]"
        )));
        compacted.extend(tail);

        let compacted_tokens = estimate_tokens(&compacted);
        info!(
            session = session_key,
            compacted_tokens, removed, "context compacted"
        );

        (
            compacted,
            CompactionReport {
                original_tokens,
                compacted_tokens,
                messages_removed: removed,
                summary_added: true,
            },
        )
    }

    async fn summarize(
        &self,
        middle: &[ChatMessage],
        client: &ChatClient,
        model: &str,
    ) -> Option<String> {
        let mut transcript = String::new();
        for msg in middle {
            if !msg.content.is_empty() {
                let snippet: String = msg.content.chars().take(500).collect();
                transcript.push_str(&format!("{}: {}\n", msg.role.to_uppercase(), snippet));
            }
            for call in msg.tool_calls.iter().flatten() {
                if let Some(name) = call.pointer("/function/name").and_then(|v| v.as_str())
                {
                    transcript.push_str(&format!("[tool: {name}]\n"));
                }
            }
        }
        let transcript: String = transcript.chars().take(4000).collect();

        let prompt = format!(
            "Summarize this conversation history concisely. Focus on:\n\
             1. Key topics discussed\n\
             2. Important decisions or conclusions\n\
             3. Any tasks or actions taken\n\
             4. Context needed for continuing the conversation\n\n\
             Conversation:\n{transcript}\n\n\
             Provide a brief summary (max 300 words):"
        );

        let options = ChatOptions {
            max_tokens: Some(500),
            temperature: Some(0.3),
            ..Default::default()
        };
        let response = client
            .chat(&[ChatMessage::user(prompt)], model, &options)
            .await;
        if response.finish_reason == "error" || response.content.is_empty() {
            warn!("compaction summary failed, using fallback notice");
            return None;
        }
        Some(response.content)
    }

    /// Last-resort overflow handling: drop the oldest non-system messages
    /// until the estimate fits in the window.
    pub fn emergency_trim(&self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let mut messages = messages;
        while estimate_tokens(&messages) > self.max_tokens {
            let Some(pos) = messages.iter().position(|m| m.role != "system") else {
                break;
            };
            messages.remove(pos);
        }
        messages
    }
}

/// Assembles the initial message list for a provider call.
pub struct ContextBuilder {
    system_prompt: String,
    max_history_turns: usize,
}

impl ContextBuilder {
    /// Create a builder with the gateway's system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_history_turns: 50,
        }
    }

    /// Cap on history turns included per request.
    pub fn with_max_history(mut self, turns: usize) -> Self {
        self.max_history_turns = turns;
        self
    }

    /// Build `[system, memory?, history…, user]`.
    ///
    /// `memory_context` is prepended as a second system message when
    /// non-empty; `guardrail_prompt` extends the system prompt for models
    /// with known weaknesses.
    pub fn build(
        &self,
        history: &[ChatMessage],
        current_message: &str,
        memory_context: &str,
        guardrail_prompt: &str,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::new();

        let mut system = self.system_prompt.clone();
        if !guardrail_prompt.is_empty() {
            system.push_str("\n\n");
            system.push_str(guardrail_prompt);
        }
        messages.push(ChatMessage::system(system));

        if !memory_context.is_empty() {
            messages.push(ChatMessage::system(format!(
                "Relevant memories:\n{memory_context}"
            )));
        }

        let start = history.len().saturating_sub(self.max_history_turns);
        messages.extend(history[start..].iter().cloned());
        messages.push(ChatMessage::user(current_message));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use hivegate_llm::types::{WireChoice, WireMessage, WireRequest, WireResponse};
    use hivegate_llm::{Provider, ProviderError};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SummaryProvider {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Provider for SummaryProvider {
        fn name(&self) -> &str {
            "summary"
        }
        async fn complete(
            &self,
            _request: &WireRequest,
        ) -> hivegate_llm::Result<WireResponse> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProviderError::Timeout);
            }
            Ok(WireResponse {
                id: "r".into(),
                choices: vec![WireChoice {
                    index: 0,
                    message: WireMessage {
                        role: "assistant".into(),
                        content: Some("summary of the middle".into()),
                        tool_calls: None,
                    },
                    finish_reason: Some("stop".into()),
                }],
                usage: None,
                model: "m".into(),
            })
        }
    }

    fn client(fail: bool) -> ChatClient {
        ChatClient::new(std::sync::Arc::new(SummaryProvider {
            fail: AtomicBool::new(fail),
        }))
    }

    fn long_conversation(n: usize) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage::system("You are a helpful agent.")];
        for i in 0..n {
            messages.push(ChatMessage::user(format!("question {i} {}", "x".repeat(400))));
            messages.push(ChatMessage::assistant(format!(
                "answer {i} {}",
                "y".repeat(400)
            )));
        }
        messages
    }

    #[test]
    fn estimator_counts_content_and_overhead() {
        let msg = ChatMessage::user("x".repeat(40));
        assert_eq!(estimate_message_tokens(&msg), 4 + 10);
    }

    #[test]
    fn estimator_counts_tool_calls() {
        let mut msg = ChatMessage::assistant("");
        msg.tool_calls = Some(vec![serde_json::json!({
            "id": "c1",
            "type": "function",
            "function": {"name": "exec", "arguments": "{\"command\": \"ls\"}"}
        })]);
        assert!(estimate_message_tokens(&msg) > PER_MESSAGE_OVERHEAD);
    }

    #[test]
    fn needs_compaction_threshold() {
        let guard = ContextGuard::new(1000, 0.8);
        assert!(!guard.needs_compaction(&[ChatMessage::user("short")]));
        assert!(guard.needs_compaction(&long_conversation(10)));
    }

    #[tokio::test]
    async fn compact_preserves_system_and_tail() {
        let guard = ContextGuard::new(1000, 0.5).with_preserve_recent(4);
        let messages = long_conversation(20);
        let (compacted, report) = guard
            .compact_if_needed(messages, &client(false), "sum-model", "cli:x")
            .await;

        assert!(report.summary_added);
        assert!(report.messages_removed > 0);
        assert!(report.compacted_tokens < report.original_tokens);

        // Layout: original system, summary system, then the 4-message tail.
        assert_eq!(compacted[0].role, "system");
        assert!(compacted[1].content.contains("[Context Summary]"));
        assert!(compacted[1].content.contains("summary of the middle"));
        assert_eq!(compacted.len(), 2 + 4);
    }

    #[tokio::test]
    async fn compact_below_threshold_is_noop() {
        let guard = ContextGuard::new(100_000, 0.8);
        let messages = vec![ChatMessage::user("hi")];
        let (out, report) = guard
            .compact_if_needed(messages.clone(), &client(false), "m", "k")
            .await;
        assert_eq!(out, messages);
        assert_eq!(report.messages_removed, 0);
        assert!(!report.summary_added);
    }

    #[tokio::test]
    async fn already_compacted_is_idempotent() {
        let guard = ContextGuard::new(1000, 0.5).with_preserve_recent(4);
        let (once, report1) = guard
            .compact(long_conversation(20), &client(false), "m", "k")
            .await;
        assert!(report1.summary_added);
        let (_twice, report2) = guard
            .compact_if_needed(once, &client(false), "m", "k")
            .await;
        assert_eq!(report2.messages_removed, 0);
        assert!(!report2.summary_added);
    }

    #[tokio::test]
    async fn provider_failure_uses_fallback_notice() {
        let guard = ContextGuard::new(1000, 0.5).with_preserve_recent(2);
        let (compacted, report) = guard
            .compact(long_conversation(10), &client(true), "m", "k")
            .await;
        assert!(report.summary_added);
        assert!(compacted[1].content.contains("truncated"));
    }

    #[tokio::test]
    async fn summary_hook_receives_session_and_text() {
        use std::sync::Mutex;
        let captured: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let guard = ContextGuard::new(1000, 0.5)
            .with_preserve_recent(2)
            .with_summary_hook(Arc::new(move |key, summary| {
                sink.lock().unwrap().push((key.into(), summary.into()));
            }));

        guard
            .compact(long_conversation(10), &client(false), "m", "teams:t9")
            .await;

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, "teams:t9");
        assert!(captured[0].1.contains("summary"));
    }

    #[test]
    fn emergency_trim_drops_oldest_non_system() {
        let guard = ContextGuard::new(200, 0.8);
        let trimmed = guard.emergency_trim(long_conversation(10));
        assert!(estimate_tokens(&trimmed) <= 200);
        // The system message survives.
        assert!(trimmed.iter().any(|m| m.role == "system"));
    }

    #[test]
    fn builder_layout() {
        let builder = ContextBuilder::new("base prompt");
        let history = vec![
            ChatMessage::user("earlier"),
            ChatMessage::assistant("reply"),
        ];
        let messages = builder.build(&history, "now", "fact one", "guardrail line");

        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("base prompt"));
        assert!(messages[0].content.contains("guardrail line"));
        assert!(messages[1].content.contains("fact one"));
        assert_eq!(messages[2].content, "earlier");
        assert_eq!(messages.last().unwrap().content, "now");
    }

    #[test]
    fn builder_caps_history() {
        let builder = ContextBuilder::new("p").with_max_history(2);
        let history: Vec<ChatMessage> =
            (0..10).map(|i| ChatMessage::user(format!("m{i}"))).collect();
        let messages = builder.build(&history, "now", "", "");
        // system + 2 history + current
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "m8");
    }
}
