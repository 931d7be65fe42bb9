//! Core agent loop.
//!
//! The consume → reason → act → respond cycle:
//!
//! ```text
//! InboundEnvelope (bus)
//!   |  system envelopes: decode origin fabric/conversation
//!   v
//! Session lookup -> model choice (override / tiered router / default)
//!   |  unknown model: spawn background quick assessment
//!   |  complex message: divert to the swarm
//!   |  cached answer: emit immediately
//!   v
//! Provider loop (up to max_tool_iterations):
//!   compact context -> chat -> execute tool calls -> repeat
//!   v
//! OutboundEnvelope (bus, routed to the origin fabric)
//! ```
//!
//! Per-envelope failures are logged and answered with an apology message;
//! they never terminate the loop.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hivegate_llm::ChatClient;
use hivegate_types::config::AgentsConfig;
use hivegate_types::event::{InboundEnvelope, OutboundEnvelope};
use hivegate_types::provider::{ChatMessage, ChatOptions};
use hivegate_types::{GatewayError, Result};

use crate::advisor::ToolAdvisor;
use crate::bus::MessageBus;
use crate::cache::{ResponseCache, should_cache};
use crate::classify;
use crate::context::{ContextBuilder, ContextGuard};
use crate::memory::MemoryStore;
use crate::profiler::{Interviewer, ModelRegistry};
use crate::router::TieredRouter;
use crate::session::SessionStore;
use crate::swarm::{SwarmOrchestrator, should_use_swarm};
use crate::tools::{ToolExecutor, ToolRegistry};

/// Emitted when the model returns neither content nor tool calls.
const NO_RESPONSE_NOTICE: &str =
    "I've completed processing but have no response to give.";

/// Emitted when the iteration budget runs out mid-task.
const MAX_ITERATIONS_NOTICE: &str =
    "I reached my tool iteration limit before completing this request. \
     The work done so far has been recorded; please follow up to continue.";

/// Everything the loop needs, wired by the embedding application.
pub struct AgentDeps {
    pub config: AgentsConfig,
    pub bus: Arc<MessageBus>,
    pub sessions: Arc<SessionStore>,
    pub client: Arc<ChatClient>,
    pub tools: Arc<ToolRegistry>,
    pub executor: Arc<ToolExecutor>,
    pub advisor: Arc<ToolAdvisor>,
    pub profiles: Arc<ModelRegistry>,
    pub context: ContextBuilder,
    pub guard: ContextGuard,
    pub router: Option<Arc<TieredRouter>>,
    pub swarm: Option<Arc<SwarmOrchestrator>>,
    pub interviewer: Option<Arc<Interviewer>>,
    pub cache: Option<Arc<ResponseCache>>,
    pub memory: Option<Arc<MemoryStore>>,
}

/// The core control loop.
pub struct AgentLoop {
    deps: AgentDeps,
    cancel: Option<CancellationToken>,
}

impl AgentLoop {
    /// Create a loop from its dependencies.
    pub fn new(deps: AgentDeps) -> Self {
        Self { deps, cancel: None }
    }

    /// Attach a cancellation token for prompt shutdown.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run until the bus closes or the token fires.
    pub async fn run(&self) -> Result<()> {
        info!("agent loop started");
        loop {
            let envelope = if let Some(token) = &self.cancel {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        info!("agent loop cancelled");
                        break;
                    }
                    envelope = self.deps.bus.consume_inbound() => envelope,
                }
            } else {
                self.deps.bus.consume_inbound().await
            };

            match envelope {
                Some(envelope) => {
                    debug!(
                        fabric = %envelope.fabric,
                        conversation = %envelope.conversation,
                        "processing inbound envelope"
                    );
                    if let Err(e) = self.process(envelope).await {
                        error!(error = %e, "failed to process envelope");
                    }
                }
                None => {
                    info!("inbound queue closed, agent loop exiting");
                    break;
                }
            }
        }
        Ok(())
    }

    /// Process one envelope end to end.
    pub async fn process(&self, envelope: InboundEnvelope) -> Result<()> {
        let (origin_fabric, origin_conversation) = envelope.origin();
        let session_key = envelope.session_key();

        let mut session = self.deps.sessions.get_or_create(&session_key).await?;

        // Model choice: user override -> tiered routing -> default.
        let override_model = envelope
            .metadata
            .get("model")
            .and_then(|v| v.as_str())
            .map(String::from);
        let task_label = classify::classify(&envelope.content).to_string();

        let (model, routed) = if let Some(model) = override_model {
            info!(model = %model, "using user-selected model override");
            (model, false)
        } else if let Some(router) = &self.deps.router {
            match router
                .route_with_client(&envelope.content, &self.deps.client)
                .await
            {
                Some(decision) => (decision.model, true),
                None => (self.deps.config.defaults.model.clone(), false),
            }
        } else {
            (self.deps.config.defaults.model.clone(), false)
        };

        // Unknown model: profile it in the background.
        let profile = self.deps.profiles.get(&model).await;
        if profile.is_none() {
            self.spawn_quick_assessment(&model);
        }

        // Complex request: divert to the swarm.
        if let Some(swarm) = &self.deps.swarm
            && let Some(pattern) =
                should_use_swarm(&envelope.content, &task_label, &self.deps.config.swarm)
        {
            info!(pattern, "diverting to swarm");
            let final_content = swarm.execute(&envelope.content, Some(pattern)).await;
            session.append("user", &envelope.content, None, None);
            session.append("assistant", &final_content, None, None);
            self.deps.sessions.save(&session).await?;
            return self
                .emit(&origin_fabric, &origin_conversation, final_content)
                .await;
        }

        // Response cache for simple single-turn queries.
        if let Some(cache) = &self.deps.cache
            && should_cache(&envelope.content, &task_label)
            && let Some(cached) = cache.get(&envelope.content, &model).await
        {
            info!("response cache hit");
            session.append("user", &envelope.content, None, None);
            session.append("assistant", &cached, None, None);
            self.deps.sessions.save(&session).await?;
            return self
                .emit(&origin_fabric, &origin_conversation, cached)
                .await;
        }

        // Thinking level maps to temperature.
        let thinking = envelope
            .metadata
            .get("thinking")
            .and_then(|v| v.as_str())
            .unwrap_or("medium");
        let temperature = match thinking {
            "low" => 0.9,
            "high" => 0.3,
            _ => 0.7,
        };

        // Build the initial message list from history + memory.
        let memory_context = self
            .deps
            .memory
            .as_ref()
            .filter(|_| self.deps.config.memory.enabled)
            .map(|m| m.context_for_prompt(2000))
            .unwrap_or_default();
        let guardrail_prompt = profile
            .as_ref()
            .map(|p| p.guardrail_prompt())
            .unwrap_or_default();
        let history = session.history(50);
        let mut messages = self.deps.context.build(
            &history,
            &envelope.content,
            &memory_context,
            &guardrail_prompt,
        );

        // Record the user turn now; tool and assistant turns follow as
        // they happen so the session always satisfies the call-id
        // pairing invariant.
        session.append("user", &envelope.content, None, None);

        let options = ChatOptions {
            max_tokens: Some(self.deps.config.defaults.max_tokens),
            temperature: Some(temperature),
            tools: self.deps.tools.definitions(),
            ..Default::default()
        };

        let max_iterations = self.deps.config.defaults.max_tool_iterations.max(1);
        let mut final_content: Option<String> = None;
        let mut used_tools = false;
        let mut iterations = 0u32;

        while iterations < max_iterations {
            iterations += 1;

            // Compaction keeps the conversation inside the window.
            let (compacted, _report) = self
                .deps
                .guard
                .compact_if_needed(
                    messages,
                    &self.deps.client,
                    &model,
                    &session_key,
                )
                .await;
            messages = compacted;

            let call_start = Instant::now();
            let response = self.deps.client.chat(&messages, &model, &options).await;
            let latency_ms = call_start.elapsed().as_secs_f64() * 1000.0;

            let ok = response.finish_reason != "error";
            if let Some(router) = &self.deps.router
                && routed
            {
                if ok {
                    router.mark_success(&model);
                } else {
                    router.mark_failure(&model, &response.content);
                }
            }
            self.deps
                .profiles
                .update_runtime_stats(
                    &model,
                    ok,
                    None,
                    response.usage.total_tokens,
                    latency_ms,
                    (!ok).then_some("provider_error"),
                )
                .await;

            if !ok {
                // Provider exhaustion surfaces as an apology; a failing
                // model may warrant a fresh quick look.
                warn!(model = %model, "provider chain exhausted");
                if self.deps.config.profiler.quick_assess_on_failure {
                    self.spawn_quick_assessment(&model);
                }
                final_content = Some(format!(
                    "I'm having trouble reaching my language models right now. \
                     Please try again shortly. ({})",
                    response.content.chars().take(200).collect::<String>()
                ));
                break;
            }

            if !response.has_tool_calls() {
                let content = response.content.clone();
                final_content = Some(if content.is_empty() {
                    NO_RESPONSE_NOTICE.to_string()
                } else {
                    content
                });
                break;
            }

            used_tools = true;
            let wire_calls: Vec<serde_json::Value> =
                response.tool_calls.iter().map(|c| c.to_wire()).collect();

            // Assistant turn with its tool-call stubs, in both the
            // provider transcript and the session.
            let mut assistant = ChatMessage::assistant(response.content.clone());
            assistant.tool_calls = Some(wire_calls.clone());
            messages.push(assistant);
            session.append(
                "assistant",
                &response.content,
                Some(wire_calls),
                None,
            );

            // Execute sequentially; a profile with avoid_parallel_tools
            // only reinforces what is already the default here.
            let profile = self.deps.profiles.get(&model).await;
            for call in &response.tool_calls {
                debug!(tool = %call.name, id = %call.id, "executing tool call");
                let result = self
                    .deps
                    .executor
                    .execute_with_retry(
                        &call.name,
                        call.arguments.clone(),
                        profile.as_ref(),
                        &call.id,
                    )
                    .await;

                self.deps
                    .advisor
                    .record(
                        &model,
                        &call.name,
                        result.success,
                        result.elapsed.as_secs_f64() * 1000.0,
                        if result.success { "" } else { &result.result },
                    )
                    .await;
                self.deps
                    .profiles
                    .update_runtime_stats(
                        &model,
                        true,
                        Some(result.success),
                        0,
                        0.0,
                        None,
                    )
                    .await;

                messages.push(ChatMessage::tool_result(
                    &call.id,
                    &call.name,
                    &result.result,
                ));
                session.append("tool", &result.result, None, Some(&call.id));
            }
        }

        let final_content =
            final_content.unwrap_or_else(|| MAX_ITERATIONS_NOTICE.to_string());

        // Cache plain single-call answers.
        if let Some(cache) = &self.deps.cache
            && iterations == 1
            && !used_tools
            && should_cache(&envelope.content, &task_label)
        {
            cache.put(&envelope.content, &model, &final_content).await;
        }

        session.append("assistant", &final_content, None, None);
        self.deps.sessions.save(&session).await?;

        self.emit(&origin_fabric, &origin_conversation, final_content)
            .await
    }

    async fn emit(
        &self,
        fabric: &str,
        conversation: &str,
        content: String,
    ) -> Result<()> {
        self.deps
            .bus
            .publish_outbound(OutboundEnvelope::new(fabric, conversation, content))
            .await
            .map_err(|e| GatewayError::Bus(format!("outbound publish failed: {e}")))
    }

    fn spawn_quick_assessment(&self, model: &str) {
        let Some(interviewer) = self.deps.interviewer.clone() else {
            return;
        };
        if !self.deps.config.profiler.enabled || !self.deps.config.profiler.auto_interview
        {
            return;
        }
        let client = self.deps.client.clone();
        let profiles = self.deps.profiles.clone();
        let model = model.to_string();
        tokio::spawn(async move {
            // Another task may have profiled it while we were queued.
            if profiles.get(&model).await.is_some() {
                return;
            }
            info!(model = %model, "background quick assessment");
            let profile = interviewer.quick_assessment(&client, &model).await;
            profiles.save(profile).await;
        });
    }
}
