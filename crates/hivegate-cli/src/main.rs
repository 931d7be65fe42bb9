//! hivegate command-line entrypoint.
//!
//! Thin wiring only: assemble the crates into a running gateway or node
//! host. Configuration beyond flags and environment variables is the
//! embedding deployment's concern.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hivegate_core::advisor::ToolAdvisor;
use hivegate_core::agent::{AgentDeps, AgentLoop};
use hivegate_core::bus::MessageBus;
use hivegate_core::cache::ResponseCache;
use hivegate_core::context::{ContextBuilder, ContextGuard};
use hivegate_core::memory::{ChainEmbedder, Embedder, HybridSearch, MemoryStore, VectorIndex};
use hivegate_core::profiler::{Interviewer, ModelRegistry};
use hivegate_core::router::TieredRouter;
use hivegate_core::session::SessionStore;
use hivegate_core::swarm::SwarmOrchestrator;
use hivegate_core::tools::{ToolExecutor, ToolRegistry};
use hivegate_llm::{ChatClient, HealthRegistry, OpenAiCompatProvider, ProviderConfig};
use hivegate_nodes::{ExecApprovalManager, ExecHost, ExecRouter, NodeHost, NodeManager};
use hivegate_services::CronService;
use hivegate_tools::{ExecTool, MemoryTool};
use hivegate_types::config::Config;
use hivegate_types::event::InboundEnvelope;

#[derive(Parser)]
#[command(name = "hivegate", about = "Multi-channel autonomous agent gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway: agent loop, cron service, node manager.
    Gateway {
        /// Bind address for the node socket.
        #[arg(long, default_value = "127.0.0.1:18790")]
        nodes_addr: String,
        /// One message to process from stdin-style input instead of
        /// serving (smoke-test mode).
        #[arg(long)]
        message: Option<String>,
    },
    /// Run a headless node host connected to a gateway.
    Node {
        /// Gateway WebSocket URL.
        #[arg(long, default_value = "ws://127.0.0.1:18790")]
        gateway: String,
        /// Authentication token.
        #[arg(long, default_value = "")]
        token: String,
        /// Display name (defaults to the hostname).
        #[arg(long, default_value = "")]
        name: String,
    },
    /// List scheduled cron jobs.
    Cron,
}

fn state_dir() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".hivegate")
}

fn build_client() -> Arc<ChatClient> {
    let api_base = std::env::var("HIVEGATE_API_BASE")
        .unwrap_or_else(|_| "https://openrouter.ai/api/v1".into());
    let api_key = std::env::var("HIVEGATE_API_KEY").unwrap_or_default();
    let provider = OpenAiCompatProvider::new(ProviderConfig::new(
        "openai-compat",
        api_base,
        api_key,
    ));
    Arc::new(
        ChatClient::new(Arc::new(provider)).with_health(Arc::new(HealthRegistry::new())),
    )
}

async fn run_gateway(nodes_addr: String, message: Option<String>) -> anyhow::Result<()> {
    let config = Config::default();
    let state = state_dir();

    let bus = Arc::new(MessageBus::new());
    let sessions = Arc::new(SessionStore::new(state.join("sessions")));
    let client = build_client();
    let health = client.health().clone();

    // Memory stack.
    let memory = Arc::new(MemoryStore::new(state.join("memory")));
    let index = Arc::new(VectorIndex::open(384, state.join("memory/vectors.json")));
    let embedder: Arc<dyn Embedder> = Arc::new(ChainEmbedder::local_only(384));
    let search = Arc::new(HybridSearch::new(memory.clone(), index, embedder));

    // Nodes + exec routing.
    let manager = Arc::new(NodeManager::with_storage(
        config.nodes.auth_token.clone(),
        config.nodes.auto_approve,
        state.join("nodes.json"),
    ));
    let exec_router = Arc::new(ExecRouter::new(
        manager.clone(),
        ExecHost::parse(&config.exec.host),
        config.exec.node.clone(),
        config.exec.fallback_to_local,
    ));

    // Tools.
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ExecTool::new(exec_router)));
    tools.register(Arc::new(MemoryTool::new(memory.clone(), search)));
    let tools = Arc::new(tools);
    let executor = Arc::new(ToolExecutor::from_config(
        tools.clone(),
        &config.agents.self_heal,
    ));

    let advisor = Arc::new(
        ToolAdvisor::with_storage(
            config.agents.tool_reinforcement.clone(),
            state.join("tool_advisor.json"),
        )
        .await,
    );
    let profiles = Arc::new(ModelRegistry::with_storage(state.join("profiles.json")).await);
    let interviewer = Arc::new(
        Interviewer::new()
            .with_interviewer_model(&config.agents.profiler.interviewer_model)
            .with_test_timeout(Duration::from_secs(config.agents.profiler.test_timeout)),
    );

    let router = config.agents.tiered_routing.enabled.then(|| {
        Arc::new(TieredRouter::new(
            config.agents.tiered_routing.clone(),
            health,
        ))
    });
    let swarm = config.agents.swarm.enabled.then(|| {
        Arc::new(SwarmOrchestrator::new(
            config.agents.swarm.clone(),
            client.clone(),
        ))
    });

    let deps = AgentDeps {
        config: config.agents.clone(),
        bus: bus.clone(),
        sessions,
        client,
        tools,
        executor,
        advisor,
        profiles,
        context: ContextBuilder::new(
            "You are hivegate, a helpful autonomous agent reachable over chat.",
        ),
        guard: {
            let mut guard = ContextGuard::new(128_000, 0.8);
            if config.agents.memory.save_compaction_summaries {
                let memory = memory.clone();
                guard = guard.with_summary_hook(Arc::new(move |session_key, summary| {
                    let _ = memory
                        .add_to_daily(&format!("Summary for {session_key}: {summary}"));
                }));
            }
            guard
        },
        router,
        swarm,
        interviewer: Some(interviewer),
        cache: Some(Arc::new(ResponseCache::new())),
        memory: Some(memory),
    };

    let cancel = CancellationToken::new();
    let agent = AgentLoop::new(deps).with_cancel(cancel.clone());

    if let Some(content) = message {
        // Smoke-test mode: one message through the loop, print the reply.
        let mut outbound = bus.subscribe_outbound("cli").await;
        agent
            .process(InboundEnvelope::new("cli", "operator", "local", content))
            .await
            .context("processing failed")?;
        if let Some(reply) = outbound.recv().await {
            println!("{}", reply.content);
        }
        return Ok(());
    }

    let cron = Arc::new(CronService::with_storage(bus.clone(), state.join("cron.json")).await);
    let cron_cancel = cancel.clone();
    let cron_task = tokio::spawn(async move { cron.run(cron_cancel).await });
    if config.nodes.enabled {
        let manager = manager.clone();
        let addr = nodes_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.listen(&addr).await {
                tracing::error!(error = %e, "node listener failed");
            }
        });
    }

    info!("gateway running; press ctrl-c to stop");
    tokio::select! {
        result = agent.run() => result.context("agent loop failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            cancel.cancel();
        }
    }
    let _ = cron_task.await;
    Ok(())
}

async fn run_node(gateway: String, token: String, name: String) -> anyhow::Result<()> {
    let state = state_dir();
    let approvals = ExecApprovalManager::with_storage(state.join("exec-approvals.json"));
    let host = NodeHost::new(gateway, token, name)
        .with_config_path(state.join("node.json"))
        .with_approvals(approvals);

    tokio::select! {
        result = host.run() => result.context("node host failed")?,
        _ = tokio::signal::ctrl_c() => info!("node host stopping"),
    }
    Ok(())
}

async fn list_cron() -> anyhow::Result<()> {
    let bus = Arc::new(MessageBus::new());
    let cron = CronService::with_storage(bus, state_dir().join("cron.json")).await;
    let jobs = cron.list_jobs().await;
    if jobs.is_empty() {
        println!("no cron jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}  {}  enabled={}  next={:?}",
            job.id, job.name, job.enabled, job.state.next_run_at_ms
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Gateway {
            nodes_addr,
            message,
        } => run_gateway(nodes_addr, message).await,
        Command::Node {
            gateway,
            token,
            name,
        } => run_node(gateway, token, name).await,
        Command::Cron => list_cron().await,
    }
}
