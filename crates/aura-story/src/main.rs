//! Binary entry point for the Story orchestration service: wires C1-C6
//! together behind the HTTP surface of §6 and serves it with axum.

use anyhow::{Context, Result};
use aura_core::{AgentRegistry, AlwaysPassGate, EventBus};
use aura_story::config::Config;
use aura_story::http::{build_router, AppState};
use aura_story::llm::{LlmClient, RigLlmClient};
use aura_story::scheduler::WaveScheduler;
use aura_story::step_runner::StepRunner;
use aura_story::store::{InMemoryStoryStore, StoryStore};
use aura_story::story_service::StoryService;
use aura_story::tools::{ReadFileTool, ToolRegistry, WriteFileTool};
use aura_story::worktree_bridge::WorktreeBridge;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Story orchestration service.
#[derive(Debug, Parser)]
#[command(name = "aura-story", version, about)]
struct Cli {
    /// Directory scanned for agent definition files. Overrides
    /// `AURA_AGENT_DEFINITION_DIR`.
    #[arg(long)]
    agent_dir: Option<PathBuf>,

    /// Repository this instance orchestrates Stories against. Worktrees are
    /// created as siblings of this root (§4.5 create).
    #[arg(long)]
    repo_root: Option<PathBuf>,

    /// Address to bind the HTTP surface to. Overrides `AURA_BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// Skip creating per-Story git worktrees (Stories run against
    /// `repo_root` directly). Useful for smoke-testing without git.
    #[arg(long)]
    no_worktrees: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let bind_addr = cli.bind.clone().unwrap_or_else(|| config.core.bind_addr.clone());

    let registry = Arc::new(match &cli.agent_dir {
        Some(dir) => AgentRegistry::with_definition_dir(dir.clone())
            .with_context(|| format!("failed to load agent definitions from {}", dir.display()))?,
        None => AgentRegistry::with_definition_dir(config.core.agent_definition_dir.clone())
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "no agent definitions loaded, starting with an empty registry");
                AgentRegistry::new()
            }),
    });
    tracing::info!(agents = registry.list_all().len(), "agent registry loaded");

    if !aura_story::config::check_endpoint(&config.default_endpoint.url, Some(&config.default_endpoint.api_key)).await {
        tracing::warn!(endpoint = %config.default_endpoint.url, "default LLM endpoint unreachable at startup");
    }

    let llm: Arc<dyn LlmClient> = Arc::new(RigLlmClient::new(
        config.default_endpoint.build_client().context("failed to build default LLM client")?,
    ));

    let store: Arc<dyn StoryStore> = Arc::new(InMemoryStoryStore::new());
    let events = Arc::new(EventBus::new());

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ReadFileTool));
    tools.register(Arc::new(WriteFileTool));
    let tools = Arc::new(tools);

    let worktrees = if cli.no_worktrees {
        None
    } else {
        let repo_root = cli.repo_root.clone().unwrap_or_else(|| PathBuf::from("."));
        match WorktreeBridge::new(None, &repo_root) {
            Ok(bridge) => Some(Arc::new(bridge)),
            Err(e) => {
                tracing::warn!(error = %e, "worktree bridge unavailable, Stories will run without isolated worktrees");
                None
            }
        }
    };

    let step_runner = Arc::new(StepRunner::with_config(
        store.clone(),
        registry.clone(),
        events.clone(),
        tools,
        llm.clone(),
        Arc::new(config.core.clone()),
    ));
    let gate = Arc::new(AlwaysPassGate);
    let scheduler = Arc::new(WaveScheduler::new(store.clone(), step_runner.clone(), events.clone(), gate));

    let service = Arc::new(StoryService::new(
        store,
        registry,
        events.clone(),
        scheduler,
        step_runner,
        llm,
        worktrees,
        None,
        None,
    ));

    let state = AppState { service, events };
    let app = build_router(state);

    tracing::info!(%bind_addr, "aura-story listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(config.shutdown_grace))
        .await
        .context("http server error")?;

    Ok(())
}

async fn shutdown_signal(grace: std::time::Duration) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!(grace_secs = grace.as_secs(), "shutdown signal received, draining in-flight runs");
    tokio::time::sleep(grace).await;
}
