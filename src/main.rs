//! # parley
//!
//! Chat gateway binary: wires settings, logging, the provider gateway, tools,
//! fan-out and the orchestrator, then serves HTTP and WebSocket clients.
//!
//! Entities live in memory. The model catalog is fetched once at startup
//! when a catalog API key is available.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use parley_core::logging::{LogFormat, init_subscriber};
use parley_core::{ConnectionParams, Model};
use parley_fanout::{FanOut, LocalHub, LocalSubstrate, SubscriberBridge, Substrate};
use parley_gateway::Gateway;
use parley_runtime::{
    CancellationRegistry, ChunkSearch, EntityRepository, InMemoryChunkSearch, InMemoryRepository, InMemoryStorage,
    Orchestrator, OrchestratorParts, RuntimeSettings, StorageService,
};
use parley_server::{ParleyServer, ShutdownCoordinator, wait_for_signal};
use parley_settings::ParleySettings;
use parley_tools::mcp::McpCatalog;
use parley_tools::{HttpSearchBackend, ToolRegistry};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Multi-provider LLM chat gateway.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Multi-provider LLM chat gateway", version)]
struct Cli {
    /// Settings file (JSON). Defaults to `parley.json`.
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Default log level when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,

    /// API key used to fetch the model catalog at startup.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    catalog_api_key: Option<String>,
}

impl Cli {
    /// Command-line flags win over the file and environment layers.
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn build_tools(settings: &ParleySettings) -> Result<ToolRegistry> {
    let registry = ToolRegistry::new(Arc::new(McpCatalog::new(reqwest::Client::new())));
    let Some(base_url) = &settings.search.base_url else {
        info!("no search backend configured, web search disabled");
        return Ok(registry);
    };
    let backend = HttpSearchBackend::new(base_url.clone()).context("failed to build search backend")?;
    info!(url = %base_url, "web search enabled");
    Ok(registry.with_search(Arc::new(backend), settings.search.clone()))
}

async fn load_catalog(gateway: &Gateway, api_key: Option<&str>) -> Vec<Model> {
    let Some(api_key) = api_key else {
        warn!("no catalog API key, model catalog is empty");
        return Vec::new();
    };
    let connection = ConnectionParams {
        openai_api_key: Some(SecretString::from(api_key)),
        ..ConnectionParams::default()
    };
    match gateway.models(&connection).await {
        Ok(models) => {
            info!(models = models.len(), "model catalog loaded");
            models.into_values().collect()
        }
        Err(e) => {
            warn!(error = %e, "failed to load model catalog");
            Vec::new()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(parley_settings::settings_path);
    let mut settings = parley_settings::load_settings_from_path(&path)
        .with_context(|| format!("failed to load settings from {}", path.display()))?;
    cli.apply(&mut settings);

    let format = if settings.logging.json { LogFormat::Json } else { LogFormat::Compact };
    init_subscriber(&settings.logging.level, format);
    info!(config = %path.display(), providers = ?settings.providers.enabled, "settings loaded");

    let shutdown = ShutdownCoordinator::new();
    let gateway = Gateway::new(&settings);
    let tools = build_tools(&settings)?;

    // Fan-out: publish through the substrate, deliver through the local hub
    let capacity = settings.fanout.local_channel_capacity;
    let hub = LocalHub::new(capacity);
    let substrate: Arc<dyn Substrate> = Arc::new(LocalSubstrate::new(capacity));
    let fanout = FanOut::new(Arc::clone(&substrate), hub.clone(), settings.fanout.clone());
    let bridge = SubscriberBridge::new(substrate, hub.clone(), settings.fanout.clone(), shutdown.token()).spawn();

    let cancellations = Arc::new(CancellationRegistry::new());
    let learner = cancellations.learn_from(&hub, shutdown.token());

    let models = load_catalog(&gateway, cli.catalog_api_key.as_deref()).await;
    let repository = InMemoryRepository::new()
        .with_models(models)
        .with_mcp_servers(settings.mcp_servers.clone());

    let orchestrator = Orchestrator::new(OrchestratorParts {
        repository: Arc::new(repository) as Arc<dyn EntityRepository>,
        storage: Arc::new(InMemoryStorage::default()) as Arc<dyn StorageService>,
        chunks: Arc::new(InMemoryChunkSearch::new(Vec::new())) as Arc<dyn ChunkSearch>,
        gateway,
        tools,
        fanout,
        cancellations,
        settings: RuntimeSettings::from(&settings),
    });

    let server = ParleyServer::new(settings.server.clone(), orchestrator.clone());
    let listener = TcpListener::bind(server.addr())
        .await
        .with_context(|| format!("failed to bind {}", server.addr()))?;
    let mut serve = tokio::spawn(server.serve(listener, shutdown.token()));

    let exited = tokio::select! {
        () = wait_for_signal() => None,
        result = &mut serve => Some(result),
    };

    info!("shutting down");
    let drained = shutdown.graceful_shutdown(&orchestrator, vec![bridge, learner], None).await;
    let result = match exited {
        Some(result) => result,
        None => serve.await,
    };
    result.context("server task panicked")?.context("server failed")?;

    info!(drained, "shutdown complete");
    Ok(())
}
