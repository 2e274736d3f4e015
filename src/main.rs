//! DomainFlow server
//!
//! Constructs the process-wide singletons, spawns the background services
//! under a root cancellation token, and serves the SSE endpoints. Shutdown
//! cancels the token and stops services in reverse dependency order.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};

use domainflow_engine::campaign::CampaignType;
use domainflow_engine::config::{AppConfig, ConfigLoader};
use domainflow_engine::reconcile::CounterReconciler;
use domainflow_engine::sse::{router, SseBroadcaster, SseState};
use domainflow_engine::storage::{StateStore, TransactionRunner};
use domainflow_engine::worker::WorkerCoordinator;
use domainflow_engine::{CampaignEngine, CancelToken, ConfigManager, ResourceLockManager};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "domainflow", about = "Campaign orchestrator for domain discovery")]
struct Args {
    /// Path to the YAML or JSON configuration file
    #[arg(short, long, env = "DOMAINFLOW_CONFIG")]
    config: Option<String>,

    /// Stable worker identity for this process
    #[arg(long, env = "DOMAINFLOW_WORKER_ID", default_value = "domainflow-server")]
    worker_id: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => ConfigLoader::load_from_file(path).context("loading configuration")?,
        None => AppConfig::default(),
    };
    let config = ConfigLoader::apply_env(config).context("applying environment overrides")?;

    let root = CancelToken::new();

    let store = Arc::new(StateStore::new(&config.server.data_dir).context("opening state store")?);
    let runner = Arc::new(TransactionRunner::new(Arc::clone(&store)));
    let locks = Arc::new(ResourceLockManager::new(Arc::clone(&runner), args.worker_id.clone()));
    let configs = Arc::new(ConfigManager::new(Arc::clone(&runner), Arc::clone(&locks)));
    let broadcaster = Arc::new(SseBroadcaster::new(config.sse.clone()));
    // Held for the request handlers mounted in front of this core
    let _engine = Arc::new(CampaignEngine::new(
        Arc::clone(&runner),
        Arc::clone(&locks),
        Arc::clone(&configs),
        Arc::clone(&broadcaster),
        config.sse.persist_events,
    ));
    let coordinator = Arc::new(WorkerCoordinator::new(
        Arc::clone(&runner),
        args.worker_id.clone(),
        config.worker_coordination.clone(),
    ));
    let reconciler = Arc::new(CounterReconciler::new(
        Arc::clone(&runner),
        Arc::clone(&broadcaster),
        config.reconciliation.clone(),
    ));

    coordinator
        .register(&root, None, CampaignType::Generation)
        .await
        .context("registering worker")?;

    // Background services, each on its own child token
    coordinator.start_heartbeat(root.child_token());
    coordinator.spawn_cleanup(root.child_token());
    broadcaster.spawn_keep_alive(root.child_token());
    broadcaster.spawn_cleanup(root.child_token());
    reconciler.spawn(root.child_token());

    let sse_state = SseState {
        broadcaster: Arc::clone(&broadcaster),
        allowed_origin: config.server.allowed_origin.clone(),
    };
    let app = router(sse_state).route("/healthz", axum::routing::get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.server.listen_addr))?;
    info!(addr = %config.server.listen_addr, worker_id = %args.worker_id, "domainflow listening");

    let shutdown_token = root.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        tokio::select! {
            _ = shutdown_token.cancelled() => {}
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!(error = %err, "ctrl-c handler failed");
                }
                info!("shutdown requested");
                shutdown_token.cancel();
            }
        }
    });
    serve.await.context("serving")?;

    // Reverse dependency order: stop intake, then fan-out, then flush
    root.cancel();
    locks.clear_local_cache();
    store.flush().context("final flush")?;
    info!("domainflow stopped");
    Ok(())
}
