use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod repository;
pub mod service;

use config::{Config, StoreBackend};
use repository::{FileResultStore, MemoryResultStore, ResultStore};
use service::{RunQueryService, RunRegistry, RunSupervisor};

/// How long shutdown waits for stopped runs to persist their results
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "barrage_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Barrage Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        "Runner: {} {}",
        config.runner_command,
        config.runner_args.join(" ")
    );

    let store: Arc<dyn ResultStore> = match config.store_backend {
        StoreBackend::File => Arc::new(
            FileResultStore::open(config.results_dir.clone(), config.max_results)
                .await
                .context("Failed to open result store")?,
        ),
        StoreBackend::Memory => {
            tracing::info!("In-memory result store (max {} records)", config.max_results);
            Arc::new(MemoryResultStore::new(config.max_results))
        }
    };

    let config = Arc::new(config);
    let registry = Arc::new(RunRegistry::new());
    let supervisor = RunSupervisor::new(config.clone(), registry.clone(), store);
    let runs = RunQueryService::new(supervisor);

    // Build router with all API endpoints
    let app = api::create_router(api::AppState {
        runs: runs.clone(),
        heartbeat_interval: config.heartbeat_interval,
    });

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(runs))
        .await
        .context("Server error")?;

    drain(&registry).await;
    tracing::info!("Orchestrator stopped");

    Ok(())
}

/// Resolves on Ctrl-C after asking every live run to stop
async fn shutdown_signal(runs: RunQueryService) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }

    let stopped = runs.stop_all();
    tracing::info!("Shutting down, stopping {} live run(s)", stopped.len());
}

/// Waits for live runs to finish persisting, up to a bound
async fn drain(registry: &RunRegistry) {
    let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;

    while !registry.is_empty() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(
                "{} run(s) still live after {:?}, exiting anyway",
                registry.len(),
                SHUTDOWN_DRAIN_TIMEOUT
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
