//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod run;

use axum::{
    Router,
    routing::{get, post},
};
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::service::RunQueryService;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub runs: RunQueryService,
    /// Keep-alive interval for log streams
    pub heartbeat_interval: Duration,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Run endpoints
        .route("/runs", post(run::submit_run).get(run::list_runs))
        .route("/runs/stop-all", post(run::stop_all_runs))
        .route("/runs/{id}", get(run::get_run).delete(run::delete_run))
        .route("/runs/{id}/stop", post(run::stop_run))
        .route("/runs/{id}/logs", get(run::stream_run_logs))
        // Per-script history
        .route("/scripts/{script_id}/runs", get(run::list_script_runs))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
