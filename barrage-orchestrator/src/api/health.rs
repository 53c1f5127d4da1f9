//! Health Check API Handler
//!
//! Liveness probe that also reports how many runs are in flight.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub live_runs: usize,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        live_runs: state.runs.live_count(),
    })
}
