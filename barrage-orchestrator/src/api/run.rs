//! Run API Handlers
//!
//! HTTP endpoints for submitting, observing and managing runs.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use barrage_core::domain::log::LogEntry;
use barrage_core::dto::run::{RunCreated, RunDetail, RunPage, RunSummary, SubmitRun};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::LogStream;

// =============================================================================
// Run Lifecycle Endpoints
// =============================================================================

/// POST /runs
/// Start a new run of the submitted script
pub async fn submit_run(
    State(state): State<AppState>,
    Json(req): Json<SubmitRun>,
) -> ApiResult<(StatusCode, Json<RunCreated>)> {
    tracing::info!(
        "Submitting run for script {}",
        req.script_id.as_deref().unwrap_or("<inline>")
    );

    let run_id = state.runs.submit(req).await?;

    Ok((StatusCode::CREATED, Json(RunCreated { run_id })))
}

/// GET /runs
/// List live and finished runs, newest first
///
/// Query parameters:
/// - `limit` (optional): page size, 1..=500, default 100
/// - `cursor` (optional): `next_cursor` of the previous page
pub async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<ListRunsQuery>,
) -> ApiResult<Json<RunPage>> {
    tracing::debug!("Listing runs (limit {:?}, cursor {:?})", params.limit, params.cursor);

    let page = state.runs.list_runs(params.limit, params.cursor).await?;

    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub limit: Option<usize>,
    pub cursor: Option<i64>,
}

/// GET /runs/{id}
/// Get run details by ID
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunDetail>> {
    tracing::debug!("Getting run: {}", id);

    let run = state.runs.get_run(id).await?;

    Ok(Json(run))
}

/// POST /runs/{id}/stop
/// Ask a live run to terminate
pub async fn stop_run(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    tracing::info!("Stopping run: {}", id);

    state.runs.stop_run(id).await?;

    Ok(StatusCode::ACCEPTED)
}

/// POST /runs/stop-all
/// Signal every live run
pub async fn stop_all_runs(State(state): State<AppState>) -> Json<StoppedRuns> {
    let stopped = state.runs.stop_all();
    tracing::info!("Stop requested for {} run(s)", stopped.len());

    Json(StoppedRuns { stopped })
}

#[derive(Debug, Serialize)]
pub struct StoppedRuns {
    pub stopped: Vec<Uuid>,
}

/// DELETE /runs/{id}
/// Delete a finished run's result
pub async fn delete_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracing::info!("Deleting run: {}", id);

    state.runs.delete_run(id).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// GET /scripts/{script_id}/runs
/// List all runs of one script, newest first
pub async fn list_script_runs(
    State(state): State<AppState>,
    Path(script_id): Path<String>,
) -> Json<Vec<RunSummary>> {
    tracing::debug!("Listing runs for script: {}", script_id);

    Json(state.runs.list_script_runs(&script_id).await)
}

// =============================================================================
// Log Streaming
// =============================================================================

/// GET /runs/{id}/logs
/// Server-sent events: buffered output, then live entries until the run ends
pub async fn stream_run_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    tracing::debug!("Streaming logs for run: {}", id);

    let LogStream { backlog, receiver } = state.runs.stream_logs(id).await?;

    let live = BroadcastStream::new(receiver).filter_map(move |item| match item {
        Ok(entry) => Some(entry),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!("Log observer of run {} lagged, skipped {} entries", id, skipped);
            None
        }
    });

    let events = tokio_stream::iter(backlog)
        .chain(live)
        .map(|entry: LogEntry| Event::default().json_data(entry));

    Ok(Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(state.heartbeat_interval)
            .text("heartbeat"),
    ))
}
