//! Result record domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::RunState;
use crate::domain::timeseries::TimeSeriesSample;

/// Durable record of a finished run
///
/// Replaces the live run once the process has exited. Owned by the result
/// store until evicted or deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub script_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub exit_code: Option<i32>,
    pub script: String,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Summary exported by the runner, `None` if missing or unreadable
    pub summary: Option<serde_json::Value>,
    #[serde(default)]
    pub time_series: Option<Vec<TimeSeriesSample>>,
}
