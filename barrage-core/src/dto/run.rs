//! Run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::log::LogEntry;
use crate::domain::result::RunResult;
use crate::domain::run::RunState;
use crate::domain::timeseries::TimeSeriesSample;

/// Maximum number of characters kept in a script preview
pub const SCRIPT_PREVIEW_CHARS: usize = 100;

/// Request to start a new run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRun {
    pub script: String,
    #[serde(default)]
    pub script_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Opaque runner configuration, stored alongside the result
    #[serde(default)]
    pub config: Option<serde_json::Value>,
}

/// Response to a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCreated {
    pub run_id: Uuid,
}

/// Lightweight run projection for listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub script_id: Option<String>,
    pub name: Option<String>,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub script_preview: String,
}

impl RunSummary {
    /// Cursor value of this entry (start time in epoch milliseconds)
    pub fn cursor(&self) -> i64 {
        self.started_at.timestamp_millis()
    }
}

impl From<&RunResult> for RunSummary {
    fn from(result: &RunResult) -> Self {
        Self {
            id: result.run_id,
            script_id: result.script_id.clone(),
            name: result.name.clone(),
            state: result.state,
            started_at: result.started_at,
            ended_at: Some(result.ended_at),
            duration_ms: Some(result.duration_ms),
            exit_code: result.exit_code,
            script_preview: script_preview(&result.script),
        }
    }
}

/// Full view of a run, live or archived
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    pub id: Uuid,
    pub script_id: Option<String>,
    pub name: Option<String>,
    pub state: RunState,
    /// True while the run is still owned by the live registry
    pub live: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub script: String,
    pub config: serde_json::Value,
    pub summary: Option<serde_json::Value>,
    pub time_series: Vec<TimeSeriesSample>,
    /// Buffered output, only present for live runs
    pub logs: Option<Vec<LogEntry>>,
}

impl From<RunResult> for RunDetail {
    fn from(result: RunResult) -> Self {
        Self {
            id: result.run_id,
            script_id: result.script_id,
            name: result.name,
            state: result.state,
            live: false,
            started_at: result.started_at,
            ended_at: Some(result.ended_at),
            duration_ms: Some(result.duration_ms),
            exit_code: result.exit_code,
            script: result.script,
            config: result.config,
            summary: result.summary,
            time_series: result.time_series.unwrap_or_default(),
            logs: None,
        }
    }
}

/// One page of the merged run listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunPage {
    pub runs: Vec<RunSummary>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    /// Start time (epoch ms) of the last returned run, when more remain
    pub next_cursor: Option<i64>,
    pub has_more: bool,
}

/// Truncates a script to its first `SCRIPT_PREVIEW_CHARS` characters
pub fn script_preview(script: &str) -> String {
    match script.char_indices().nth(SCRIPT_PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &script[..idx]),
        None => script.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_preview_short() {
        assert_eq!(script_preview("export default () => {}"), "export default () => {}");
    }

    #[test]
    fn test_script_preview_truncates_on_char_boundary() {
        let script = "é".repeat(150);
        let preview = script_preview(&script);
        assert_eq!(preview.chars().count(), SCRIPT_PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn test_submit_run_minimal_body() {
        let req: SubmitRun = serde_json::from_str(r#"{"script": "x"}"#).unwrap();
        assert_eq!(req.script, "x");
        assert!(req.script_id.is_none());
        assert!(req.config.is_none());
    }
}
