//! Repository Module
//!
//! Durable storage of finished runs. The `ResultStore` trait is the single
//! abstraction the services depend on; the backend is picked once at startup.
//!
//! Reads are tolerant: a missing or corrupt record is skipped (and logged)
//! rather than failing the caller. Every write applies the retention policy.

mod file;
mod memory;

use async_trait::async_trait;
use barrage_core::domain::result::RunResult;
use thiserror::Error;
use uuid::Uuid;

pub use file::FileResultStore;
pub use memory::MemoryResultStore;

/// Errors surfaced by result store writes
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize result: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persistence contract for result records
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Stores a record, then evicts the least recently modified records
    /// beyond the configured maximum
    async fn put(&self, result: RunResult) -> Result<(), StoreError>;

    /// Fetches a record, `None` if absent or unreadable
    async fn get(&self, run_id: Uuid) -> Option<RunResult>;

    /// All readable records, in no particular order
    async fn list_all(&self) -> Vec<RunResult>;

    /// Removes a record, returning `false` if it did not exist
    async fn delete(&self, run_id: Uuid) -> Result<bool, StoreError>;

    /// Records of one script, newest start time first
    async fn list_by_script(&self, script_id: &str) -> Vec<RunResult> {
        let mut results: Vec<RunResult> = self
            .list_all()
            .await
            .into_iter()
            .filter(|r| r.script_id.as_deref() == Some(script_id))
            .collect();
        results.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        results
    }

    /// Keeps only the `keep` newest records of a script
    ///
    /// Returns how many records were deleted.
    async fn prune_script_history(&self, script_id: &str, keep: usize) -> Result<usize, StoreError> {
        let history = self.list_by_script(script_id).await;
        let mut pruned = 0;

        for result in history.iter().skip(keep) {
            if self.delete(result.run_id).await? {
                pruned += 1;
            }
        }

        if pruned > 0 {
            tracing::info!(
                "Pruned {} result(s) of script {} (keeping {})",
                pruned,
                script_id,
                keep
            );
        }

        Ok(pruned)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use barrage_core::domain::result::RunResult;
    use barrage_core::domain::run::RunState;
    use chrono::DateTime;
    use uuid::Uuid;

    /// Builds a finished record starting at `started_ms`
    pub fn result(script_id: Option<&str>, started_ms: i64) -> RunResult {
        let started_at = DateTime::from_timestamp_millis(started_ms).unwrap();
        RunResult {
            run_id: Uuid::new_v4(),
            script_id: script_id.map(str::to_string),
            name: None,
            state: RunState::Completed,
            started_at,
            ended_at: started_at + chrono::Duration::seconds(1),
            duration_ms: 1000,
            exit_code: Some(0),
            script: "export default function () {}".to_string(),
            config: serde_json::Value::Null,
            summary: None,
            time_series: None,
        }
    }
}
