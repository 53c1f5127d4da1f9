//! Run query service
//!
//! Single entry point for callers: merges live runs and stored results into
//! one newest-first listing and routes start/stop/delete to the right owner.

use barrage_core::domain::log::{LogEntry, LogKind};
use barrage_core::dto::run::{Pagination, RunDetail, RunPage, RunSummary, SubmitRun};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::repository::ResultStore;

use super::error::RunError;
use super::registry::RunRegistry;
use super::supervisor::RunSupervisor;

pub const DEFAULT_LIST_LIMIT: usize = 100;
pub const MAX_LIST_LIMIT: usize = 500;

/// Replay of buffered output followed by live entries
pub struct LogStream {
    pub backlog: Vec<LogEntry>,
    /// Closed immediately for runs that have already finished
    pub receiver: broadcast::Receiver<LogEntry>,
}

#[derive(Clone)]
pub struct RunQueryService {
    supervisor: RunSupervisor,
    registry: Arc<RunRegistry>,
    store: Arc<dyn ResultStore>,
}

impl RunQueryService {
    pub fn new(supervisor: RunSupervisor) -> Self {
        let registry = Arc::clone(supervisor.registry());
        let store = Arc::clone(supervisor.store());
        Self {
            supervisor,
            registry,
            store,
        }
    }

    pub async fn submit(&self, req: SubmitRun) -> Result<Uuid, RunError> {
        self.supervisor.submit(req).await
    }

    /// One page of live and stored runs, newest start time first
    ///
    /// `cursor` is the start time (epoch ms) of the last entry of the
    /// previous page.
    pub async fn list_runs(
        &self,
        limit: Option<usize>,
        cursor: Option<i64>,
    ) -> Result<RunPage, RunError> {
        let limit = validate_limit(limit)?;

        let live = self.registry.list_all();
        let live_ids: HashSet<Uuid> = live.keys().copied().collect();

        let mut runs: Vec<RunSummary> = live.values().map(|run| run.summary()).collect();
        runs.extend(
            self.store
                .list_all()
                .await
                .iter()
                .filter(|result| !live_ids.contains(&result.run_id))
                .map(RunSummary::from),
        );
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(paginate(runs, limit, cursor))
    }

    /// Live and stored runs of one script, newest first
    pub async fn list_script_runs(&self, script_id: &str) -> Vec<RunSummary> {
        let live = self.registry.list_all();

        let mut runs: Vec<RunSummary> = live
            .values()
            .filter(|run| run.script_id.as_deref() == Some(script_id))
            .map(|run| run.summary())
            .collect();
        runs.extend(
            self.store
                .list_by_script(script_id)
                .await
                .iter()
                .filter(|result| !live.contains_key(&result.run_id))
                .map(RunSummary::from),
        );
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs
    }

    pub async fn get_run(&self, run_id: Uuid) -> Result<RunDetail, RunError> {
        if let Some(run) = self.registry.get(run_id) {
            return Ok(run.detail());
        }

        self.store
            .get(run_id)
            .await
            .map(RunDetail::from)
            .ok_or(RunError::NotFound(run_id))
    }

    pub async fn stop_run(&self, run_id: Uuid) -> Result<(), RunError> {
        if self.supervisor.stop(run_id) {
            return Ok(());
        }

        match self.store.get(run_id).await {
            Some(result) => Err(RunError::Conflict(format!(
                "Run {} has already finished ({})",
                run_id, result.state
            ))),
            None => Err(RunError::NotFound(run_id)),
        }
    }

    /// Number of runs whose process is still supervised
    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    pub fn stop_all(&self) -> Vec<Uuid> {
        self.supervisor.stop_all()
    }

    /// Deletes a stored result; live runs must be stopped first
    pub async fn delete_run(&self, run_id: Uuid) -> Result<(), RunError> {
        if self.registry.contains(run_id) {
            return Err(RunError::Conflict(format!(
                "Run {} is still running; stop it before deleting",
                run_id
            )));
        }

        if self.store.delete(run_id).await? {
            tracing::info!("Deleted run {}", run_id);
            Ok(())
        } else {
            Err(RunError::NotFound(run_id))
        }
    }

    /// Buffered output plus a live subscription, taken atomically
    pub async fn stream_logs(&self, run_id: Uuid) -> Result<LogStream, RunError> {
        if let Some((backlog, receiver)) = self
            .registry
            .get(run_id)
            .and_then(|run| run.logs().replay_and_subscribe())
        {
            return Ok(LogStream { backlog, receiver });
        }

        let result = self
            .store
            .get(run_id)
            .await
            .ok_or(RunError::NotFound(run_id))?;

        let (_, receiver) = broadcast::channel(1);
        Ok(LogStream {
            backlog: vec![LogEntry::now(
                LogKind::System,
                format!("Run already finished ({})", result.state),
            )],
            receiver,
        })
    }
}

fn validate_limit(limit: Option<usize>) -> Result<usize, RunError> {
    match limit {
        None => Ok(DEFAULT_LIST_LIMIT),
        Some(limit) if (1..=MAX_LIST_LIMIT).contains(&limit) => Ok(limit),
        Some(limit) => Err(RunError::Validation(format!(
            "limit must be between 1 and {} (got {})",
            MAX_LIST_LIMIT, limit
        ))),
    }
}

/// Cuts one page out of a newest-first listing
///
/// The page starts after the first entry whose start time equals `cursor`.
/// If no entry matches, it starts at the first entry older than `cursor`.
fn paginate(runs: Vec<RunSummary>, limit: usize, cursor: Option<i64>) -> RunPage {
    let start = match cursor {
        None => 0,
        Some(cursor) => runs
            .iter()
            .position(|run| run.cursor() == cursor)
            .map(|idx| idx + 1)
            .or_else(|| runs.iter().position(|run| run.cursor() < cursor))
            .unwrap_or(runs.len()),
    };

    let mut page: Vec<RunSummary> = runs.into_iter().skip(start).collect();
    let has_more = page.len() > limit;
    page.truncate(limit);

    let next_cursor = if has_more {
        page.last().map(RunSummary::cursor)
    } else {
        None
    };

    RunPage {
        runs: page,
        pagination: Pagination {
            next_cursor,
            has_more,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::repository::MemoryResultStore;
    use crate::repository::testing::result;
    use barrage_core::domain::run::RunState;
    use barrage_core::dto::run::script_preview;
    use chrono::DateTime;
    use std::time::Duration;

    fn summary(started_ms: i64) -> RunSummary {
        RunSummary {
            id: Uuid::new_v4(),
            script_id: None,
            name: None,
            state: RunState::Completed,
            started_at: DateTime::from_timestamp_millis(started_ms).unwrap(),
            ended_at: None,
            duration_ms: None,
            exit_code: None,
            script_preview: script_preview("x"),
        }
    }

    fn service() -> (tempfile::TempDir, RunQueryService) {
        let dir = tempfile::tempdir().unwrap();
        let runner = dir.path().join("fake-runner.sh");
        std::fs::write(&runner, "summary=\"$3\"\n. \"$4\"\n").unwrap();

        let config = Config {
            runner_command: "/bin/sh".to_string(),
            runner_args: vec![runner.to_string_lossy().to_string()],
            work_dir: dir.path().join("work"),
            ..Config::default()
        };
        let supervisor = RunSupervisor::new(
            Arc::new(config),
            Arc::new(RunRegistry::new()),
            Arc::new(MemoryResultStore::new(100)),
        );
        (dir, RunQueryService::new(supervisor))
    }

    async fn wait_until_stored(service: &RunQueryService, run_id: Uuid) {
        for _ in 0..500 {
            if !service.registry.contains(run_id) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("run {} did not finish", run_id);
    }

    #[test]
    fn test_paginate_with_cursor() {
        let runs = vec![summary(3000), summary(2000), summary(1000)];

        let first = paginate(runs.clone(), 2, None);
        let starts: Vec<i64> = first.runs.iter().map(RunSummary::cursor).collect();
        assert_eq!(starts, vec![3000, 2000]);
        assert!(first.pagination.has_more);
        assert_eq!(first.pagination.next_cursor, Some(2000));

        let second = paginate(runs, 2, Some(2000));
        let starts: Vec<i64> = second.runs.iter().map(RunSummary::cursor).collect();
        assert_eq!(starts, vec![1000]);
        assert!(!second.pagination.has_more);
        assert_eq!(second.pagination.next_cursor, None);
    }

    #[test]
    fn test_paginate_unknown_cursor_falls_back_to_older_entries() {
        let runs = vec![summary(3000), summary(2000), summary(1000)];
        let page = paginate(runs, 10, Some(2500));
        let starts: Vec<i64> = page.runs.iter().map(RunSummary::cursor).collect();
        assert_eq!(starts, vec![2000, 1000]);

        let page = paginate(vec![summary(3000)], 10, Some(10));
        assert!(page.runs.is_empty());
    }

    #[test]
    fn test_validate_limit() {
        assert_eq!(validate_limit(None).unwrap(), DEFAULT_LIST_LIMIT);
        assert_eq!(validate_limit(Some(500)).unwrap(), 500);
        assert!(matches!(validate_limit(Some(0)), Err(RunError::Validation(_))));
        assert!(matches!(validate_limit(Some(501)), Err(RunError::Validation(_))));
    }

    #[tokio::test]
    async fn test_list_merges_live_and_stored() {
        let (_dir, service) = service();
        for started in [1000, 2000] {
            service.store.put(result(None, started)).await.unwrap();
        }

        let live_id = service
            .submit(SubmitRun {
                script: "exec sleep 30".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let page = service.list_runs(None, None).await.unwrap();
        assert_eq!(page.runs.len(), 3);
        assert_eq!(page.runs[0].id, live_id);
        assert_eq!(page.runs[0].state, RunState::Running);

        // A record written mid-transition must not show up twice
        let mut duplicate = result(None, 5000);
        duplicate.run_id = live_id;
        service.store.put(duplicate).await.unwrap();
        let page = service.list_runs(None, None).await.unwrap();
        assert_eq!(page.runs.iter().filter(|r| r.id == live_id).count(), 1);

        service.stop_all();
        wait_until_stored(&service, live_id).await;
    }

    #[tokio::test]
    async fn test_delete_live_run_conflicts_then_succeeds_once() {
        let (_dir, service) = service();
        let run_id = service
            .submit(SubmitRun {
                script: "exec sleep 30".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(matches!(
            service.delete_run(run_id).await,
            Err(RunError::Conflict(_))
        ));

        service.stop_run(run_id).await.unwrap();
        wait_until_stored(&service, run_id).await;

        assert_eq!(
            service.get_run(run_id).await.unwrap().state,
            RunState::Stopped
        );
        assert!(matches!(
            service.stop_run(run_id).await,
            Err(RunError::Conflict(_))
        ));

        service.delete_run(run_id).await.unwrap();
        assert!(matches!(
            service.delete_run(run_id).await,
            Err(RunError::NotFound(_))
        ));
        assert!(matches!(
            service.get_run(run_id).await,
            Err(RunError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_run_is_not_found() {
        let (_dir, service) = service();
        let id = Uuid::new_v4();

        assert!(matches!(service.get_run(id).await, Err(RunError::NotFound(_))));
        assert!(matches!(service.stop_run(id).await, Err(RunError::NotFound(_))));
        assert!(matches!(service.stream_logs(id).await, Err(RunError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stream_logs_replays_then_follows() {
        let (_dir, service) = service();
        let run_id = service
            .submit(SubmitRun {
                script: "echo first\nsleep 0.3\necho second".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let LogStream {
            backlog,
            mut receiver,
        } = service.stream_logs(run_id).await.unwrap();

        let mut messages: Vec<String> = backlog.into_iter().map(|e| e.message).collect();
        while let Ok(entry) = receiver.recv().await {
            messages.push(entry.message);
        }

        assert!(messages[0].starts_with("Started"));
        let first = messages.iter().position(|m| m == "first").unwrap();
        let second = messages.iter().position(|m| m == "second").unwrap();
        assert!(first < second);
        assert!(messages.last().unwrap().contains("code 0"));

        wait_until_stored(&service, run_id).await;
        let finished = service.stream_logs(run_id).await.unwrap();
        assert_eq!(finished.backlog.len(), 1);
        assert!(finished.backlog[0].message.contains("COMPLETED"));
    }

    #[tokio::test]
    async fn test_list_script_runs() {
        let (_dir, service) = service();
        service.store.put(result(Some("checkout"), 1000)).await.unwrap();
        service.store.put(result(Some("checkout"), 3000)).await.unwrap();
        service.store.put(result(Some("login"), 2000)).await.unwrap();

        let runs = service.list_script_runs("checkout").await;
        let starts: Vec<i64> = runs.iter().map(RunSummary::cursor).collect();
        assert_eq!(starts, vec![3000, 1000]);
    }
}
