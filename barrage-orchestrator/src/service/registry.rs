//! Run registry
//!
//! Owns every run whose process is still being supervised. A run id lives
//! here from spawn until its result has been handed to the result store.

use barrage_core::domain::log::{LogEntry, LogKind};
use barrage_core::domain::run::{ExitIntent, RunState};
use barrage_core::domain::timeseries::{RawSample, TimeSeriesSample};
use barrage_core::dto::run::{RunDetail, RunSummary, SubmitRun, script_preview};
use barrage_core::timeseries;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::{Notify, broadcast};
use uuid::Uuid;

use super::fanout::LogFanout;
use super::lock;

/// Result of asking a live run to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The run was running and is now marked `STOPPED`
    Requested,
    /// Already terminal (stopped or failed) but the process is still alive
    AlreadyTerminal,
    /// The exit has been observed; nothing left to signal
    Exited,
}

struct Status {
    state: RunState,
    intent: ExitIntent,
    exited: bool,
}

/// A run whose process is being supervised
pub struct LiveRun {
    pub id: Uuid,
    pub script_id: Option<String>,
    pub name: Option<String>,
    pub script: String,
    pub config: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pid: Option<u32>,
    status: Mutex<Status>,
    logs: LogFanout,
    samples: Mutex<Vec<RawSample>>,
    kill_switch: Notify,
}

impl LiveRun {
    pub fn new(id: Uuid, req: SubmitRun, pid: Option<u32>, log_capacity: usize) -> Self {
        Self {
            id,
            script_id: req.script_id,
            name: req.name,
            script: req.script,
            config: req.config.unwrap_or(serde_json::Value::Null),
            started_at: Utc::now(),
            pid,
            status: Mutex::new(Status {
                state: RunState::Running,
                intent: ExitIntent::Natural,
                exited: false,
            }),
            logs: LogFanout::new(log_capacity),
            samples: Mutex::new(Vec::new()),
            kill_switch: Notify::new(),
        }
    }

    pub fn state(&self) -> RunState {
        lock(&self.status).state
    }

    pub fn logs(&self) -> &LogFanout {
        &self.logs
    }

    /// Publishes a supervisor notice
    pub fn log(&self, kind: LogKind, message: impl Into<String>) {
        self.logs.publish(LogEntry::now(kind, message));
    }

    /// Publishes one output line and records it if it reports progress
    pub fn record_output(&self, kind: LogKind, line: &str) {
        if let Some(sample) = timeseries::parse_progress_line(line) {
            lock(&self.samples).push(sample);
        }
        self.log(kind, line);
    }

    pub fn samples(&self) -> Vec<RawSample> {
        lock(&self.samples).clone()
    }

    /// Current series with throughput derived from the raw samples
    pub fn time_series(&self) -> Vec<TimeSeriesSample> {
        timeseries::compute_throughput(&lock(&self.samples))
    }

    /// Records the stop intent; `STOPPED` is set now, not when the process dies
    pub fn request_stop(&self) -> StopOutcome {
        let mut status = lock(&self.status);
        if status.exited {
            return StopOutcome::Exited;
        }
        if status.state != RunState::Running {
            return StopOutcome::AlreadyTerminal;
        }

        status.state = RunState::Stopped;
        status.intent = ExitIntent::StopRequested;
        StopOutcome::Requested
    }

    /// Marks the run `FAILED` after an unrecoverable supervision error
    ///
    /// A stop requested earlier keeps precedence, and an observed exit is final.
    pub fn mark_fatal(&self, message: impl Into<String>) {
        {
            let mut status = lock(&self.status);
            if !status.exited && status.intent != ExitIntent::StopRequested {
                status.intent = ExitIntent::Fatal;
                status.state = RunState::Failed;
            }
        }
        self.log(LogKind::Error, message);
    }

    /// Settles the terminal state once the process has exited
    ///
    /// Later stop requests report `Exited` and no longer signal the pid.
    pub fn resolve_exit(&self, exit_code: Option<i32>) -> RunState {
        let mut status = lock(&self.status);
        status.exited = true;
        status.state = status.intent.resolve(exit_code);
        status.state
    }

    /// Sends the termination signal to the runner process
    pub fn terminate(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;

                let pid = i32::try_from(pid).map_err(std::io::Error::other)?;
                return kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(std::io::Error::from);
            }
        }

        self.kill_switch.notify_one();
        Ok(())
    }

    /// Resolves when the process has to be killed by its supervisor
    pub async fn kill_requested(&self) {
        self.kill_switch.notified().await;
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id,
            script_id: self.script_id.clone(),
            name: self.name.clone(),
            state: self.state(),
            started_at: self.started_at,
            ended_at: None,
            duration_ms: None,
            exit_code: None,
            script_preview: script_preview(&self.script),
        }
    }

    pub fn detail(&self) -> RunDetail {
        RunDetail {
            id: self.id,
            script_id: self.script_id.clone(),
            name: self.name.clone(),
            state: self.state(),
            live: true,
            started_at: self.started_at,
            ended_at: None,
            duration_ms: Some((Utc::now() - self.started_at).num_milliseconds()),
            exit_code: None,
            script: self.script.clone(),
            config: self.config.clone(),
            summary: None,
            time_series: self.time_series(),
            logs: Some(self.logs.snapshot()),
        }
    }
}

/// Registry of live runs, shared by handle between services
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<Uuid, Arc<LiveRun>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, run: Arc<LiveRun>) {
        self.write().insert(run.id, run);
    }

    pub fn get(&self, run_id: Uuid) -> Option<Arc<LiveRun>> {
        self.read().get(&run_id).cloned()
    }

    pub fn remove(&self, run_id: Uuid) -> Option<Arc<LiveRun>> {
        self.write().remove(&run_id)
    }

    pub fn contains(&self, run_id: Uuid) -> bool {
        self.read().contains_key(&run_id)
    }

    /// Snapshot of the live runs; may be stale as soon as it is returned
    pub fn list_all(&self) -> HashMap<Uuid, Arc<LiveRun>> {
        self.read().clone()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Subscribes to a run's future output, `None` if the run is not live
    ///
    /// Buffered output is not replayed. Dropping the receiver removes the
    /// listener.
    pub fn add_log_listener(&self, run_id: Uuid) -> Option<broadcast::Receiver<LogEntry>> {
        self.get(run_id)?.logs().subscribe()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<LiveRun>>> {
        self.runs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<LiveRun>>> {
        self.runs.write().unwrap_or_else(PoisonError::into_inner)
    }
}
