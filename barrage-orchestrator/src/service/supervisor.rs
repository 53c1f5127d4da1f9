//! Process supervisor
//!
//! Spawns the external runner for each submitted script, streams its output
//! through the run's log fan-out, and turns the process exit into a stored
//! result record. The exit path always completes: persistence and cleanup
//! failures are logged and the run still leaves the registry.

use barrage_core::domain::log::LogKind;
use barrage_core::domain::result::RunResult;
use barrage_core::domain::run::RunState;
use barrage_core::dto::run::SubmitRun;
use barrage_core::timeseries;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::repository::ResultStore;

use super::error::RunError;
use super::registry::{LiveRun, RunRegistry, StopOutcome};

/// Per-run files handed to the runner
struct RunFiles {
    script: PathBuf,
    summary: PathBuf,
}

impl RunFiles {
    fn new(work_dir: &Path, run_id: Uuid) -> Self {
        Self {
            script: work_dir.join(format!("{}.js", run_id)),
            summary: work_dir.join(format!("{}-summary.json", run_id)),
        }
    }

    /// Best-effort removal of both files
    async fn cleanup(&self) {
        for path in [&self.script, &self.summary] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Supervises runner processes for every live run
#[derive(Clone)]
pub struct RunSupervisor {
    config: Arc<Config>,
    registry: Arc<RunRegistry>,
    store: Arc<dyn ResultStore>,
}

impl RunSupervisor {
    pub fn new(config: Arc<Config>, registry: Arc<RunRegistry>, store: Arc<dyn ResultStore>) -> Self {
        Self {
            config,
            registry,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Starts a run and returns its id once the process is registered
    ///
    /// Monitoring continues in the background. On error nothing is
    /// registered and no files are left behind.
    pub async fn submit(&self, req: SubmitRun) -> Result<Uuid, RunError> {
        if req.script.trim().is_empty() {
            return Err(RunError::Validation("Script must not be empty".to_string()));
        }

        let run_id = self.allocate_id().await;
        let files = RunFiles::new(&self.config.work_dir, run_id);

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| RunError::Spawn(format!("cannot create work directory: {}", e)))?;

        if let Err(e) = tokio::fs::write(&files.script, &req.script).await {
            files.cleanup().await;
            return Err(RunError::Spawn(format!("cannot write script file: {}", e)));
        }

        let mut command = Command::new(&self.config.runner_command);
        command
            .args(&self.config.runner_args)
            .arg("run")
            .arg("--summary-export")
            .arg(&files.summary)
            .arg(&files.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(
                    "Failed to launch runner '{}' for run {}: {}",
                    self.config.runner_command, run_id, e
                );
                files.cleanup().await;
                return Err(RunError::Spawn(format!(
                    "cannot launch '{}': {}",
                    self.config.runner_command, e
                )));
            }
        };

        let run = Arc::new(LiveRun::new(
            run_id,
            req,
            child.id(),
            self.config.log_channel_capacity,
        ));
        run.log(
            LogKind::System,
            format!("Started {} (pid {})", self.config.runner_command, display_pid(child.id())),
        );
        self.registry.insert(Arc::clone(&run));

        info!("Run {} started (pid {})", run_id, display_pid(child.id()));

        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.supervise(run, child, files).await });

        Ok(run_id)
    }

    /// Signals a live run to terminate, `false` if it is not registered
    ///
    /// The run is marked `STOPPED` when the signal is sent.
    pub fn stop(&self, run_id: Uuid) -> bool {
        let Some(run) = self.registry.get(run_id) else {
            return false;
        };

        match run.request_stop() {
            StopOutcome::Requested => {
                info!("Stopping run {}", run_id);
                run.log(LogKind::System, "Stop requested");
            }
            StopOutcome::AlreadyTerminal => {
                debug!("Run {} already terminal, signalling again", run_id);
            }
            StopOutcome::Exited => return true,
        }

        if let Err(e) = run.terminate() {
            warn!("Failed to signal run {}: {}", run_id, e);
        }

        true
    }

    /// Signals every live run, returning the ids that were signalled
    pub fn stop_all(&self) -> Vec<Uuid> {
        self.registry
            .list_all()
            .into_keys()
            .filter(|id| self.stop(*id))
            .collect()
    }

    async fn allocate_id(&self) -> Uuid {
        loop {
            let id = Uuid::new_v4();
            if !self.registry.contains(id) && self.store.get(id).await.is_none() {
                return id;
            }
        }
    }

    async fn supervise(self, run: Arc<LiveRun>, mut child: Child, files: RunFiles) {
        let readers: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| spawn_output_reader(Arc::clone(&run), out, LogKind::Stdout)),
            child
                .stderr
                .take()
                .map(|err| spawn_output_reader(Arc::clone(&run), err, LogKind::Stderr)),
        ]
        .into_iter()
        .flatten()
        .collect();

        let exit_code = wait_for_exit(&run, &mut child).await;
        let ended_at = Utc::now();
        let state = run.resolve_exit(exit_code);
        debug!("Run {} exited: {} (exit code {:?})", run.id, state, exit_code);

        drain_output(run.id, readers, self.config.output_drain_timeout).await;

        self.finalize(run, exit_code, state, ended_at, files).await;
    }

    /// Replaces the live run with its result record
    async fn finalize(
        &self,
        run: Arc<LiveRun>,
        exit_code: Option<i32>,
        state: RunState,
        ended_at: DateTime<Utc>,
        files: RunFiles,
    ) {
        let series = timeseries::snapshot(&run.samples(), self.config.timeseries_max_points);

        let result = RunResult {
            run_id: run.id,
            script_id: run.script_id.clone(),
            name: run.name.clone(),
            state,
            started_at: run.started_at,
            ended_at,
            duration_ms: (ended_at - run.started_at).num_milliseconds(),
            exit_code,
            script: run.script.clone(),
            config: run.config.clone(),
            summary: read_summary(&files.summary).await,
            time_series: (!series.is_empty()).then_some(series),
        };

        match self.store.put(result).await {
            Ok(()) => {
                debug!("Persisted result for run {}", run.id);
                if let Some(script_id) = &run.script_id {
                    self.prune_history(script_id).await;
                }
            }
            Err(e) => error!("Failed to persist result for run {}: {}", run.id, e),
        }

        run.log(LogKind::System, exit_message(exit_code, state));
        run.logs().close();

        files.cleanup().await;
        self.registry.remove(run.id);

        info!(
            "Run {} finished: {} (exit code {:?})",
            run.id, state, exit_code
        );
    }

    async fn prune_history(&self, script_id: &str) {
        if self.config.max_runs_per_script == 0 {
            return;
        }
        if let Err(e) = self
            .store
            .prune_script_history(script_id, self.config.max_runs_per_script)
            .await
        {
            warn!("Failed to prune history of script {}: {}", script_id, e);
        }
    }
}

/// Waits for the process, killing it if the run asks for it
///
/// Returns `None` when no exit code is available (signal or wait failure).
async fn wait_for_exit(run: &LiveRun, child: &mut Child) -> Option<i32> {
    loop {
        tokio::select! {
            status = child.wait() => {
                return match status {
                    Ok(status) => status.code(),
                    Err(e) => {
                        run.mark_fatal(format!("Lost track of runner process: {}", e));
                        None
                    }
                };
            }
            _ = run.kill_requested() => {
                if let Err(e) = child.start_kill() {
                    warn!("Failed to kill run {}: {}", run.id, e);
                }
            }
        }
    }
}

/// Waits for the output readers to hit EOF, aborting any still open at the deadline
async fn drain_output(run_id: Uuid, readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;

    for mut reader in readers {
        match tokio::time::timeout_at(deadline, &mut reader).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Output reader for run {} failed: {}", run_id, e),
            Err(_) => {
                warn!(
                    "Output of run {} still open {:?} after exit, detaching",
                    run_id, timeout
                );
                reader.abort();
            }
        }
    }
}

/// Forwards a child stream into the run's log, one entry per line
fn spawn_output_reader<R>(run: Arc<LiveRun>, stream: R, kind: LogKind) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut segments = BufReader::new(stream).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(bytes)) => {
                    let text = String::from_utf8_lossy(&bytes);
                    // Progress bars redraw with carriage returns
                    for line in text.split('\r').filter(|l| !l.trim().is_empty()) {
                        run.record_output(kind, line);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    run.mark_fatal(format!("Failed to read runner {}: {}", kind, e));
                    break;
                }
            }
        }
    })
}

async fn read_summary(path: &Path) -> Option<serde_json::Value> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No summary exported at {}", path.display());
            return None;
        }
        Err(e) => {
            warn!("Failed to read summary {}: {}", path.display(), e);
            return None;
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(summary) => Some(summary),
        Err(e) => {
            warn!("Ignoring malformed summary {}: {}", path.display(), e);
            None
        }
    }
}

fn exit_message(exit_code: Option<i32>, state: RunState) -> String {
    match exit_code {
        Some(code) => format!("Process exited with code {} ({})", code, state),
        None => format!("Process terminated without exit code ({})", state),
    }
}

fn display_pid(pid: Option<u32>) -> String {
    pid.map_or_else(|| "unknown".to_string(), |pid| pid.to_string())
}
