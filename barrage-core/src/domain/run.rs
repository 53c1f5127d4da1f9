//! Run domain types

use serde::{Deserialize, Serialize};

/// Lifecycle state of a run
///
/// `Running` is the only non-terminal state. A run leaves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Running)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Running => write!(f, "RUNNING"),
            RunState::Completed => write!(f, "COMPLETED"),
            RunState::Failed => write!(f, "FAILED"),
            RunState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Why the supervisor expects the process to end
///
/// Consulted when the exit event arrives so that an explicit stop or an
/// earlier fatal error always wins over the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitIntent {
    #[default]
    Natural,
    StopRequested,
    Fatal,
}

impl ExitIntent {
    /// Resolves the terminal state for a process exit
    ///
    /// `exit_code` is `None` when the process was killed by a signal.
    pub fn resolve(self, exit_code: Option<i32>) -> RunState {
        match self {
            ExitIntent::StopRequested => RunState::Stopped,
            ExitIntent::Fatal => RunState::Failed,
            ExitIntent::Natural => match exit_code {
                Some(0) => RunState::Completed,
                _ => RunState::Failed,
            },
        }
    }
}
