//! Log domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single line of run output or a supervisor notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogKind,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    /// Creates an entry stamped with the current time
    pub fn now(kind: LogKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Origin of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Line read from the runner's standard output
    Stdout,
    /// Line read from the runner's standard error
    Stderr,
    /// Lifecycle notice emitted by the supervisor
    System,
    /// Fatal condition observed while supervising the process
    Error,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogKind::Stdout => write!(f, "stdout"),
            LogKind::Stderr => write!(f, "stderr"),
            LogKind::System => write!(f, "system"),
            LogKind::Error => write!(f, "error"),
        }
    }
}
