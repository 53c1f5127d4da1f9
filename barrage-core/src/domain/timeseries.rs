//! Time-series sample types

use serde::{Deserialize, Serialize};

/// A progress point as reported by the runner
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub elapsed_seconds: f64,
    pub active_workers: u32,
    pub completed: u64,
}

/// A progress point with throughput derived from its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesSample {
    pub elapsed_seconds: f64,
    pub active_workers: u32,
    /// Completed iterations per second since the previous sample
    pub throughput: f64,
}
