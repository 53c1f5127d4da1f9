//! Core domain types
//!
//! This module contains the core domain structures used across Barrage.
//! Live runs are owned by the orchestrator's registry; result records are
//! owned by the result store once a run has terminated.

pub mod log;
pub mod result;
pub mod run;
pub mod timeseries;
