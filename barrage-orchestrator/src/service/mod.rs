//! Service Module
//!
//! Business logic layer for the orchestrator.
//! The supervisor owns process lifecycles, the registry owns live runs and
//! the query service merges live and stored state for callers.

pub mod error;
pub mod fanout;
pub mod query;
pub mod registry;
pub mod supervisor;

pub use error::RunError;
pub use query::{LogStream, RunQueryService};
pub use registry::RunRegistry;
pub use supervisor::RunSupervisor;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
