//! Run service errors

use thiserror::Error;
use uuid::Uuid;

use crate::repository::StoreError;

/// Errors surfaced to callers of the run services
#[derive(Debug, Error)]
pub enum RunError {
    /// Rejected before any state was created
    #[error("{0}")]
    Validation(String),

    #[error("Run {0} not found")]
    NotFound(Uuid),

    /// The run exists but is in the wrong state for the request
    #[error("{0}")]
    Conflict(String),

    /// The script could not be written or the runner could not be launched
    #[error("Failed to start run: {0}")]
    Spawn(String),

    #[error("Result store error: {0}")]
    Store(#[from] StoreError),
}
