//! Error taxonomy for the task queue.

use thiserror::Error;

/// Errors surfaced by the store and coordinator.
///
/// `LeaseLost` is an expected race outcome, not a failure: the losing
/// actor aborts silently. `TaskFailed` is a terminal task-level outcome,
/// distinguished from infrastructure failure (`StoreUnavailable`).
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing datastore cannot be reached or the query failed.
    /// Transient: scan ticks log and retry next interval.
    #[error("task store unavailable: {0}")]
    StoreUnavailable(String),

    /// Malformed command or timestamp at submission. Rejected before
    /// it ever reaches the store.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Status query for an unknown task id.
    #[error("task not found: {0}")]
    NotFound(String),

    /// Another actor reclaimed the lease. Hard cancellation signal for
    /// the in-flight execution; no user-visible failure.
    #[error("lease lost on task {0}")]
    LeaseLost(String),

    /// The task's execution failed, or it exhausted its lease-miss
    /// budget. A terminal task-level outcome.
    #[error("task {0} failed: {1}")]
    TaskFailed(String, String),
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        QueueError::StoreUnavailable(err.to_string())
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
