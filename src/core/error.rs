//! Error types for dispatch scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler collaborators.
///
/// None of these escape [`DispatchScheduler::run`](crate::core::DispatchScheduler::run);
/// the scheduler folds them into a [`RunOutcome`](crate::core::RunOutcome).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Resource catalog or node directory unavailable.
    #[error("catalog error: {0}")]
    Catalog(String),
    /// Lease store failure (not contention, which is a plain `false`).
    #[error("lease error: {0}")]
    Lease(String),
    /// The enqueue call for a transfer job failed.
    #[error("dispatch error: {0}")]
    Dispatch(String),
    /// Registry record could not be updated.
    #[error("registry error: {0}")]
    Registry(String),
    /// Configuration rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
