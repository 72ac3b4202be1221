//! Crate-wide error type.
//!
//! Errors are split along the recoverability lines callers care about:
//! [`MonitorError::InsufficientSamples`] is retryable (wait for more data),
//! configuration errors are caller bugs, persistence errors surface the store
//! fault without internal retries (ingestion and aggregation are idempotent,
//! so re-submission is always safe).

use thiserror::Error;

use crate::experiment::ExperimentStatus;

/// Errors produced by the monitoring and experimentation services.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A detection or evaluation was requested with fewer data points than the
    /// configured minimum. Recoverable: retry once more data has accumulated.
    #[error("insufficient samples: need {required} per side, got {baseline} baseline / {current} current")]
    InsufficientSamples {
        required: usize,
        baseline: usize,
        current: usize,
    },

    /// No experiment with the given id exists.
    #[error("experiment not found: {0}")]
    ExperimentNotFound(String),

    /// Routing or result recording was attempted against an experiment that is
    /// not in the RUNNING state.
    #[error("experiment {id} not active (status: {status:?})")]
    ExperimentNotActive {
        id: String,
        status: ExperimentStatus,
    },

    /// A configuration value was out of its valid domain (traffic split outside
    /// [0,1], non-positive window size, etc).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The backing store failed. Not retried internally.
    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MonitorError>;
