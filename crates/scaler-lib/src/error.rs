//! Error taxonomy shared by the metrics pipeline and the scaling controller

use thiserror::Error;

/// Result type alias for scaler operations.
pub type ScalerResult<T> = Result<T, ScalerError>;

/// Errors surfaced by the pipeline, the controller and their collaborators.
///
/// Every variant is reported through an invocation result; none of them
/// is allowed to take down the host process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScalerError {
    /// Malformed transport envelope; fatal for the batch
    #[error("failed to decode log batch: {0}")]
    Decode(String),

    /// No record in the batch passed field validation
    #[error("batch contained no valid samples ({skipped} records skipped)")]
    EmptyBatch { skipped: usize },

    /// Metrics backend rejected the datapoints or was unreachable
    #[error("failed to publish metrics: {0}")]
    Publish(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid candidate or request; never retried
    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic-concurrency check lost a race
    #[error("conflict: {0}")]
    Conflict(String),

    /// Network timeout or throttling; retried with backoff
    #[error("transient failure: {0}")]
    Transient(String),
}

impl ScalerError {
    /// Whether the retry layer may try the call again
    pub fn is_transient(&self) -> bool {
        matches!(self, ScalerError::Transient(_))
    }

    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ScalerError::Decode(_) => "decode",
            ScalerError::EmptyBatch { .. } => "empty_batch",
            ScalerError::Publish(_) => "publish",
            ScalerError::NotFound(_) => "not_found",
            ScalerError::Validation(_) => "validation",
            ScalerError::Conflict(_) => "conflict",
            ScalerError::Transient(_) => "transient",
        }
    }
}
