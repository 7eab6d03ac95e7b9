use std::time::Duration;

use crate::codec::CodecError;
use crate::store::StoreError;

// ============================================================================
// Order Errors - failure taxonomy surfaced to callers
// ============================================================================
//
// Each variant maps to a distinct user-facing response in the (external)
// HTTP layer. The only failure the engine recovers from locally is the
// no-op transition of a terminal order, which is not an error at all.
//
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("{0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("The record is linked to other records: {0}")]
    ReferenceConstraint(String),

    #[error("{0} was changed by another request, reload and retry")]
    Conflict(String),

    #[error("Encrypted field could not be processed: {0}")]
    Codec(#[from] CodecError),

    #[error("{summary}: {source}")]
    Persistence {
        summary: String,
        #[source]
        source: StoreError,
    },

    #[error("{operation} did not complete within {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl OrderError {
    /// Lift a storage failure into the taxonomy, keeping the cause
    pub fn from_store(summary: impl Into<String>, error: StoreError) -> Self {
        match error {
            StoreError::NotFound(what) => OrderError::NotFound(what),
            StoreError::ReferenceConstraint(detail) => OrderError::ReferenceConstraint(detail),
            StoreError::Conflict(what) => OrderError::Conflict(what),
            StoreError::InsufficientStock { option_id, requested, available } => {
                OrderError::Validation(format!(
                    "Option {} has {} in stock, {} requested",
                    option_id, available, requested
                ))
            }
            other => OrderError::Persistence {
                summary: summary.into(),
                source: other,
            },
        }
    }

    /// Stable label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            OrderError::NotFound(_) => "not_found",
            OrderError::Validation(_) => "validation",
            OrderError::ReferenceConstraint(_) => "reference_constraint",
            OrderError::Conflict(_) => "conflict",
            OrderError::Codec(_) => "codec",
            OrderError::Persistence { .. } => "persistence",
            OrderError::Timeout { .. } => "timeout",
        }
    }
}
