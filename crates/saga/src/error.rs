//! Saga error types.

use common::AggregateId;
use domain::DomainError;
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga instance has this id.
    #[error("Saga not found: {0}")]
    NotFound(AggregateId),

    /// An event for a saga that has not been started yet.
    #[error("Saga {0} has not been started yet")]
    NotStarted(AggregateId),

    /// The saga is in the wrong status for the requested operation.
    #[error("Saga {saga_id} is {actual}, expected {expected}")]
    InvalidStatus {
        saga_id: AggregateId,
        expected: SagaStatus,
        actual: SagaStatus,
    },

    /// The saga belongs to a different coordinator.
    #[error("Saga {saga_id} is of type {actual}, expected {expected}")]
    WrongType {
        saga_id: AggregateId,
        expected: &'static str,
        actual: String,
    },

    /// The stored step is not a step of the saga type.
    #[error("Unknown step '{step}' for saga type {saga_type}")]
    UnknownStep { saga_type: String, step: String },

    /// Another writer saved the saga first.
    #[error("Concurrency conflict on saga {saga_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        saga_id: AggregateId,
        expected: i64,
        actual: i64,
    },

    /// A stored row could not be interpreted.
    #[error("Corrupt saga row: {0}")]
    Corrupt(String),

    /// A command emitted by a step failed.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true if handling the same event again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::NotStarted(_) | SagaError::ConcurrencyConflict { .. } => true,
            SagaError::Domain(err) => err.is_retryable(),
            SagaError::Database(err) => !matches!(
                err,
                sqlx::Error::RowNotFound | sqlx::Error::ColumnNotFound(_) | sqlx::Error::ColumnDecode { .. }
            ),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_events_are_retryable() {
        assert!(SagaError::NotStarted(AggregateId::new()).is_retryable());
        assert!(!SagaError::NotFound(AggregateId::new()).is_retryable());
        assert!(
            !SagaError::Domain(DomainError::InvalidCommand("x".into())).is_retryable()
        );
    }
}
