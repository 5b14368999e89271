use thiserror::Error;

use crate::{AggregateId, EnvelopeId, Version};

/// Errors that can occur when interacting with the outbox store.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// A document was saved with a stale expected version.
    #[error(
        "Concurrency conflict on {table}/{key}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        table: String,
        key: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// The envelope does not exist (or has been archived).
    #[error("Envelope not found: {0}")]
    EnvelopeNotFound(EnvelopeId),

    /// An envelope could not be built from the given parts.
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// A stored row could not be mapped back into a value.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OutboxError {
    /// Returns true if repeating the operation may succeed.
    ///
    /// Version conflicts and connectivity problems are transient; malformed
    /// data and missing rows are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            OutboxError::ConcurrencyConflict { .. } => true,
            OutboxError::Database(err) => !matches!(
                err,
                sqlx::Error::RowNotFound
                    | sqlx::Error::ColumnNotFound(_)
                    | sqlx::Error::ColumnDecode { .. }
                    | sqlx::Error::TypeNotFound { .. }
            ),
            OutboxError::EnvelopeNotFound(_)
            | OutboxError::InvalidEnvelope(_)
            | OutboxError::Corrupt(_)
            | OutboxError::Migration(_)
            | OutboxError::Serialization(_) => false,
        }
    }
}

/// Result type for outbox operations.
pub type Result<T> = std::result::Result<T, OutboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_retryable() {
        let err = OutboxError::ConcurrencyConflict {
            table: "Role".into(),
            key: AggregateId::new(),
            expected: Version::new(1),
            actual: Version::new(2),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn bad_data_is_terminal() {
        assert!(!OutboxError::InvalidEnvelope("payload is required".into()).is_retryable());
        assert!(!OutboxError::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(OutboxError::Database(sqlx::Error::PoolTimedOut).is_retryable());
    }
}
