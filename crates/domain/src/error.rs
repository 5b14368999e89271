//! Domain error types.

use common::AggregateId;
use outbox::OutboxError;
use thiserror::Error;

/// Errors returned by command handlers and cascades.
///
/// Callers match on the variant; [`DomainError::is_retryable`] tells the
/// consumer and saga layers whether redelivery may help.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The addressed aggregate does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: AggregateId },

    /// The aggregate exists but its state does not allow the action.
    #[error("Invalid state transition: cannot {action} {aggregate} in {state} state")]
    InvalidStateTransition {
        aggregate: &'static str,
        state: String,
        action: &'static str,
    },

    /// A create command targeted an id that is already taken.
    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: AggregateId },

    /// Another entity of the same kind already uses the name.
    #[error("{kind} name '{name}' is already taken")]
    DuplicateName { kind: &'static str, name: String },

    /// The permission code is not in the registry.
    #[error("Unknown permission: {0}")]
    UnknownPermission(String),

    /// The command is malformed or violates a structural rule.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// A synchronous cascade would touch more entities than allowed.
    #[error("Cascade '{cascade}' resolved {affected} entities, limit is {limit}")]
    FanoutExceeded {
        cascade: &'static str,
        affected: usize,
        limit: usize,
    },

    /// Cascades kept triggering further cascades past the depth limit.
    #[error("Cascade depth exceeded limit of {limit}")]
    CascadeDepthExceeded { limit: usize },

    /// An error occurred in the outbox store.
    #[error("Outbox error: {0}")]
    Store(#[from] OutboxError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if executing the same command again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::Store(err) => err.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use outbox::Version;

    use super::*;

    #[test]
    fn only_transient_store_errors_are_retryable() {
        let conflict = DomainError::Store(OutboxError::ConcurrencyConflict {
            table: "User".into(),
            key: AggregateId::new(),
            expected: Version::new(1),
            actual: Version::new(2),
        });
        assert!(conflict.is_retryable());

        let not_found = DomainError::NotFound {
            kind: "Order",
            id: AggregateId::new(),
        };
        assert!(!not_found.is_retryable());

        let fanout = DomainError::FanoutExceeded {
            cascade: "role-name",
            affected: 10,
            limit: 5,
        };
        assert!(!fanout.is_retryable());
    }
}
