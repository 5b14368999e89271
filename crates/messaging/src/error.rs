//! Messaging error types.

use std::time::Duration;

use domain::DomainError;
use outbox::{EnvelopeId, OutboxError};
use thiserror::Error;

/// Errors returned by a [`Transport`](crate::Transport) when publishing.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The broker or subscriber could not be reached.
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// Publishing did not finish within the relay's timeout.
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    /// A subscriber rejected the envelope.
    #[error("Subscriber '{subscriber}' rejected delivery: {reason}")]
    Delivery {
        subscriber: String,
        reason: String,
        retryable: bool,
    },
}

impl TransportError {
    /// Returns true if publishing the same envelope again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Unavailable(_) | TransportError::Timeout(_) => true,
            TransportError::Delivery { retryable, .. } => *retryable,
        }
    }
}

/// Relay settings that would let a live relay's claims be recovered.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayConfigError {
    #[error(
        "stale_after ({stale_after:?}) must be more than twice publish_timeout ({publish_timeout:?})"
    )]
    StaleAfterTooShort {
        stale_after: Duration,
        publish_timeout: Duration,
    },
}

/// Errors returned while consuming an integration event.
///
/// A consume error means nothing was committed: no ledger row and no side
/// effect.
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// The payload does not match the event type.
    #[error("Cannot decode envelope {id}: {source}")]
    Decode {
        id: EnvelopeId,
        #[source]
        source: serde_json::Error,
    },

    /// The mapped command failed.
    #[error("Command failed: {0}")]
    Command(#[from] DomainError),

    /// The mapped command did not finish in time.
    #[error("Command timed out after {0:?}")]
    Timeout(Duration),
}

impl ConsumeError {
    /// Returns true if redelivering the envelope may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ConsumeError::Decode { .. } => false,
            ConsumeError::Command(err) => err.is_retryable(),
            ConsumeError::Timeout(_) => true,
        }
    }
}

impl From<OutboxError> for ConsumeError {
    fn from(err: OutboxError) -> Self {
        ConsumeError::Command(DomainError::Store(err))
    }
}

/// Result type for consumer operations.
pub type Result<T> = std::result::Result<T, ConsumeError>;

#[cfg(test)]
mod tests {
    use common::AggregateId;

    use super::*;

    #[test]
    fn timeouts_and_outages_are_retryable() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::Unavailable("down".into()).is_retryable());
        assert!(
            !TransportError::Delivery {
                subscriber: "delivery".into(),
                reason: "bad payload".into(),
                retryable: false,
            }
            .is_retryable()
        );
    }

    #[test]
    fn consume_errors_follow_the_command_error() {
        let missing = ConsumeError::Command(DomainError::NotFound {
            kind: "Order",
            id: AggregateId::new(),
        });
        assert!(!missing.is_retryable());
        assert!(ConsumeError::Timeout(Duration::from_millis(10)).is_retryable());

        let decode = ConsumeError::Decode {
            id: EnvelopeId::new(),
            source: serde_json::from_str::<u8>("x").unwrap_err(),
        };
        assert!(!decode.is_retryable());
    }
}
