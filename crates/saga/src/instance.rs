//! Persisted saga instances.

use chrono::{DateTime, Utc};
use common::AggregateId;
use outbox::EventEnvelope;
use serde::{Deserialize, Serialize};

use crate::state::SagaStatus;

/// Why and where a saga stopped.
///
/// The triggering envelope is kept whole so an operator resume can replay
/// the failed step without the envelope being redelivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFault {
    pub step: String,
    pub reason: String,
    pub trigger: EventEnvelope,
    pub faulted_at: DateTime<Utc>,
}

/// The durable state of one saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    /// Derived from the correlation key, so redelivered triggers find it.
    pub saga_id: AggregateId,

    pub saga_type: String,

    /// Current step, in the saga type's own naming.
    pub step: String,

    /// Saga type specific data bag.
    pub data: serde_json::Value,

    pub status: SagaStatus,

    /// Bumped on every save; saves compare it first.
    pub version: i64,

    pub fault: Option<SagaFault>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// A freshly started saga at `step`.
    pub fn start(
        saga_id: AggregateId,
        saga_type: impl Into<String>,
        step: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            saga_type: saga_type.into(),
            step: step.into(),
            data,
            status: SagaStatus::Running,
            version: 1,
            fault: None,
            created_at: now,
            updated_at: now,
        }
    }
}
