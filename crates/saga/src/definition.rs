//! What a saga type has to provide to the coordinator.

use std::fmt::Debug;

use common::AggregateId;
use domain::Command;
use outbox::EventEnvelope;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::Result;
use crate::state::SagaStatus;

/// A step of a saga type, stored by name.
pub trait SagaStep: Copy + Eq + Debug + Send + Sync + 'static {
    fn as_str(&self) -> &'static str;

    fn parse(value: &str) -> Option<Self>;
}

/// How an envelope relates to a saga instance.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger<S, D> {
    /// Starts the saga. Starting an existing saga is a no-op.
    Start { saga_id: AggregateId, step: S, data: D },

    /// Advances an existing saga. Arriving before the start is retryable.
    Continue { saga_id: AggregateId },

    /// Advances the saga if one exists, otherwise the event is not ours.
    ContinueIfStarted { saga_id: AggregateId },
}

/// The result of applying an event to a saga step.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition<S, D> {
    /// Execute `commands`, then persist `step`, `data` and `status`.
    Next {
        step: S,
        data: D,
        commands: Vec<Command>,
        status: SagaStatus,
    },

    /// Stop the saga at its current step.
    Fault { reason: String },
}

impl<S, D> Transition<S, D> {
    pub fn advance(step: S, data: D, commands: Vec<Command>) -> Self {
        Transition::Next {
            step,
            data,
            commands,
            status: SagaStatus::Running,
        }
    }

    pub fn complete(step: S, data: D) -> Self {
        Transition::Next {
            step,
            data,
            commands: Vec::new(),
            status: SagaStatus::Completed,
        }
    }

    pub fn fault(reason: impl Into<String>) -> Self {
        Transition::Fault {
            reason: reason.into(),
        }
    }
}

/// A saga type: its steps, data and transition function.
///
/// Transitions are pure; the coordinator executes the commands they emit
/// and persists the result. Emitted commands must be idempotent because a
/// step re-runs after a crash between executing them and saving.
pub trait SagaDefinition: Send + Sync + 'static {
    type Step: SagaStep;
    type Data: Serialize + DeserializeOwned + Send + Sync;

    fn saga_type(&self) -> &'static str;

    /// Event types the coordinator subscribes to for this saga.
    fn event_types(&self) -> &'static [&'static str];

    /// Finds the saga an envelope belongs to, if any.
    fn correlate(&self, envelope: &EventEnvelope) -> Result<Option<Trigger<Self::Step, Self::Data>>>;

    /// `None` when the step defines no transition for the event.
    fn transition(
        &self,
        step: Self::Step,
        data: &Self::Data,
        envelope: &EventEnvelope,
    ) -> Result<Option<Transition<Self::Step, Self::Data>>>;

    /// Whether an event without a transition in `step` faults the saga
    /// instead of being ignored.
    fn faults_on_undefined(&self, _step: Self::Step, _event_type: &str) -> bool {
        false
    }
}
