//! Drives saga instances from integration events.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateId;
use domain::{Command, CommandBus, DomainError, UnitOfWork};
use messaging::{Subscriber, Transport, TransportError};
use outbox::EventEnvelope;

use crate::definition::{SagaDefinition, SagaStep, Transition, Trigger};
use crate::error::{Result, SagaError};
use crate::instance::{SagaFault, SagaInstance};
use crate::state::SagaStatus;
use crate::store::SagaStore;

/// What handling one envelope did to its saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaOutcome {
    /// A new instance was persisted.
    Started,
    /// The start trigger was redelivered; nothing changed.
    AlreadyStarted,
    /// A step ran and the instance was saved with this status.
    Advanced(SagaStatus),
    /// The step failed and the instance is now Faulted.
    Faulted,
    /// The envelope does not move the saga.
    Ignored,
}

impl SagaOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaOutcome::Started => "started",
            SagaOutcome::AlreadyStarted => "already_started",
            SagaOutcome::Advanced(SagaStatus::Completed) => "completed",
            SagaOutcome::Advanced(_) => "advanced",
            SagaOutcome::Faulted => "faulted",
            SagaOutcome::Ignored => "ignored",
        }
    }
}

/// Runs one saga type.
///
/// Each step loads the last saved instance, applies the transition,
/// executes the emitted commands in one unit of work and then saves the
/// instance under its version. A crash between the commands and the save
/// re-runs the step on redelivery, so emitted commands must be idempotent.
/// Faulted sagas never retry on their own: they move again only when the
/// event that faulted them is delivered again, or on [`Self::resume`].
pub struct SagaCoordinator<D: SagaDefinition> {
    definition: D,
    store: Arc<dyn SagaStore>,
    bus: CommandBus,
}

impl<D: SagaDefinition> SagaCoordinator<D> {
    pub fn new(definition: D, store: Arc<dyn SagaStore>, bus: CommandBus) -> Self {
        Self {
            definition,
            store,
            bus,
        }
    }

    pub fn saga_type(&self) -> &'static str {
        self.definition.saga_type()
    }

    pub fn store(&self) -> &Arc<dyn SagaStore> {
        &self.store
    }

    /// Registers the coordinator for every event type of its saga.
    pub async fn subscribe(self: Arc<Self>, transport: &dyn Transport) {
        for event_type in self.definition.event_types() {
            transport.subscribe(event_type, self.clone()).await;
        }
    }

    /// Persists a Running instance. Starting an existing saga is a no-op.
    ///
    /// Returns true if this call created the instance.
    pub async fn start(&self, saga_id: AggregateId, step: D::Step, data: &D::Data) -> Result<bool> {
        let instance = SagaInstance::start(
            saga_id,
            self.saga_type(),
            step.as_str(),
            serde_json::to_value(data)?,
        );
        let created = self.store.create(&instance).await?;
        if created {
            tracing::info!(%saga_id, saga_type = self.saga_type(), step = step.as_str(), "saga started");
            self.record(SagaStatus::Running);
        }
        Ok(created)
    }

    /// Applies one integration event to the saga it correlates with.
    #[tracing::instrument(
        skip(self, envelope),
        fields(saga_type = self.saga_type(), envelope_id = %envelope.id, event_type = %envelope.event_type)
    )]
    pub async fn handle_event(&self, envelope: &EventEnvelope) -> Result<SagaOutcome> {
        let result = self.try_handle(envelope).await;
        match &result {
            Ok(outcome) => tracing::debug!(outcome = outcome.as_str(), "saga event handled"),
            Err(err) => tracing::warn!(error = %err, retryable = err.is_retryable(), "saga event rejected"),
        }
        result
    }

    async fn try_handle(&self, envelope: &EventEnvelope) -> Result<SagaOutcome> {
        let Some(trigger) = self.definition.correlate(envelope)? else {
            return Ok(SagaOutcome::Ignored);
        };

        let (saga_id, required) = match trigger {
            Trigger::Start {
                saga_id,
                step,
                data,
            } => {
                return Ok(if self.start(saga_id, step, &data).await? {
                    SagaOutcome::Started
                } else {
                    SagaOutcome::AlreadyStarted
                });
            }
            Trigger::Continue { saga_id } => (saga_id, true),
            Trigger::ContinueIfStarted { saga_id } => (saga_id, false),
        };

        let Some(instance) = self.store.load(saga_id).await? else {
            return if required {
                Err(SagaError::NotStarted(saga_id))
            } else {
                Ok(SagaOutcome::Ignored)
            };
        };
        self.check_type(&instance)?;

        match instance.status {
            SagaStatus::Running => {}
            SagaStatus::Completed => return Ok(SagaOutcome::Ignored),
            SagaStatus::Faulted => {
                let same_trigger = instance
                    .fault
                    .as_ref()
                    .is_some_and(|fault| fault.trigger.event_type == envelope.event_type);
                if !same_trigger {
                    return Ok(SagaOutcome::Ignored);
                }
                tracing::info!(%saga_id, "faulted saga re-triggered");
            }
        }

        self.run_step(instance, envelope).await
    }

    /// Re-runs the failed step of a Faulted saga with its stored trigger.
    #[tracing::instrument(skip(self), fields(saga_type = self.saga_type()))]
    pub async fn resume(&self, saga_id: AggregateId) -> Result<SagaOutcome> {
        let instance = self
            .store
            .load(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))?;
        self.check_type(&instance)?;

        let trigger = match (&instance.status, &instance.fault) {
            (SagaStatus::Faulted, Some(fault)) => fault.trigger.clone(),
            (status, _) => {
                return Err(SagaError::InvalidStatus {
                    saga_id,
                    expected: SagaStatus::Faulted,
                    actual: *status,
                });
            }
        };

        tracing::info!(%saga_id, event_type = %trigger.event_type, "resuming faulted saga");
        self.run_step(instance, &trigger).await
    }

    pub async fn load(&self, saga_id: AggregateId) -> Result<Option<SagaInstance>> {
        self.store.load(saga_id).await
    }

    async fn run_step(&self, instance: SagaInstance, envelope: &EventEnvelope) -> Result<SagaOutcome> {
        let step = D::Step::parse(&instance.step).ok_or_else(|| SagaError::UnknownStep {
            saga_type: instance.saga_type.clone(),
            step: instance.step.clone(),
        })?;
        let data: D::Data = serde_json::from_value(instance.data.clone())?;

        let transition = match self.definition.transition(step, &data, envelope)? {
            Some(transition) => transition,
            None if self.definition.faults_on_undefined(step, &envelope.event_type) => {
                Transition::fault(format!(
                    "{} is not expected in step {}",
                    envelope.event_type,
                    step.as_str()
                ))
            }
            None => return Ok(SagaOutcome::Ignored),
        };

        match transition {
            Transition::Fault { reason } => self.fault(instance, reason, envelope).await,
            Transition::Next {
                step: next,
                data,
                commands,
                status,
            } => {
                if let Err(err) = self.execute(&instance, envelope, commands).await {
                    if err.is_retryable() {
                        return Err(err.into());
                    }
                    return self.fault(instance, err.to_string(), envelope).await;
                }

                let expected = instance.version;
                let next_instance = SagaInstance {
                    step: next.as_str().to_string(),
                    data: serde_json::to_value(&data)?,
                    status,
                    version: expected + 1,
                    fault: None,
                    updated_at: Utc::now(),
                    ..instance
                };
                self.store.save(&next_instance, expected).await?;

                tracing::info!(
                    saga_id = %next_instance.saga_id,
                    from = step.as_str(),
                    to = next.as_str(),
                    %status,
                    "saga advanced"
                );
                self.record(status);
                Ok(SagaOutcome::Advanced(status))
            }
        }
    }

    /// Runs a step's commands in one unit of work.
    async fn execute(
        &self,
        instance: &SagaInstance,
        envelope: &EventEnvelope,
        commands: Vec<Command>,
    ) -> std::result::Result<(), DomainError> {
        if commands.is_empty() {
            return Ok(());
        }

        let mut uow = self.bus.begin().await?;
        uow.set_metadata("causation_id", serde_json::json!(envelope.id.to_string()));
        uow.set_metadata("saga_id", serde_json::json!(instance.saga_id.to_string()));

        for command in commands {
            if let Err(err) = self.bus.send_in(&mut uow, command).await {
                rollback(uow).await;
                return Err(err);
            }
        }
        self.bus.commit(uow).await?;
        Ok(())
    }

    async fn fault(
        &self,
        instance: SagaInstance,
        reason: String,
        envelope: &EventEnvelope,
    ) -> Result<SagaOutcome> {
        let now = Utc::now();
        let expected = instance.version;
        let faulted = SagaInstance {
            status: SagaStatus::Faulted,
            version: expected + 1,
            fault: Some(SagaFault {
                step: instance.step.clone(),
                reason,
                trigger: envelope.clone(),
                faulted_at: now,
            }),
            updated_at: now,
            ..instance
        };
        self.store.save(&faulted, expected).await?;

        if let Some(fault) = &faulted.fault {
            tracing::error!(
                saga_id = %faulted.saga_id,
                step = %fault.step,
                reason = %fault.reason,
                "saga faulted"
            );
        }
        self.record(SagaStatus::Faulted);
        Ok(SagaOutcome::Faulted)
    }

    fn check_type(&self, instance: &SagaInstance) -> Result<()> {
        if instance.saga_type == self.saga_type() {
            Ok(())
        } else {
            Err(SagaError::WrongType {
                saga_id: instance.saga_id,
                expected: self.saga_type(),
                actual: instance.saga_type.clone(),
            })
        }
    }

    fn record(&self, status: SagaStatus) {
        metrics::counter!(
            "saga_transitions_total",
            "saga_type" => self.saga_type(),
            "status" => status.as_str()
        )
        .increment(1);
    }
}

async fn rollback(uow: UnitOfWork) {
    if let Err(err) = uow.rollback().await {
        tracing::warn!(error = %err, "rollback failed");
    }
}

#[async_trait]
impl<D: SagaDefinition> Subscriber for SagaCoordinator<D> {
    fn name(&self) -> &str {
        self.saga_type()
    }

    async fn deliver(&self, envelope: &EventEnvelope) -> std::result::Result<(), TransportError> {
        self.handle_event(envelope)
            .await
            .map(|_| ())
            .map_err(|err| TransportError::Delivery {
                subscriber: self.saga_type().to_string(),
                retryable: err.is_retryable(),
                reason: err.to_string(),
            })
    }
}
