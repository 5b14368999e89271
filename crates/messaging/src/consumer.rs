//! Idempotent consumers of integration events.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::{Command, CommandBus, UnitOfWork};
use outbox::EventEnvelope;

use crate::error::{ConsumeError, Result, TransportError};
use crate::transport::{Subscriber, Transport};

/// Maps an integration event to the one command a consumer runs for it.
pub trait CommandMapping: Send + Sync {
    /// The event types the consumer subscribes to.
    fn event_types(&self) -> &'static [&'static str];

    /// Returns None for envelopes the consumer does not act on.
    fn map(&self, envelope: &EventEnvelope) -> Result<Option<Command>>;
}

/// How a delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// The command ran and its effects were committed with the ledger row.
    Applied,
    /// The ledger already had the message; nothing ran.
    Duplicate,
    /// No command is mapped for the envelope.
    Ignored,
}

impl ConsumeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumeOutcome::Applied => "applied",
            ConsumeOutcome::Duplicate => "duplicate",
            ConsumeOutcome::Ignored => "ignored",
        }
    }
}

/// Applies integration events exactly once per consumer name.
///
/// The ledger row, the command's state changes and any envelopes it appends
/// commit in one transaction, so a redelivered envelope finds the row and
/// is acknowledged without running the command again.
pub struct IntegrationConsumer {
    name: String,
    bus: CommandBus,
    mapping: Arc<dyn CommandMapping>,
    command_timeout: Duration,
}

impl IntegrationConsumer {
    pub fn new(
        name: impl Into<String>,
        bus: CommandBus,
        mapping: Arc<dyn CommandMapping>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            bus,
            mapping,
            command_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers the consumer for every event type of its mapping.
    pub async fn subscribe(self: Arc<Self>, transport: &dyn Transport) {
        for event_type in self.mapping.event_types() {
            transport.subscribe(event_type, self.clone()).await;
        }
    }

    /// Handles one delivery.
    #[tracing::instrument(
        skip(self, envelope),
        fields(consumer = %self.name, envelope_id = %envelope.id, event_type = %envelope.event_type)
    )]
    pub async fn consume(&self, envelope: &EventEnvelope) -> Result<ConsumeOutcome> {
        let result = self.try_consume(envelope).await;
        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(err) if err.is_retryable() => "retryable_error",
            Err(_) => "error",
        };
        metrics::counter!("consumer_messages_total", "consumer" => self.name.clone(), "outcome" => outcome)
            .increment(1);

        match &result {
            Ok(outcome) => tracing::debug!(outcome = outcome.as_str(), "message consumed"),
            Err(err) => tracing::warn!(error = %err, retryable = err.is_retryable(), "message rejected"),
        }
        result
    }

    async fn try_consume(&self, envelope: &EventEnvelope) -> Result<ConsumeOutcome> {
        let Some(command) = self.mapping.map(envelope)? else {
            return Ok(ConsumeOutcome::Ignored);
        };

        let mut uow = self.bus.begin().await?;
        if !uow.record_processed(envelope.id, &self.name).await? {
            self.bus.commit(uow).await?;
            return Ok(ConsumeOutcome::Duplicate);
        }
        uow.set_metadata("causation_id", serde_json::json!(envelope.id.to_string()));
        uow.set_metadata("consumer", serde_json::json!(self.name));

        let sent = tokio::time::timeout(self.command_timeout, self.bus.send_in(&mut uow, command)).await;
        let failure = match sent {
            Ok(Ok(_)) => None,
            Ok(Err(err)) => Some(ConsumeError::Command(err)),
            Err(_) => Some(ConsumeError::Timeout(self.command_timeout)),
        };
        if let Some(err) = failure {
            rollback(uow).await;
            return Err(err);
        }

        self.bus.commit(uow).await?;
        Ok(ConsumeOutcome::Applied)
    }
}

async fn rollback(uow: UnitOfWork) {
    if let Err(err) = uow.rollback().await {
        tracing::warn!(error = %err, "rollback failed");
    }
}

#[async_trait]
impl Subscriber for IntegrationConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, envelope: &EventEnvelope) -> std::result::Result<(), TransportError> {
        self.consume(envelope)
            .await
            .map(|_| ())
            .map_err(|err| TransportError::Delivery {
                subscriber: self.name.clone(),
                retryable: err.is_retryable(),
                reason: err.to_string(),
            })
    }
}
