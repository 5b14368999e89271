//! Transactional unit of work shared by a command and its cascades.

use std::collections::{HashMap, VecDeque};

use chrono::Duration;
use common::AggregateId;
use outbox::{Database, EnvelopeId, NewEnvelope, Transaction};
use serde::de::DeserializeOwned;

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::Result;
use crate::routing::{Propagation, propagation_of};

/// A domain event raised inside a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct RaisedEvent {
    pub aggregate_id: AggregateId,
    pub aggregate_type: &'static str,
    pub event_type: &'static str,
    pub payload: serde_json::Value,
    /// Set when the event was routed to the outbox.
    pub envelope_id: Option<EnvelopeId>,
}

impl RaisedEvent {
    /// Captures an aggregate's event.
    pub fn new<A: Aggregate>(aggregate_id: AggregateId, event: &A::Event) -> Result<Self> {
        Ok(Self {
            aggregate_id,
            aggregate_type: A::aggregate_type(),
            event_type: event.event_type(),
            payload: serde_json::to_value(event)?,
            envelope_id: None,
        })
    }

    /// Deserializes the payload into a concrete event type.
    pub fn decode<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }
}

/// What a committed unit of work made visible.
#[derive(Debug, Clone, Default)]
pub struct Committed {
    pub events: Vec<RaisedEvent>,
}

impl Committed {
    /// Ids of the envelopes appended to the outbox.
    pub fn envelope_ids(&self) -> Vec<EnvelopeId> {
        self.events.iter().filter_map(|e| e.envelope_id).collect()
    }

    pub fn has_envelopes(&self) -> bool {
        self.events.iter().any(|e| e.envelope_id.is_some())
    }
}

/// One open transaction plus the events raised in it.
///
/// Raising an event appends its envelope (when routed to the outbox) in the
/// same transaction and queues it for in-process dispatch. Dropping the unit
/// of work without committing rolls everything back.
pub struct UnitOfWork {
    tx: Box<dyn Transaction>,
    pending: VecDeque<RaisedEvent>,
    raised: Vec<RaisedEvent>,
    metadata: HashMap<String, serde_json::Value>,
}

impl UnitOfWork {
    /// Opens a transaction on `database`.
    pub async fn begin(database: &dyn Database) -> Result<Self> {
        Ok(Self {
            tx: database.begin().await?,
            pending: VecDeque::new(),
            raised: Vec::new(),
            metadata: HashMap::new(),
        })
    }

    /// The underlying transaction, for reads and document writes.
    pub fn tx(&mut self) -> &mut dyn Transaction {
        self.tx.as_mut()
    }

    /// Adds a metadata entry to every envelope appended from now on.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Records a processed-message ledger row in this transaction.
    pub async fn record_processed(
        &mut self,
        message_id: EnvelopeId,
        consumer_name: &str,
    ) -> Result<bool> {
        Ok(self.tx.record_processed(message_id, consumer_name).await?)
    }

    /// Raises an event: appends it to the outbox if it is routed there and
    /// queues it for in-process dispatch.
    pub async fn raise(&mut self, mut event: RaisedEvent) -> Result<()> {
        if let Propagation::Integration { ttl_secs } = propagation_of(event.event_type) {
            let mut builder = NewEnvelope::builder()
                .event_type(event.event_type)
                .aggregate_id(event.aggregate_id)
                .aggregate_type(event.aggregate_type)
                .payload_raw(event.payload.clone());
            for (key, value) in &self.metadata {
                builder = builder.metadata(key.clone(), value.clone());
            }
            if let Some(secs) = ttl_secs {
                builder = builder.ttl(Duration::seconds(secs));
            }
            let id = self.tx.append(builder.try_build()?).await?;
            tracing::debug!(envelope_id = %id, event_type = event.event_type, "envelope appended");
            event.envelope_id = Some(id);
        }

        self.pending.push_back(event.clone());
        self.raised.push(event);
        Ok(())
    }

    /// Takes the next event that has not been dispatched yet.
    pub fn next_pending(&mut self) -> Option<RaisedEvent> {
        self.pending.pop_front()
    }

    /// Events raised so far, in order.
    pub fn raised(&self) -> &[RaisedEvent] {
        &self.raised
    }

    /// Commits the transaction.
    pub async fn commit(self) -> Result<Committed> {
        self.tx.commit().await?;
        Ok(Committed {
            events: self.raised,
        })
    }

    /// Rolls the transaction back.
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
