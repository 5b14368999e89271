//! Core aggregate and domain event traits.

use common::AggregateId;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// Used as the envelope discriminator and as the dispatch key.
    fn event_type(&self) -> &'static str;
}

/// Trait for state-stored aggregates.
///
/// The current state is persisted as one document per aggregate. Commands
/// decide which events happen; `apply` folds those events into the state
/// before it is saved in the same unit of work that queues the events.
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send + Sync + Sized {
    /// The type of events this aggregate produces.
    type Event: DomainEvent;

    /// Returns the aggregate type name, also used as the document table.
    fn aggregate_type() -> &'static str;

    /// Returns the aggregate's unique identifier.
    ///
    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<AggregateId>;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// Must be deterministic and must not fail.
    fn apply(&mut self, event: &Self::Event);

    /// Applies multiple events in sequence.
    fn apply_events<'a>(&mut self, events: impl IntoIterator<Item = &'a Self::Event>)
    where
        Self::Event: 'a,
    {
        for event in events {
            self.apply(event);
        }
    }
}
