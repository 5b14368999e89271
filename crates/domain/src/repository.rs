//! Loading and saving aggregates inside a unit of work.

use common::AggregateId;
use outbox::{TransactionExt, Version};

use crate::aggregate::Aggregate;
use crate::error::{DomainError, Result};
use crate::unit_of_work::{RaisedEvent, UnitOfWork};

/// An aggregate together with the document version it was read at.
#[derive(Debug, Clone)]
pub struct Loaded<A> {
    pub state: A,
    pub version: Version,
}

/// Loads an aggregate, returning None if it does not exist.
pub async fn load<A: Aggregate>(uow: &mut UnitOfWork, id: AggregateId) -> Result<Option<Loaded<A>>> {
    let loaded = uow.tx().load_as::<A>(A::aggregate_type(), id).await?;
    Ok(loaded.map(|(state, version)| Loaded { state, version }))
}

/// Loads an aggregate that must exist.
pub async fn get<A: Aggregate>(uow: &mut UnitOfWork, id: AggregateId) -> Result<A> {
    load::<A>(uow, id)
        .await?
        .map(|loaded| loaded.state)
        .ok_or(DomainError::NotFound {
            kind: A::aggregate_type(),
            id,
        })
}

/// Runs a decision against the current state of an aggregate.
///
/// `decide` receives the current state (None if the aggregate does not exist
/// yet) and returns the events that happen. When it returns events they are
/// applied, the new state is saved against the version it was read at, and
/// the events are raised into the unit of work. An empty result changes
/// nothing.
pub async fn execute<A, F>(uow: &mut UnitOfWork, id: AggregateId, decide: F) -> Result<Vec<A::Event>>
where
    A: Aggregate,
    F: FnOnce(Option<&A>) -> Result<Vec<A::Event>> + Send,
{
    let (current, version) = match load::<A>(uow, id).await? {
        Some(loaded) => (Some(loaded.state), loaded.version),
        None => (None, Version::initial()),
    };

    let events = decide(current.as_ref())?;
    if events.is_empty() {
        return Ok(events);
    }

    let mut state = current.unwrap_or_default();
    state.apply_events(&events);
    uow.tx()
        .save_as(A::aggregate_type(), id, &state, version)
        .await?;

    for event in &events {
        uow.raise(RaisedEvent::new::<A>(id, event)?).await?;
    }

    metrics::counter!("domain_events_raised_total", "aggregate" => A::aggregate_type())
        .increment(events.len() as u64);
    Ok(events)
}
