//! In-process dispatch of domain events.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::Command;
use crate::error::Result;
use crate::unit_of_work::{RaisedEvent, UnitOfWork};

/// A handler invoked synchronously inside the transaction that raised the
/// event.
///
/// Handlers read through the caller's unit of work and return the commands
/// the bus should run next, in the same transaction. They never open a
/// transaction of their own.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(&self, uow: &mut UnitOfWork, event: &RaisedEvent) -> Result<Vec<Command>>;
}

/// Routes raised events to their registered handlers.
#[derive(Default, Clone)]
pub struct DomainEventDispatcher {
    handlers: HashMap<&'static str, Vec<Arc<dyn EventHandler>>>,
}

impl DomainEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for an event type. Handlers for the same type run
    /// in registration order.
    pub fn register(&mut self, event_type: &'static str, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type).or_default().push(handler);
    }

    /// Builder form of [`DomainEventDispatcher::register`].
    pub fn with(mut self, event_type: &'static str, handler: Arc<dyn EventHandler>) -> Self {
        self.register(event_type, handler);
        self
    }

    pub fn handlers_for(&self, event_type: &str) -> &[Arc<dyn EventHandler>] {
        self.handlers.get(event_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Runs every handler registered for the event and collects their
    /// follow-up commands. The first handler error aborts dispatch.
    pub async fn dispatch(&self, uow: &mut UnitOfWork, event: &RaisedEvent) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        for handler in self.handlers_for(event.event_type) {
            let produced = handler.handle(uow, event).await.inspect_err(|err| {
                tracing::warn!(
                    handler = handler.name(),
                    event_type = event.event_type,
                    aggregate_id = %event.aggregate_id,
                    error = %err,
                    "event handler failed"
                );
            })?;
            tracing::trace!(
                handler = handler.name(),
                event_type = event.event_type,
                commands = produced.len(),
                "event handled"
            );
            commands.extend(produced);
        }
        Ok(commands)
    }
}
