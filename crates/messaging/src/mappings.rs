//! The consumers shipped with the engine and their event-to-command maps.

use std::sync::Arc;
use std::time::Duration;

use domain::{Command, CommandBus, DepartmentEvent, OrderEvent};
use outbox::EventEnvelope;
use serde::de::DeserializeOwned;

use crate::consumer::{CommandMapping, IntegrationConsumer};
use crate::error::{ConsumeError, Result};

fn decode<T: DeserializeOwned>(envelope: &EventEnvelope) -> Result<T> {
    envelope.decode().map_err(|source| ConsumeError::Decode {
        id: envelope.id,
        source,
    })
}

/// `OrderPaid` opens the order's delivery record.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeliveryMapping;

impl CommandMapping for DeliveryMapping {
    fn event_types(&self) -> &'static [&'static str] {
        &["OrderPaid"]
    }

    fn map(&self, envelope: &EventEnvelope) -> Result<Option<Command>> {
        if envelope.event_type != "OrderPaid" {
            return Ok(None);
        }
        Ok(match decode::<OrderEvent>(envelope)? {
            OrderEvent::OrderPaid(data) => Some(Command::CreateDeliverRecord {
                order_id: data.order_id,
            }),
            _ => None,
        })
    }
}

/// `DepartmentRenamed` refreshes the department copies of its members.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectoryMapping;

impl CommandMapping for DirectoryMapping {
    fn event_types(&self) -> &'static [&'static str] {
        &["DepartmentRenamed"]
    }

    fn map(&self, envelope: &EventEnvelope) -> Result<Option<Command>> {
        if envelope.event_type != "DepartmentRenamed" {
            return Ok(None);
        }
        Ok(match decode::<DepartmentEvent>(envelope)? {
            DepartmentEvent::DepartmentRenamed {
                department_id,
                name,
                revision,
                ..
            } => Some(Command::RefreshDepartmentCopies {
                department_id,
                name,
                revision,
            }),
            _ => None,
        })
    }
}

impl IntegrationConsumer {
    /// The `delivery` consumer.
    pub fn delivery(bus: CommandBus, command_timeout: Duration) -> Self {
        Self::new("delivery", bus, Arc::new(DeliveryMapping), command_timeout)
    }

    /// The `directory` consumer.
    pub fn directory(bus: CommandBus, command_timeout: Duration) -> Self {
        Self::new("directory", bus, Arc::new(DirectoryMapping), command_timeout)
    }
}

/// Every shipped consumer, in subscription order.
pub fn default_consumers(bus: &CommandBus, command_timeout: Duration) -> Vec<Arc<IntegrationConsumer>> {
    vec![
        Arc::new(IntegrationConsumer::delivery(bus.clone(), command_timeout)),
        Arc::new(IntegrationConsumer::directory(bus.clone(), command_timeout)),
    ]
}
