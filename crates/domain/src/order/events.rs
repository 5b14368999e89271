//! Order and delivery domain events.

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events that can occur on an order aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    /// Order was placed.
    OrderCreated(OrderCreatedData),

    /// Payment was confirmed.
    OrderPaid(OrderPaidData),

    /// Order was handed to the carrier.
    OrderShipped(OrderShippedData),

    /// Order was cancelled.
    OrderCancelled(OrderCancelledData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "OrderCreated",
            OrderEvent::OrderPaid(_) => "OrderPaid",
            OrderEvent::OrderShipped(_) => "OrderShipped",
            OrderEvent::OrderCancelled(_) => "OrderCancelled",
        }
    }
}

impl OrderEvent {
    /// The order every variant refers to.
    pub fn order_id(&self) -> AggregateId {
        match self {
            OrderEvent::OrderCreated(data) => data.order_id,
            OrderEvent::OrderPaid(data) => data.order_id,
            OrderEvent::OrderShipped(data) => data.order_id,
            OrderEvent::OrderCancelled(data) => data.order_id,
        }
    }
}

/// Data for OrderCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: AggregateId,

    /// Total in cents.
    pub amount_cents: i64,
}

/// Data for OrderPaid event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPaidData {
    pub order_id: AggregateId,
    pub amount_cents: i64,
}

/// Data for OrderShipped event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderShippedData {
    pub order_id: AggregateId,
}

/// Data for OrderCancelled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: AggregateId,

    /// Reason for cancellation.
    pub reason: String,
}

/// Events that can occur on a delivery record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DeliverRecordEvent {
    /// A delivery record was opened for a paid order.
    DeliverRecordCreated(DeliverRecordCreatedData),
}

impl DomainEvent for DeliverRecordEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DeliverRecordEvent::DeliverRecordCreated(_) => "DeliverRecordCreated",
        }
    }
}

/// Data for DeliverRecordCreated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliverRecordCreatedData {
    pub deliver_record_id: AggregateId,
    pub order_id: AggregateId,
}
