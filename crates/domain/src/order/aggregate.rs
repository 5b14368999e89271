//! Order and delivery record aggregates.

use common::AggregateId;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::error::{DomainError, Result};

use super::events::{
    DeliverRecordCreatedData, DeliverRecordEvent, OrderCancelledData, OrderCreatedData,
    OrderEvent, OrderPaidData, OrderShippedData,
};
use super::state::OrderState;

/// An order placed through the back-office.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,
    amount_cents: i64,
    state: OrderState,
}

impl Aggregate for Order {
    type Event = OrderEvent;

    fn aggregate_type() -> &'static str {
        "Order"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: &OrderEvent) {
        match event {
            OrderEvent::OrderCreated(data) => {
                self.id = Some(data.order_id);
                self.amount_cents = data.amount_cents;
                self.state = OrderState::Created;
            }
            OrderEvent::OrderPaid(_) => self.state = OrderState::Paid,
            OrderEvent::OrderShipped(_) => self.state = OrderState::Shipped,
            OrderEvent::OrderCancelled(_) => self.state = OrderState::Cancelled,
        }
    }
}

impl Order {
    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn amount_cents(&self) -> i64 {
        self.amount_cents
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidStateTransition {
            aggregate: "Order",
            state: self.state.to_string(),
            action,
        }
    }

    fn require_id(&self) -> Result<AggregateId> {
        self.id
            .ok_or(DomainError::InvalidCommand("order has no id".to_string()))
    }

    pub fn create(
        existing: Option<&Order>,
        order_id: AggregateId,
        amount_cents: i64,
    ) -> Result<Vec<OrderEvent>> {
        if existing.is_some() {
            return Err(DomainError::AlreadyExists {
                kind: "Order",
                id: order_id,
            });
        }
        if amount_cents <= 0 {
            return Err(DomainError::InvalidCommand(format!(
                "amount must be positive, got {amount_cents}"
            )));
        }
        Ok(vec![OrderEvent::OrderCreated(OrderCreatedData {
            order_id,
            amount_cents,
        })])
    }

    pub fn pay(&self) -> Result<Vec<OrderEvent>> {
        if !self.state.can_pay() {
            return Err(self.invalid("pay"));
        }
        Ok(vec![OrderEvent::OrderPaid(OrderPaidData {
            order_id: self.require_id()?,
            amount_cents: self.amount_cents,
        })])
    }

    /// Ships a paid order. Shipping an order that already shipped changes
    /// nothing.
    pub fn ship(&self) -> Result<Vec<OrderEvent>> {
        if self.state == OrderState::Shipped {
            return Ok(vec![]);
        }
        if !self.state.can_ship() {
            return Err(self.invalid("ship"));
        }
        Ok(vec![OrderEvent::OrderShipped(OrderShippedData {
            order_id: self.require_id()?,
        })])
    }

    /// Cancels the order. Cancelling twice changes nothing.
    pub fn cancel(&self, reason: String) -> Result<Vec<OrderEvent>> {
        if self.state == OrderState::Cancelled {
            return Ok(vec![]);
        }
        if !self.state.can_cancel() {
            return Err(self.invalid("cancel"));
        }
        Ok(vec![OrderEvent::OrderCancelled(OrderCancelledData {
            order_id: self.require_id()?,
            reason,
        })])
    }
}

/// The delivery record opened when an order is paid.
///
/// There is at most one per order: its id is derived from the order id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliverRecord {
    id: Option<AggregateId>,
    order_id: Option<AggregateId>,
}

impl Aggregate for DeliverRecord {
    type Event = DeliverRecordEvent;

    fn aggregate_type() -> &'static str {
        "DeliverRecord"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn apply(&mut self, event: &DeliverRecordEvent) {
        match event {
            DeliverRecordEvent::DeliverRecordCreated(data) => {
                self.id = Some(data.deliver_record_id);
                self.order_id = Some(data.order_id);
            }
        }
    }
}

impl DeliverRecord {
    /// The id of the delivery record belonging to `order_id`.
    pub fn id_for(order_id: AggregateId) -> AggregateId {
        AggregateId::derive("DeliverRecord", order_id)
    }

    pub fn order_id(&self) -> Option<AggregateId> {
        self.order_id
    }

    /// Opens the record for a paid order. An existing record is kept as is.
    pub fn create(existing: Option<&DeliverRecord>, order: &Order) -> Result<Vec<DeliverRecordEvent>> {
        if existing.is_some() {
            return Ok(vec![]);
        }
        if !order.state.can_open_delivery() {
            return Err(order.invalid("open delivery for"));
        }
        let order_id = order.require_id()?;
        Ok(vec![DeliverRecordEvent::DeliverRecordCreated(
            DeliverRecordCreatedData {
                deliver_record_id: Self::id_for(order_id),
                order_id,
            },
        )])
    }
}
