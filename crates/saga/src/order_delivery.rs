//! Order delivery saga: from payment to shipment.
//!
//! ```text
//! OrderPaid ──► AwaitingDeliveryRecord
//!                 │ DeliverRecordCreated / ShipOrder
//!                 ▼
//!               AwaitingShipment
//!                 │ OrderShipped
//!                 ▼
//!               Done (Completed)
//! ```
//!
//! `OrderCancelled` faults a running saga, as does a rejected `ShipOrder`.

use common::AggregateId;
use domain::order::{DeliverRecordEvent, OrderEvent};
use domain::Command;
use outbox::EventEnvelope;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::definition::{SagaDefinition, SagaStep, Transition, Trigger};
use crate::error::Result;

pub const SAGA_TYPE: &str = "OrderDelivery";

const EVENT_TYPES: &[&str] = &[
    "OrderPaid",
    "DeliverRecordCreated",
    "OrderShipped",
    "OrderCancelled",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStep {
    AwaitingDeliveryRecord,
    AwaitingShipment,
    Done,
}

impl SagaStep for DeliveryStep {
    fn as_str(&self) -> &'static str {
        match self {
            DeliveryStep::AwaitingDeliveryRecord => "AwaitingDeliveryRecord",
            DeliveryStep::AwaitingShipment => "AwaitingShipment",
            DeliveryStep::Done => "Done",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "AwaitingDeliveryRecord" => Some(DeliveryStep::AwaitingDeliveryRecord),
            "AwaitingShipment" => Some(DeliveryStep::AwaitingShipment),
            "Done" => Some(DeliveryStep::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryData {
    pub order_id: AggregateId,
}

/// The event facts the saga reacts to, decoded from either aggregate.
enum Fact {
    Paid(AggregateId),
    RecordCreated(AggregateId),
    Shipped(AggregateId),
    Cancelled(AggregateId, String),
}

fn decode<T: DeserializeOwned>(envelope: &EventEnvelope) -> Result<T> {
    Ok(envelope.decode()?)
}

fn fact(envelope: &EventEnvelope) -> Result<Option<Fact>> {
    if envelope.event_type == "DeliverRecordCreated" {
        return Ok(match decode::<DeliverRecordEvent>(envelope)? {
            DeliverRecordEvent::DeliverRecordCreated(data) => Some(Fact::RecordCreated(data.order_id)),
        });
    }
    if !EVENT_TYPES.contains(&envelope.event_type.as_str()) {
        return Ok(None);
    }
    Ok(match decode::<OrderEvent>(envelope)? {
        OrderEvent::OrderPaid(data) => Some(Fact::Paid(data.order_id)),
        OrderEvent::OrderShipped(data) => Some(Fact::Shipped(data.order_id)),
        OrderEvent::OrderCancelled(data) => Some(Fact::Cancelled(data.order_id, data.reason)),
        OrderEvent::OrderCreated(_) => None,
    })
}

/// Ships an order once its delivery record exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderDelivery;

impl OrderDelivery {
    /// One saga per order.
    pub fn saga_id(order_id: AggregateId) -> AggregateId {
        AggregateId::derive(SAGA_TYPE, order_id)
    }
}

impl SagaDefinition for OrderDelivery {
    type Step = DeliveryStep;
    type Data = DeliveryData;

    fn saga_type(&self) -> &'static str {
        SAGA_TYPE
    }

    fn event_types(&self) -> &'static [&'static str] {
        EVENT_TYPES
    }

    fn correlate(&self, envelope: &EventEnvelope) -> Result<Option<Trigger<DeliveryStep, DeliveryData>>> {
        Ok(fact(envelope)?.map(|fact| match fact {
            Fact::Paid(order_id) => Trigger::Start {
                saga_id: Self::saga_id(order_id),
                step: DeliveryStep::AwaitingDeliveryRecord,
                data: DeliveryData { order_id },
            },
            Fact::RecordCreated(order_id) | Fact::Shipped(order_id) => Trigger::Continue {
                saga_id: Self::saga_id(order_id),
            },
            // Orders cancelled before payment never had a saga.
            Fact::Cancelled(order_id, _) => Trigger::ContinueIfStarted {
                saga_id: Self::saga_id(order_id),
            },
        }))
    }

    fn transition(
        &self,
        step: DeliveryStep,
        data: &DeliveryData,
        envelope: &EventEnvelope,
    ) -> Result<Option<Transition<DeliveryStep, DeliveryData>>> {
        let Some(fact) = fact(envelope)? else {
            return Ok(None);
        };

        Ok(match (step, fact) {
            (DeliveryStep::AwaitingDeliveryRecord, Fact::RecordCreated(_)) => Some(Transition::advance(
                DeliveryStep::AwaitingShipment,
                data.clone(),
                vec![Command::ShipOrder {
                    order_id: data.order_id,
                }],
            )),
            // A crash after ShipOrder but before the save leaves the saga a
            // step behind when OrderShipped arrives.
            (DeliveryStep::AwaitingDeliveryRecord | DeliveryStep::AwaitingShipment, Fact::Shipped(_)) => {
                Some(Transition::complete(DeliveryStep::Done, data.clone()))
            }
            (DeliveryStep::AwaitingDeliveryRecord | DeliveryStep::AwaitingShipment, Fact::Cancelled(_, reason)) => {
                Some(Transition::fault(format!("order cancelled: {reason}")))
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use domain::order::{DeliverRecordCreatedData, OrderCancelledData, OrderPaidData, OrderShippedData};
    use domain::DeliverRecord;
    use outbox::NewEnvelope;

    use super::*;

    fn envelope<T: Serialize>(event_type: &str, aggregate_type: &str, event: &T) -> EventEnvelope {
        NewEnvelope::builder()
            .event_type(event_type)
            .aggregate_id(AggregateId::new())
            .aggregate_type(aggregate_type)
            .payload(event)
            .unwrap()
            .try_build()
            .unwrap()
            .into_envelope(chrono::Utc::now())
    }

    fn paid(order_id: AggregateId) -> EventEnvelope {
        envelope(
            "OrderPaid",
            "Order",
            &OrderEvent::OrderPaid(OrderPaidData {
                order_id,
                amount_cents: 1_000,
            }),
        )
    }

    fn record_created(order_id: AggregateId) -> EventEnvelope {
        envelope(
            "DeliverRecordCreated",
            "DeliverRecord",
            &DeliverRecordEvent::DeliverRecordCreated(DeliverRecordCreatedData {
                deliver_record_id: DeliverRecord::id_for(order_id),
                order_id,
            }),
        )
    }

    #[test]
    fn payment_starts_one_saga_per_order() {
        let order_id = AggregateId::new();
        let trigger = OrderDelivery.correlate(&paid(order_id)).unwrap().unwrap();

        assert_eq!(
            trigger,
            Trigger::Start {
                saga_id: OrderDelivery::saga_id(order_id),
                step: DeliveryStep::AwaitingDeliveryRecord,
                data: DeliveryData { order_id },
            }
        );
        assert_eq!(OrderDelivery::saga_id(order_id), OrderDelivery::saga_id(order_id));
    }

    #[test]
    fn delivery_record_ships_the_order() {
        let order_id = AggregateId::new();
        let data = DeliveryData { order_id };

        let transition = OrderDelivery
            .transition(DeliveryStep::AwaitingDeliveryRecord, &data, &record_created(order_id))
            .unwrap()
            .unwrap();

        assert_eq!(
            transition,
            Transition::advance(
                DeliveryStep::AwaitingShipment,
                data,
                vec![Command::ShipOrder { order_id }]
            )
        );
    }

    #[test]
    fn repeated_delivery_record_has_no_transition_once_awaiting_shipment() {
        let order_id = AggregateId::new();
        let transition = OrderDelivery
            .transition(
                DeliveryStep::AwaitingShipment,
                &DeliveryData { order_id },
                &record_created(order_id),
            )
            .unwrap();
        assert!(transition.is_none());
    }

    #[test]
    fn shipment_completes_and_cancellation_faults() {
        let order_id = AggregateId::new();
        let data = DeliveryData { order_id };
        let shipped = envelope(
            "OrderShipped",
            "Order",
            &OrderEvent::OrderShipped(OrderShippedData { order_id }),
        );
        let cancelled = envelope(
            "OrderCancelled",
            "Order",
            &OrderEvent::OrderCancelled(OrderCancelledData {
                order_id,
                reason: "customer request".into(),
            }),
        );

        assert_eq!(
            OrderDelivery
                .transition(DeliveryStep::AwaitingShipment, &data, &shipped)
                .unwrap(),
            Some(Transition::complete(DeliveryStep::Done, data.clone()))
        );
        assert_eq!(
            OrderDelivery
                .transition(DeliveryStep::AwaitingDeliveryRecord, &data, &cancelled)
                .unwrap(),
            Some(Transition::fault("order cancelled: customer request"))
        );
        assert_eq!(
            OrderDelivery.correlate(&cancelled).unwrap(),
            Some(Trigger::ContinueIfStarted {
                saga_id: OrderDelivery::saga_id(order_id)
            })
        );
    }

    #[test]
    fn steps_round_trip_through_names() {
        for step in [
            DeliveryStep::AwaitingDeliveryRecord,
            DeliveryStep::AwaitingShipment,
            DeliveryStep::Done,
        ] {
            assert_eq!(DeliveryStep::parse(step.as_str()), Some(step));
        }
    }
}
