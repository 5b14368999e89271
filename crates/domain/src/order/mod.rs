//! Order and delivery record aggregates.

mod aggregate;
mod events;
mod state;

pub use aggregate::{DeliverRecord, Order};
pub use events::{
    DeliverRecordCreatedData, DeliverRecordEvent, OrderCancelledData, OrderCreatedData,
    OrderEvent, OrderPaidData, OrderShippedData,
};
pub use state::OrderState;
