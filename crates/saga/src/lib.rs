//! Saga coordination for the propagation engine.
//!
//! A saga reacts to integration events delivered by the relay. Each saga
//! type implements [`SagaDefinition`]: it correlates envelopes to an
//! instance and maps `(step, event)` to a [`Transition`]. The
//! [`SagaCoordinator`] executes the commands a transition emits through the
//! command bus and persists the instance in a [`SagaStore`].
//!
//! The order delivery saga ships a paid order once its delivery record
//! exists:
//! 1. `OrderPaid` starts it
//! 2. `DeliverRecordCreated` sends `ShipOrder`
//! 3. `OrderShipped` completes it

pub mod coordinator;
pub mod definition;
pub mod error;
pub mod instance;
pub mod memory;
pub mod order_delivery;
pub mod postgres;
pub mod state;
pub mod store;

pub use coordinator::{SagaCoordinator, SagaOutcome};
pub use definition::{SagaDefinition, SagaStep, Transition, Trigger};
pub use error::{Result, SagaError};
pub use instance::{SagaFault, SagaInstance};
pub use memory::InMemorySagaStore;
pub use order_delivery::{DeliveryData, DeliveryStep, OrderDelivery};
pub use postgres::PgSagaStore;
pub use state::SagaStatus;
pub use store::SagaStore;
