//! Asynchronous side of the propagation engine.
//!
//! - [`OutboxRelay`] claims committed envelopes and publishes them through a
//!   [`Transport`], retrying with exponential backoff
//! - [`IntegrationConsumer`] applies each integration event once per
//!   consumer, recording it in the processed-message ledger in the same
//!   transaction as its effects

pub mod consumer;
pub mod error;
pub mod mappings;
pub mod relay;
pub mod retry;
pub mod transport;

pub use consumer::{CommandMapping, ConsumeOutcome, IntegrationConsumer};
pub use error::{ConsumeError, RelayConfigError, Result, TransportError};
pub use mappings::{DeliveryMapping, DirectoryMapping, default_consumers};
pub use relay::{OutboxRelay, RelayConfig, TickReport};
pub use retry::RetryPolicy;
pub use transport::{InMemoryTransport, Subscriber, Transport};
