//! Transactional outbox for the propagation engine.
//!
//! Aggregate state (as versioned documents), outgoing event envelopes and
//! the consumers' processed-message ledger all live behind one
//! [`Transaction`], so a commit makes every part visible at once and a
//! rollback leaves no trace. The relay side of the outbox is the
//! [`OutboxStore`] trait.

pub mod document;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod signal;
pub mod store;

pub use common::AggregateId;
pub use document::{Document, Version};
pub use envelope::{EnvelopeId, EnvelopeStatus, EventEnvelope, NewEnvelope, NewEnvelopeBuilder};
pub use error::{OutboxError, Result};
pub use memory::InMemoryDatabase;
pub use postgres::PgDatabase;
pub use query::EnvelopeQuery;
pub use signal::CommitSignal;
pub use store::{Database, OutboxStore, Transaction, TransactionExt};
