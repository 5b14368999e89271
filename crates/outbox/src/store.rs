use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    AggregateId, Document, EnvelopeId, EnvelopeQuery, EventEnvelope, NewEnvelope, Result, Version,
};

/// One atomic unit of work against the store.
///
/// Document writes, appended envelopes and ledger rows become visible
/// together on [`Transaction::commit`]. Dropping a transaction without
/// committing rolls all of it back.
#[async_trait]
pub trait Transaction: Send {
    /// Loads a document, seeing this transaction's own writes.
    async fn load(&mut self, table: &str, key: AggregateId) -> Result<Option<Document>>;

    /// Returns every document in `table` whose body contains `pattern`
    /// (`jsonb @>` semantics). An empty object matches all documents.
    async fn find(&mut self, table: &str, pattern: &serde_json::Value) -> Result<Vec<Document>>;

    /// Writes a document if its stored version equals `expected`, returning
    /// the new version. `Version::initial()` means "must not exist yet".
    async fn save(
        &mut self,
        table: &str,
        key: AggregateId,
        body: serde_json::Value,
        expected: Version,
    ) -> Result<Version>;

    /// Appends an envelope to the outbox as part of this transaction.
    async fn append(&mut self, envelope: NewEnvelope) -> Result<EnvelopeId>;

    /// Inserts a processed-message ledger row.
    ///
    /// Returns false if `(message_id, consumer_name)` was already recorded.
    async fn record_processed(&mut self, message_id: EnvelopeId, consumer_name: &str)
    -> Result<bool>;

    /// Commits the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Rolls the transaction back explicitly.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Typed helpers over [`Transaction`].
#[async_trait]
pub trait TransactionExt: Transaction {
    /// Loads and deserializes a document.
    async fn load_as<T: DeserializeOwned + Send>(
        &mut self,
        table: &str,
        key: AggregateId,
    ) -> Result<Option<(T, Version)>> {
        match self.load(table, key).await? {
            Some(doc) => Ok(Some((doc.decode()?, doc.version))),
            None => Ok(None),
        }
    }

    /// Serializes and saves a document.
    async fn save_as<T: Serialize + Sync>(
        &mut self,
        table: &str,
        key: AggregateId,
        value: &T,
        expected: Version,
    ) -> Result<Version> {
        let body = serde_json::to_value(value)?;
        self.save(table, key, body, expected).await
    }
}

impl<T: Transaction + ?Sized> TransactionExt for T {}

/// Opens transactions.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}

#[async_trait]
impl<D: Database + ?Sized> Database for Arc<D> {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        (**self).begin().await
    }
}

/// Relay-side and operator-side access to the outbox.
///
/// Every method is its own short transaction.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Atomically moves up to `batch_size` claimable envelopes from
    /// `Pending` to `Publishing`, stamps them with `claimed_at = older_than`
    /// and returns them in id order.
    ///
    /// Only the head of an aggregate is claimable: its oldest envelope that
    /// is `Pending` or `Publishing` and has not expired. The head must be
    /// `Pending`, created and available at or before `older_than`. A batch
    /// therefore holds at most one envelope per aggregate, and an aggregate
    /// whose head is being claimed by another caller is skipped entirely.
    async fn claim_pending(
        &self,
        batch_size: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<EventEnvelope>>;

    /// Marks a claimed envelope as delivered. No-op if already terminal.
    async fn mark_published(&self, id: EnvelopeId) -> Result<()>;

    /// Returns a claimed envelope to `Pending` after a failed attempt,
    /// incrementing its retry count and delaying it until `available_at`.
    async fn mark_retry(&self, id: EnvelopeId, available_at: DateTime<Utc>, error: &str)
    -> Result<()>;

    /// Marks an envelope as permanently failed after a failed attempt.
    /// No-op if already terminal.
    async fn mark_failed(&self, id: EnvelopeId, error: &str) -> Result<()>;

    /// Moves the claim of envelopes still `Publishing` with `claimed_at`
    /// to `now`, and returns the ids whose claim is still held.
    ///
    /// Envelopes recovered since, or re-claimed by another relay, carry a
    /// different stamp and are left alone.
    async fn renew_claims(
        &self,
        ids: &[EnvelopeId],
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnvelopeId>>;

    /// Reverts envelopes claimed before `claimed_before` that were never
    /// marked, e.g. because the relay crashed mid-publish.
    async fn recover_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize>;

    /// Moves expired envelopes that are not in flight to the archive.
    async fn archive_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    async fn get(&self, id: EnvelopeId) -> Result<Option<EventEnvelope>>;

    async fn query(&self, query: EnvelopeQuery) -> Result<Vec<EventEnvelope>>;

    /// Moves a `Failed` envelope back to `Pending` with a reset retry count.
    /// Returns false if the envelope was not `Failed`.
    async fn requeue_failed(&self, id: EnvelopeId) -> Result<bool>;
}
