use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::document::json_contains;
use crate::{
    AggregateId, Database, Document, EnvelopeId, EnvelopeQuery, EnvelopeStatus, EventEnvelope,
    NewEnvelope, OutboxError, OutboxStore, Result, Transaction, Version,
};

type DocumentKey = (String, AggregateId);

#[derive(Debug, Default)]
struct Tables {
    documents: HashMap<DocumentKey, Document>,
    envelopes: BTreeMap<EnvelopeId, EventEnvelope>,
    archive: Vec<EventEnvelope>,
    processed: HashMap<(EnvelopeId, String), DateTime<Utc>>,
}

/// In-memory database for tests and single-process runs.
///
/// Transactions are serialized: a [`Transaction`] holds the lock on all
/// tables until it commits or is dropped. Writes are buffered and applied
/// only on commit.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryDatabase {
    /// Creates a new empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every envelope in the outbox, in id order.
    pub async fn envelopes(&self) -> Vec<EventEnvelope> {
        self.tables.lock().await.envelopes.values().cloned().collect()
    }

    /// Returns the total number of envelopes in the outbox.
    pub async fn envelope_count(&self) -> usize {
        self.tables.lock().await.envelopes.len()
    }

    /// Returns the archived envelopes.
    pub async fn archived(&self) -> Vec<EventEnvelope> {
        self.tables.lock().await.archive.clone()
    }

    /// Returns the number of ledger rows recorded for `consumer_name`.
    pub async fn processed_count(&self, consumer_name: &str) -> usize {
        self.tables
            .lock()
            .await
            .processed
            .keys()
            .filter(|(_, name)| name == consumer_name)
            .count()
    }

    /// Returns a committed document.
    pub async fn document(&self, table: &str, key: AggregateId) -> Option<Document> {
        self.tables
            .lock()
            .await
            .documents
            .get(&(table.to_string(), key))
            .cloned()
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tables = self.tables.clone().lock_owned().await;
        Ok(Box::new(InMemoryTransaction {
            tables,
            documents: HashMap::new(),
            envelopes: Vec::new(),
            processed: Vec::new(),
        }))
    }
}

struct InMemoryTransaction {
    tables: OwnedMutexGuard<Tables>,
    documents: HashMap<DocumentKey, Document>,
    envelopes: Vec<EventEnvelope>,
    processed: Vec<(EnvelopeId, String)>,
}

impl InMemoryTransaction {
    fn current(&self, key: &DocumentKey) -> Option<&Document> {
        self.documents
            .get(key)
            .or_else(|| self.tables.documents.get(key))
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn load(&mut self, table: &str, key: AggregateId) -> Result<Option<Document>> {
        Ok(self.current(&(table.to_string(), key)).cloned())
    }

    async fn find(&mut self, table: &str, pattern: &serde_json::Value) -> Result<Vec<Document>> {
        let committed = self
            .tables
            .documents
            .iter()
            .filter(|(key, _)| !self.documents.contains_key(*key))
            .map(|(_, doc)| doc);

        let mut found: Vec<Document> = committed
            .chain(self.documents.values())
            .filter(|doc| doc.table == table && json_contains(&doc.body, pattern))
            .cloned()
            .collect();
        found.sort_by_key(|doc| doc.key);
        Ok(found)
    }

    async fn save(
        &mut self,
        table: &str,
        key: AggregateId,
        body: serde_json::Value,
        expected: Version,
    ) -> Result<Version> {
        let doc_key = (table.to_string(), key);
        let actual = self
            .current(&doc_key)
            .map(|doc| doc.version)
            .unwrap_or_else(Version::initial);

        if actual != expected {
            tracing::debug!(table, %key, %expected, %actual, "document version conflict");
            return Err(OutboxError::ConcurrencyConflict {
                table: table.to_string(),
                key,
                expected,
                actual,
            });
        }

        let version = expected.next();
        self.documents.insert(
            doc_key,
            Document {
                table: table.to_string(),
                key,
                version,
                body,
                updated_at: Utc::now(),
            },
        );
        Ok(version)
    }

    async fn append(&mut self, envelope: NewEnvelope) -> Result<EnvelopeId> {
        let envelope = envelope.into_envelope(Utc::now());
        let id = envelope.id;
        self.envelopes.push(envelope);
        Ok(id)
    }

    async fn record_processed(
        &mut self,
        message_id: EnvelopeId,
        consumer_name: &str,
    ) -> Result<bool> {
        let key = (message_id, consumer_name.to_string());
        if self.tables.processed.contains_key(&key) || self.processed.contains(&key) {
            return Ok(false);
        }
        self.processed.push(key);
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction {
            mut tables,
            documents,
            envelopes,
            processed,
        } = *self;

        tables.documents.extend(documents);
        tables
            .envelopes
            .extend(envelopes.into_iter().map(|e| (e.id, e)));
        let now = Utc::now();
        tables
            .processed
            .extend(processed.into_iter().map(|key| (key, now)));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryDatabase {
    async fn claim_pending(
        &self,
        batch_size: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<EventEnvelope>> {
        let mut tables = self.tables.lock().await;
        let mut heads_seen: HashSet<AggregateId> = HashSet::new();
        let mut claimed = Vec::new();

        for envelope in tables.envelopes.values_mut() {
            if claimed.len() == batch_size {
                break;
            }
            match envelope.status {
                EnvelopeStatus::Published | EnvelopeStatus::Failed => continue,
                EnvelopeStatus::Pending if envelope.is_expired(older_than) => continue,
                EnvelopeStatus::Pending | EnvelopeStatus::Publishing => {}
            }
            // Everything behind an aggregate's head waits for it.
            if !heads_seen.insert(envelope.aggregate_id) {
                continue;
            }
            if envelope.status == EnvelopeStatus::Publishing
                || envelope.created_at > older_than
                || envelope.available_at > older_than
            {
                continue;
            }

            envelope.status = EnvelopeStatus::Publishing;
            envelope.claimed_at = Some(older_than);
            claimed.push(envelope.clone());
        }

        Ok(claimed)
    }

    async fn mark_published(&self, id: EnvelopeId) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let envelope = tables
            .envelopes
            .get_mut(&id)
            .ok_or(OutboxError::EnvelopeNotFound(id))?;
        if !envelope.status.is_terminal() {
            envelope.status = EnvelopeStatus::Published;
            envelope.claimed_at = None;
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: EnvelopeId,
        available_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let envelope = tables
            .envelopes
            .get_mut(&id)
            .ok_or(OutboxError::EnvelopeNotFound(id))?;
        if envelope.status == EnvelopeStatus::Publishing {
            envelope.status = EnvelopeStatus::Pending;
            envelope.retry_count += 1;
            envelope.available_at = available_at;
            envelope.claimed_at = None;
            envelope.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn mark_failed(&self, id: EnvelopeId, error: &str) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let envelope = tables
            .envelopes
            .get_mut(&id)
            .ok_or(OutboxError::EnvelopeNotFound(id))?;
        if !envelope.status.is_terminal() {
            if envelope.status == EnvelopeStatus::Publishing {
                envelope.retry_count += 1;
            }
            envelope.status = EnvelopeStatus::Failed;
            envelope.claimed_at = None;
            envelope.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn renew_claims(
        &self,
        ids: &[EnvelopeId],
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnvelopeId>> {
        let mut tables = self.tables.lock().await;
        let mut held = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(envelope) = tables.envelopes.get_mut(id) else {
                continue;
            };
            if envelope.status == EnvelopeStatus::Publishing
                && envelope.claimed_at == Some(claimed_at)
            {
                envelope.claimed_at = Some(now);
                held.push(*id);
            }
        }
        Ok(held)
    }

    async fn recover_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let mut recovered = 0;
        for envelope in tables.envelopes.values_mut() {
            if envelope.status == EnvelopeStatus::Publishing
                && envelope.claimed_at.is_some_and(|at| at < claimed_before)
            {
                envelope.status = EnvelopeStatus::Pending;
                envelope.claimed_at = None;
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::debug!(recovered, %claimed_before, "reverted stale claims");
        }
        Ok(recovered)
    }

    async fn archive_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut tables = self.tables.lock().await;
        let expired: Vec<EnvelopeId> = tables
            .envelopes
            .values()
            .filter(|e| e.is_expired(now) && e.status != EnvelopeStatus::Publishing)
            .map(|e| e.id)
            .collect();

        for id in &expired {
            if let Some(envelope) = tables.envelopes.remove(id) {
                tables.archive.push(envelope);
            }
        }
        Ok(expired.len())
    }

    async fn get(&self, id: EnvelopeId) -> Result<Option<EventEnvelope>> {
        Ok(self.tables.lock().await.envelopes.get(&id).cloned())
    }

    async fn query(&self, query: EnvelopeQuery) -> Result<Vec<EventEnvelope>> {
        let tables = self.tables.lock().await;
        let matching = tables
            .envelopes
            .values()
            .filter(|e| query.matches(e))
            .skip(query.offset.unwrap_or(0))
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matching)
    }

    async fn requeue_failed(&self, id: EnvelopeId) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let envelope = tables
            .envelopes
            .get_mut(&id)
            .ok_or(OutboxError::EnvelopeNotFound(id))?;
        if envelope.status != EnvelopeStatus::Failed {
            return Ok(false);
        }
        envelope.status = EnvelopeStatus::Pending;
        envelope.retry_count = 0;
        envelope.available_at = Utc::now();
        Ok(true)
    }
}
