use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, Database, Document, EnvelopeId, EnvelopeQuery, EnvelopeStatus, EventEnvelope,
    NewEnvelope, OutboxError, OutboxStore, Result, Transaction, Version,
};

const ENVELOPE_COLUMNS: &str = "id, event_type, aggregate_id, aggregate_type, payload, metadata, \
     status, retry_count, created_at, available_at, claimed_at, expires_at, last_error";

/// PostgreSQL-backed database.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Creates a new PostgreSQL database handle.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_envelope(row: &PgRow) -> Result<EventEnvelope> {
        let status: String = row.try_get("status")?;
        let status = EnvelopeStatus::parse(&status)
            .ok_or_else(|| OutboxError::Corrupt(format!("unknown envelope status '{status}'")))?;
        let metadata: serde_json::Value = row.try_get("metadata")?;
        let metadata: HashMap<String, serde_json::Value> = serde_json::from_value(metadata)?;
        let retry_count: i32 = row.try_get("retry_count")?;

        Ok(EventEnvelope {
            id: EnvelopeId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            payload: row.try_get("payload")?,
            metadata,
            created_at: row.try_get("created_at")?,
            status,
            retry_count: u32::try_from(retry_count).unwrap_or_default(),
            available_at: row.try_get("available_at")?,
            claimed_at: row.try_get("claimed_at")?,
            expires_at: row.try_get("expires_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    async fn ensure_exists(&self, id: EnvelopeId) -> Result<()> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM event_envelope WHERE id = $1)")
                .bind(id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        if exists {
            Ok(())
        } else {
            Err(OutboxError::EnvelopeNotFound(id))
        }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }
}

struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    fn row_to_document(table: &str, row: &PgRow) -> Result<Document> {
        Ok(Document {
            table: table.to_string(),
            key: AggregateId::from_uuid(row.try_get::<Uuid, _>("key")?),
            version: Version::new(row.try_get("version")?),
            body: row.try_get("body")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn current_version(&mut self, table: &str, key: AggregateId) -> Result<Version> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM documents WHERE table_name = $1 AND key = $2",
        )
        .bind(table)
        .bind(key.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(version.map(Version::new).unwrap_or_else(Version::initial))
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn load(&mut self, table: &str, key: AggregateId) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT key, version, body, updated_at FROM documents WHERE table_name = $1 AND key = $2",
        )
        .bind(table)
        .bind(key.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(|row| Self::row_to_document(table, &row))
            .transpose()
    }

    async fn find(&mut self, table: &str, pattern: &serde_json::Value) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT key, version, body, updated_at
            FROM documents
            WHERE table_name = $1 AND body @> $2
            ORDER BY key
            "#,
        )
        .bind(table)
        .bind(pattern)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| Self::row_to_document(table, row))
            .collect()
    }

    async fn save(
        &mut self,
        table: &str,
        key: AggregateId,
        body: serde_json::Value,
        expected: Version,
    ) -> Result<Version> {
        let version = expected.next();

        let affected = if expected == Version::initial() {
            sqlx::query(
                r#"
                INSERT INTO documents (table_name, key, version, body, updated_at)
                VALUES ($1, $2, $3, $4, now())
                ON CONFLICT (table_name, key) DO NOTHING
                "#,
            )
            .bind(table)
            .bind(key.as_uuid())
            .bind(version.as_i64())
            .bind(&body)
            .execute(&mut *self.tx)
            .await?
            .rows_affected()
        } else {
            sqlx::query(
                r#"
                UPDATE documents
                SET version = $3, body = $4, updated_at = now()
                WHERE table_name = $1 AND key = $2 AND version = $5
                "#,
            )
            .bind(table)
            .bind(key.as_uuid())
            .bind(version.as_i64())
            .bind(&body)
            .bind(expected.as_i64())
            .execute(&mut *self.tx)
            .await?
            .rows_affected()
        };

        if affected == 0 {
            let actual = self.current_version(table, key).await?;
            tracing::debug!(table, %key, %expected, %actual, "document version conflict");
            return Err(OutboxError::ConcurrencyConflict {
                table: table.to_string(),
                key,
                expected,
                actual,
            });
        }
        Ok(version)
    }

    async fn append(&mut self, envelope: NewEnvelope) -> Result<EnvelopeId> {
        let envelope = envelope.into_envelope(Utc::now());
        let metadata = serde_json::to_value(&envelope.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO event_envelope
                (id, event_type, aggregate_id, aggregate_type, payload, metadata,
                 status, retry_count, created_at, available_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0, $7, $7, $8)
            "#,
        )
        .bind(envelope.id.as_uuid())
        .bind(&envelope.event_type)
        .bind(envelope.aggregate_id.as_uuid())
        .bind(&envelope.aggregate_type)
        .bind(&envelope.payload)
        .bind(metadata)
        .bind(envelope.created_at)
        .bind(envelope.expires_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(envelope.id)
    }

    async fn record_processed(
        &mut self,
        message_id: EnvelopeId,
        consumer_name: &str,
    ) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO processed_message (message_id, consumer_name, processed_at)
            VALUES ($1, $2, now())
            ON CONFLICT (message_id, consumer_name) DO NOTHING
            "#,
        )
        .bind(message_id.as_uuid())
        .bind(consumer_name)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgDatabase {
    async fn claim_pending(
        &self,
        batch_size: usize,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<EventEnvelope>> {
        // The head of an aggregate is its oldest unexpired envelope that is
        // still pending or in flight. Locking the head row rather than any
        // pending row means a head that another relay is claiming right now
        // hides the whole aggregate from this claim.
        let sql = format!(
            r#"
            WITH heads AS (
                SELECT DISTINCT ON (aggregate_id) id
                FROM event_envelope
                WHERE status = 'publishing'
                   OR (status = 'pending' AND (expires_at IS NULL OR expires_at > $2))
                ORDER BY aggregate_id, id
            ),
            candidates AS (
                SELECT e.id AS candidate_id
                FROM event_envelope e
                JOIN heads h ON h.id = e.id
                WHERE e.status = 'pending'
                  AND e.created_at <= $2
                  AND e.available_at <= $2
                ORDER BY e.id
                LIMIT $1
                FOR UPDATE OF e SKIP LOCKED
            )
            UPDATE event_envelope
            SET status = 'publishing', claimed_at = $2
            FROM candidates
            WHERE event_envelope.id = candidates.candidate_id
            RETURNING {ENVELOPE_COLUMNS}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .bind(older_than)
            .fetch_all(&self.pool)
            .await?;

        let mut claimed = rows
            .iter()
            .map(Self::row_to_envelope)
            .collect::<Result<Vec<_>>>()?;
        claimed.sort_by_key(|e| e.id);
        tracing::debug!(count = claimed.len(), "claimed envelopes");
        Ok(claimed)
    }

    async fn mark_published(&self, id: EnvelopeId) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE event_envelope
            SET status = 'published', claimed_at = NULL
            WHERE id = $1 AND status IN ('pending', 'publishing')
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            self.ensure_exists(id).await?;
        }
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: EnvelopeId,
        available_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE event_envelope
            SET status = 'pending', retry_count = retry_count + 1,
                available_at = $2, claimed_at = NULL, last_error = $3
            WHERE id = $1 AND status = 'publishing'
            "#,
        )
        .bind(id.as_uuid())
        .bind(available_at)
        .bind(error)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            self.ensure_exists(id).await?;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: EnvelopeId, error: &str) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE event_envelope
            SET status = 'failed',
                retry_count = retry_count + CASE WHEN status = 'publishing' THEN 1 ELSE 0 END,
                claimed_at = NULL,
                last_error = $2
            WHERE id = $1 AND status IN ('pending', 'publishing')
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            self.ensure_exists(id).await?;
        }
        Ok(())
    }

    async fn renew_claims(
        &self,
        ids: &[EnvelopeId],
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<EnvelopeId>> {
        let ids: Vec<Uuid> = ids.iter().map(EnvelopeId::as_uuid).collect();
        let held: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE event_envelope
            SET claimed_at = $3
            WHERE id = ANY($1) AND status = 'publishing' AND claimed_at = $2
            RETURNING id
            "#,
        )
        .bind(&ids[..])
        .bind(claimed_at)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        if held.len() < ids.len() {
            tracing::warn!(
                requested = ids.len(),
                held = held.len(),
                "claims lost before renewal"
            );
        }
        Ok(held.into_iter().map(EnvelopeId::from_uuid).collect())
    }

    async fn recover_stale(&self, claimed_before: DateTime<Utc>) -> Result<usize> {
        let recovered = sqlx::query(
            r#"
            UPDATE event_envelope
            SET status = 'pending', claimed_at = NULL
            WHERE status = 'publishing' AND claimed_at < $1
            "#,
        )
        .bind(claimed_before)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if recovered > 0 {
            tracing::debug!(recovered, %claimed_before, "reverted stale claims");
        }
        Ok(recovered as usize)
    }

    async fn archive_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let sql = format!(
            r#"
            WITH moved AS (
                DELETE FROM event_envelope
                WHERE expires_at IS NOT NULL AND expires_at <= $1 AND status <> 'publishing'
                RETURNING {ENVELOPE_COLUMNS}
            )
            INSERT INTO event_envelope_archive ({ENVELOPE_COLUMNS}, archived_at)
            SELECT {ENVELOPE_COLUMNS}, $1 FROM moved
            "#
        );

        let archived = sqlx::query(&sql)
            .bind(now)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if archived > 0 {
            tracing::debug!(archived, "archived expired envelopes");
        }
        Ok(archived as usize)
    }

    async fn get(&self, id: EnvelopeId) -> Result<Option<EventEnvelope>> {
        let sql = format!("SELECT {ENVELOPE_COLUMNS} FROM event_envelope WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_envelope).transpose()
    }

    async fn query(&self, query: EnvelopeQuery) -> Result<Vec<EventEnvelope>> {
        let mut sql = format!("SELECT {ENVELOPE_COLUMNS} FROM event_envelope WHERE 1=1");
        let mut param_count = 0;

        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.event_type.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND event_type = ${param_count}"));
        }
        if query.aggregate_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND aggregate_id = ${param_count}"));
        }

        sql.push_str(" ORDER BY id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let mut q = sqlx::query(&sql);
        if let Some(status) = query.status {
            q = q.bind(status.as_str());
        }
        if let Some(ref event_type) = query.event_type {
            q = q.bind(event_type);
        }
        if let Some(aggregate_id) = query.aggregate_id {
            q = q.bind(aggregate_id.as_uuid());
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_envelope).collect()
    }

    async fn requeue_failed(&self, id: EnvelopeId) -> Result<bool> {
        let affected = sqlx::query(
            r#"
            UPDATE event_envelope
            SET status = 'pending', retry_count = 0, available_at = now()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            self.ensure_exists(id).await?;
        }
        Ok(affected == 1)
    }
}
