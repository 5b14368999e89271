use async_trait::async_trait;
use common::AggregateId;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::instance::{SagaFault, SagaInstance};
use crate::state::SagaStatus;
use crate::store::SagaStore;

const SAGA_COLUMNS: &str =
    "saga_id, saga_type, step, state, status, version, fault, created_at, updated_at";

/// PostgreSQL-backed saga store over the `saga_instance` table.
#[derive(Clone)]
pub struct PgSagaStore {
    pool: PgPool,
}

impl PgSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_instance(row: &PgRow) -> Result<SagaInstance> {
        let saga_id = AggregateId::from_uuid(row.try_get::<Uuid, _>("saga_id")?);
        let status: String = row.try_get("status")?;
        let status = SagaStatus::parse(&status)
            .ok_or_else(|| SagaError::Corrupt(format!("unknown saga status '{status}'")))?;
        let fault: Option<serde_json::Value> = row.try_get("fault")?;
        let fault: Option<SagaFault> = fault.map(serde_json::from_value).transpose()?;

        Ok(SagaInstance {
            saga_id,
            saga_type: row.try_get("saga_type")?,
            step: row.try_get("step")?,
            data: row.try_get("state")?,
            status,
            version: row.try_get("version")?,
            fault,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn fault_json(instance: &SagaInstance) -> Result<Option<serde_json::Value>> {
        Ok(instance
            .fault
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?)
    }
}

#[async_trait]
impl SagaStore for PgSagaStore {
    async fn create(&self, instance: &SagaInstance) -> Result<bool> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO saga_instance
                (saga_id, saga_type, step, state, status, version, fault, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (saga_id) DO NOTHING
            "#,
        )
        .bind(instance.saga_id.as_uuid())
        .bind(&instance.saga_type)
        .bind(&instance.step)
        .bind(&instance.data)
        .bind(instance.status.as_str())
        .bind(instance.version)
        .bind(Self::fault_json(instance)?)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn load(&self, saga_id: AggregateId) -> Result<Option<SagaInstance>> {
        let sql = format!("SELECT {SAGA_COLUMNS} FROM saga_instance WHERE saga_id = $1");
        let row = sqlx::query(&sql)
            .bind(saga_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn save(&self, instance: &SagaInstance, expected_version: i64) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE saga_instance
            SET step = $2, state = $3, status = $4, version = $5, fault = $6, updated_at = $7
            WHERE saga_id = $1 AND version = $8
            "#,
        )
        .bind(instance.saga_id.as_uuid())
        .bind(&instance.step)
        .bind(&instance.data)
        .bind(instance.status.as_str())
        .bind(instance.version)
        .bind(Self::fault_json(instance)?)
        .bind(instance.updated_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            let actual: Option<i64> =
                sqlx::query_scalar("SELECT version FROM saga_instance WHERE saga_id = $1")
                    .bind(instance.saga_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;
            return Err(match actual {
                Some(actual) => SagaError::ConcurrencyConflict {
                    saga_id: instance.saga_id,
                    expected: expected_version,
                    actual,
                },
                None => SagaError::NotFound(instance.saga_id),
            });
        }
        Ok(())
    }

    async fn list(&self, status: Option<SagaStatus>, limit: usize) -> Result<Vec<SagaInstance>> {
        let sql = format!(
            r#"
            SELECT {SAGA_COLUMNS}
            FROM saga_instance
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at, saga_id
            LIMIT $2
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(status.map(|status| status.as_str()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_instance).collect()
    }
}
