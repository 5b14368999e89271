use async_trait::async_trait;
use common::AggregateId;

use crate::error::Result;
use crate::instance::SagaInstance;
use crate::state::SagaStatus;

/// Durable storage for saga instances.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new instance. Returns false if the id is already taken.
    async fn create(&self, instance: &SagaInstance) -> Result<bool>;

    async fn load(&self, saga_id: AggregateId) -> Result<Option<SagaInstance>>;

    /// Replaces the stored instance if its version is still
    /// `expected_version`; otherwise fails with a concurrency conflict.
    async fn save(&self, instance: &SagaInstance, expected_version: i64) -> Result<()>;

    /// Lists instances oldest first, optionally filtered by status.
    async fn list(&self, status: Option<SagaStatus>, limit: usize) -> Result<Vec<SagaInstance>>;
}
