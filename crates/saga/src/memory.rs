use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::AggregateId;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::instance::SagaInstance;
use crate::state::SagaStatus;
use crate::store::SagaStore;

/// In-memory saga store for tests and single-process runs.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    instances: Arc<RwLock<HashMap<AggregateId, SagaInstance>>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(&self, instance: &SagaInstance) -> Result<bool> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.saga_id) {
            return Ok(false);
        }
        instances.insert(instance.saga_id, instance.clone());
        Ok(true)
    }

    async fn load(&self, saga_id: AggregateId) -> Result<Option<SagaInstance>> {
        Ok(self.instances.read().await.get(&saga_id).cloned())
    }

    async fn save(&self, instance: &SagaInstance, expected_version: i64) -> Result<()> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get_mut(&instance.saga_id)
            .ok_or(SagaError::NotFound(instance.saga_id))?;

        if stored.version != expected_version {
            return Err(SagaError::ConcurrencyConflict {
                saga_id: instance.saga_id,
                expected: expected_version,
                actual: stored.version,
            });
        }
        *stored = instance.clone();
        Ok(())
    }

    async fn list(&self, status: Option<SagaStatus>, limit: usize) -> Result<Vec<SagaInstance>> {
        let instances = self.instances.read().await;
        let mut matching: Vec<SagaInstance> = instances
            .values()
            .filter(|instance| status.is_none_or(|status| instance.status == status))
            .cloned()
            .collect();
        matching.sort_by_key(|instance| (instance.created_at, instance.saga_id));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> SagaInstance {
        SagaInstance::start(
            AggregateId::new(),
            "OrderDelivery",
            "AwaitingDeliveryRecord",
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn create_is_first_writer_wins() {
        let store = InMemorySagaStore::new();
        let saga = instance();

        assert!(store.create(&saga).await.unwrap());
        assert!(!store.create(&saga).await.unwrap());
    }

    #[tokio::test]
    async fn save_checks_version() {
        let store = InMemorySagaStore::new();
        let mut saga = instance();
        store.create(&saga).await.unwrap();

        saga.version = 2;
        saga.step = "AwaitingShipment".into();
        store.save(&saga, 1).await.unwrap();

        let err = store.save(&saga, 1).await.unwrap_err();
        assert!(matches!(
            err,
            SagaError::ConcurrencyConflict { expected: 1, actual: 2, .. }
        ));
        assert_eq!(store.load(saga.saga_id).await.unwrap().unwrap().step, "AwaitingShipment");
    }

    #[tokio::test]
    async fn list_filters_by_status() {
        let store = InMemorySagaStore::new();
        let running = instance();
        let mut faulted = instance();
        faulted.status = SagaStatus::Faulted;
        store.create(&running).await.unwrap();
        store.create(&faulted).await.unwrap();

        let listed = store.list(Some(SagaStatus::Faulted), 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].saga_id, faulted.saga_id);
        assert_eq!(store.list(None, 10).await.unwrap().len(), 2);
        assert_eq!(store.list(None, 1).await.unwrap().len(), 1);
    }
}
