//! Publish/subscribe transport between the relay and the consumers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use outbox::EventEnvelope;
use tokio::sync::RwLock;

use crate::error::TransportError;

/// Receives envelopes of the event types it subscribed to.
///
/// Delivery is at-least-once: the same envelope may arrive more than once.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, envelope: &EventEnvelope) -> Result<(), TransportError>;
}

/// Carries envelopes from the relay to subscribers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publishes one envelope. Returns once every subscriber acknowledged
    /// it, or with the error that should decide the retry.
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), TransportError>;

    async fn subscribe(&self, event_type: &str, subscriber: Arc<dyn Subscriber>);
}

/// In-process transport delivering straight to subscriber objects.
///
/// An envelope is delivered to all subscribers of its type concurrently.
/// If any of them fails the publish fails and the relay redelivers to all
/// of them; consumers dedupe through their ledger.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    subscribers: Arc<RwLock<HashMap<String, Vec<Arc<dyn Subscriber>>>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        let subscribers = self
            .subscribers
            .read()
            .await
            .get(&envelope.event_type)
            .cloned()
            .unwrap_or_default();

        if subscribers.is_empty() {
            tracing::trace!(event_type = %envelope.event_type, "no subscribers");
            return Ok(());
        }

        let results = join_all(subscribers.iter().map(|s| s.deliver(envelope))).await;
        let mut errors: Vec<TransportError> = results.into_iter().filter_map(Result::err).collect();

        // A retryable failure wins so transient subscribers keep their retries.
        match errors.iter().position(TransportError::is_retryable) {
            Some(index) => Err(errors.swap_remove(index)),
            None => errors.into_iter().next().map_or(Ok(()), Err),
        }
    }

    async fn subscribe(&self, event_type: &str, subscriber: Arc<dyn Subscriber>) {
        tracing::debug!(event_type, subscriber = subscriber.name(), "subscribed");
        self.subscribers
            .write()
            .await
            .entry(event_type.to_string())
            .or_default()
            .push(subscriber);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::AggregateId;
    use outbox::NewEnvelope;

    use super::*;

    struct Counting {
        calls: AtomicUsize,
        fail_with: Option<bool>,
    }

    impl Counting {
        fn new(fail_with: Option<bool>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_with,
            })
        }
    }

    #[async_trait]
    impl Subscriber for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn deliver(&self, _envelope: &EventEnvelope) -> Result<(), TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                None => Ok(()),
                Some(retryable) => Err(TransportError::Delivery {
                    subscriber: "counting".into(),
                    reason: "nope".into(),
                    retryable,
                }),
            }
        }
    }

    fn envelope(event_type: &str) -> EventEnvelope {
        NewEnvelope::builder()
            .event_type(event_type)
            .aggregate_id(AggregateId::new())
            .aggregate_type("Order")
            .payload_raw(serde_json::json!({}))
            .try_build()
            .unwrap()
            .into_envelope(chrono::Utc::now())
    }

    #[tokio::test]
    async fn delivers_to_every_subscriber_of_the_type() {
        let transport = InMemoryTransport::new();
        let a = Counting::new(None);
        let b = Counting::new(None);
        transport.subscribe("OrderPaid", a.clone()).await;
        transport.subscribe("OrderPaid", b.clone()).await;

        transport.publish(&envelope("OrderPaid")).await.unwrap();
        transport.publish(&envelope("OrderShipped")).await.unwrap();

        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.subscriber_count("OrderPaid").await, 2);
    }

    #[tokio::test]
    async fn retryable_failure_is_reported_first() {
        let transport = InMemoryTransport::new();
        transport.subscribe("OrderPaid", Counting::new(Some(false))).await;
        transport.subscribe("OrderPaid", Counting::new(Some(true))).await;

        let err = transport.publish(&envelope("OrderPaid")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
