//! End-to-end tests: command bus → outbox → relay → transport → consumers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::AggregateId;
use domain::{Command, CommandBus, DeliverRecord, PermissionRegistry, PropagationLimits, User};
use messaging::{
    ConsumeError, ConsumeOutcome, InMemoryTransport, IntegrationConsumer, OutboxRelay,
    RelayConfig, RetryPolicy, Subscriber, Transport, TransportError, default_consumers,
};
use outbox::{
    CommitSignal, Database, EnvelopeId, EnvelopeStatus, EventEnvelope, InMemoryDatabase,
    NewEnvelope, OutboxStore,
};
use tokio::sync::watch;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    db: InMemoryDatabase,
    signal: CommitSignal,
    bus: CommandBus,
    transport: InMemoryTransport,
}

impl Harness {
    async fn new() -> Self {
        let db = InMemoryDatabase::new();
        let signal = CommitSignal::new();
        let bus = CommandBus::standard(
            Arc::new(db.clone()),
            signal.clone(),
            Arc::new(PermissionRegistry::builtin()),
            PropagationLimits::default(),
        );
        let transport = InMemoryTransport::new();
        for consumer in default_consumers(&bus, COMMAND_TIMEOUT) {
            consumer.subscribe(&transport).await;
        }
        Self {
            db,
            signal,
            bus,
            transport,
        }
    }

    fn relay(&self, config: RelayConfig) -> OutboxRelay {
        OutboxRelay::new(
            Arc::new(self.db.clone()),
            Arc::new(self.transport.clone()),
            self.signal.clone(),
            config,
        )
    }

    async fn paid_order(&self) -> AggregateId {
        let order_id = AggregateId::new();
        self.bus
            .send(Command::CreateOrder {
                order_id,
                amount_cents: 2500,
            })
            .await
            .unwrap();
        self.bus.send(Command::PayOrder { order_id }).await.unwrap();
        order_id
    }
}

async fn append(db: &InMemoryDatabase, aggregate_id: AggregateId, ttl: Option<chrono::Duration>) -> EnvelopeId {
    let mut builder = NewEnvelope::builder()
        .event_type("Ping")
        .aggregate_id(aggregate_id)
        .aggregate_type("Ping")
        .payload_raw(serde_json::json!({}));
    if let Some(ttl) = ttl {
        builder = builder.ttl(ttl);
    }
    let mut tx = db.begin().await.unwrap();
    let id = tx.append(builder.try_build().unwrap()).await.unwrap();
    tx.commit().await.unwrap();
    id
}

struct Recorder {
    seen: Mutex<Vec<EventEnvelope>>,
}

#[async_trait]
impl Subscriber for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn deliver(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
        self.seen.lock().unwrap().push(envelope.clone());
        Ok(())
    }
}

mod order_paid_to_delivery {
    use super::*;

    #[tokio::test]
    async fn relay_delivers_and_consumer_creates_one_record() {
        let h = Harness::new().await;
        let order_id = h.paid_order().await;

        let report = h.relay(RelayConfig::default()).tick().await.unwrap();
        assert_eq!(report.published, 1);

        let record = h
            .db
            .document("DeliverRecord", DeliverRecord::id_for(order_id))
            .await
            .expect("delivery record should exist");
        assert_eq!(record.body["order_id"], serde_json::json!(order_id));
        assert_eq!(h.db.processed_count("delivery").await, 1);

        // The record's own integration event carries its cause.
        let envelopes = h.db.envelopes().await;
        let paid = envelopes.iter().find(|e| e.event_type == "OrderPaid").unwrap();
        let created = envelopes
            .iter()
            .find(|e| e.event_type == "DeliverRecordCreated")
            .unwrap();
        assert_eq!(paid.status, EnvelopeStatus::Published);
        assert_eq!(
            created.metadata["causation_id"],
            serde_json::json!(paid.id.to_string())
        );
    }

    #[tokio::test]
    async fn redelivery_is_acknowledged_without_side_effects() {
        let h = Harness::new().await;
        h.paid_order().await;
        let paid = h.db.envelopes().await.remove(0);

        let consumer = IntegrationConsumer::delivery(h.bus.clone(), COMMAND_TIMEOUT);
        assert_eq!(consumer.consume(&paid).await.unwrap(), ConsumeOutcome::Applied);
        assert_eq!(consumer.consume(&paid).await.unwrap(), ConsumeOutcome::Duplicate);

        assert_eq!(h.db.processed_count("delivery").await, 1);
        let created = h
            .db
            .envelopes()
            .await
            .into_iter()
            .filter(|e| e.event_type == "DeliverRecordCreated")
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn failed_command_leaves_no_ledger_row() {
        let h = Harness::new().await;
        let order_id = AggregateId::new();
        let orphan = NewEnvelope::builder()
            .event_type("OrderPaid")
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .payload_raw(serde_json::json!({
                "type": "OrderPaid",
                "data": { "order_id": order_id, "amount_cents": 100 }
            }))
            .try_build()
            .unwrap()
            .into_envelope(chrono::Utc::now());

        let consumer = IntegrationConsumer::delivery(h.bus.clone(), COMMAND_TIMEOUT);
        let err = consumer.consume(&orphan).await.unwrap_err();
        assert!(matches!(err, ConsumeError::Command(_)));
        assert!(!err.is_retryable());

        assert_eq!(h.db.processed_count("delivery").await, 0);
        assert!(
            h.db.document("DeliverRecord", DeliverRecord::id_for(order_id))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn unmapped_events_are_ignored() {
        let h = Harness::new().await;
        let order_id = h.paid_order().await;
        h.bus.send(Command::CreateDeliverRecord { order_id }).await.unwrap();
        let created = h
            .db
            .envelopes()
            .await
            .into_iter()
            .find(|e| e.event_type == "DeliverRecordCreated")
            .unwrap();

        let consumer = IntegrationConsumer::delivery(h.bus.clone(), COMMAND_TIMEOUT);
        assert_eq!(consumer.consume(&created).await.unwrap(), ConsumeOutcome::Ignored);
        assert_eq!(h.db.processed_count("delivery").await, 0);
    }
}

mod department_rename {
    use super::*;

    #[tokio::test]
    async fn members_are_refreshed_after_the_relay_runs() {
        let h = Harness::new().await;
        let department_id = AggregateId::new();
        let user_id = AggregateId::new();
        for command in [
            Command::CreateDepartment {
                department_id,
                name: "Sales".into(),
                parent_id: None,
            },
            Command::CreateUser {
                user_id,
                username: "grace".into(),
            },
            Command::AssignDepartment {
                user_id,
                department_id,
            },
            Command::RenameDepartment {
                department_id,
                name: "Revenue".into(),
            },
        ] {
            h.bus.send(command).await.unwrap();
        }

        h.relay(RelayConfig::default()).tick().await.unwrap();

        let user: User = h.db.document("User", user_id).await.unwrap().decode().unwrap();
        assert_eq!(user.department().unwrap().name, "Revenue");
        assert_eq!(h.db.processed_count("directory").await, 1);
    }
}

mod relay_behaviour {
    use super::*;

    #[tokio::test]
    async fn envelopes_of_one_aggregate_publish_in_id_order() {
        let db = InMemoryDatabase::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());
        let mut expected = Vec::new();
        for i in 0..5 {
            expected.push(append(&db, a, None).await);
            if i % 2 == 0 {
                append(&db, b, None).await;
            }
        }

        let transport = InMemoryTransport::new();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        transport.subscribe("Ping", recorder.clone()).await;
        let relay = OutboxRelay::new(
            Arc::new(db.clone()),
            Arc::new(transport),
            CommitSignal::new(),
            RelayConfig::default(),
        );
        while !relay.tick().await.unwrap().is_idle() {}

        let published: Vec<EnvelopeId> = recorder
            .seen
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.aggregate_id == a)
            .map(|e| e.id)
            .collect();
        assert_eq!(published, expected);
    }

    #[tokio::test]
    async fn stale_claims_are_recovered_without_counting_an_attempt() {
        let db = InMemoryDatabase::new();
        let id = append(&db, AggregateId::new(), None).await;

        // A relay that crashed after claiming.
        let claimed = db.claim_pending(10, chrono::Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let relay = OutboxRelay::new(
            Arc::new(db.clone()),
            Arc::new(InMemoryTransport::new()),
            CommitSignal::new(),
            RelayConfig {
                stale_after: Duration::ZERO,
                ..RelayConfig::default()
            },
        );
        let report = relay.tick().await.unwrap();
        assert_eq!(report.recovered, 1);
        assert_eq!(report.published, 1);

        let envelope = db.get(id).await.unwrap().unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Published);
        assert_eq!(envelope.retry_count, 0);
    }

    #[tokio::test]
    async fn expired_envelopes_are_archived_not_published() {
        let db = InMemoryDatabase::new();
        append(&db, AggregateId::new(), Some(chrono::Duration::seconds(-1))).await;
        append(&db, AggregateId::new(), None).await;

        let relay = OutboxRelay::new(
            Arc::new(db.clone()),
            Arc::new(InMemoryTransport::new()),
            CommitSignal::new(),
            RelayConfig::default(),
        );
        let report = relay.tick().await.unwrap();
        assert_eq!(report.archived, 1);
        assert_eq!(report.published, 1);
        assert_eq!(db.archived().await.len(), 1);
        assert_eq!(db.envelope_count().await, 1);
    }

    #[tokio::test]
    async fn retried_envelope_keeps_its_successors_waiting() {
        struct FailOnce {
            failed: Mutex<bool>,
            seen: Mutex<Vec<EnvelopeId>>,
        }

        #[async_trait]
        impl Transport for FailOnce {
            async fn publish(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
                let mut failed = self.failed.lock().unwrap();
                if !*failed {
                    *failed = true;
                    return Err(TransportError::Unavailable("flap".into()));
                }
                self.seen.lock().unwrap().push(envelope.id);
                Ok(())
            }

            async fn subscribe(&self, _event_type: &str, _subscriber: Arc<dyn Subscriber>) {}
        }

        let db = InMemoryDatabase::new();
        let aggregate_id = AggregateId::new();
        let first = append(&db, aggregate_id, None).await;
        let second = append(&db, aggregate_id, None).await;

        let transport = Arc::new(FailOnce {
            failed: Mutex::new(false),
            seen: Mutex::new(Vec::new()),
        });
        let relay = OutboxRelay::new(
            Arc::new(db.clone()),
            transport.clone(),
            CommitSignal::new(),
            RelayConfig {
                retry: RetryPolicy {
                    max_retries: 5,
                    base_delay: Duration::ZERO,
                    max_delay: Duration::ZERO,
                },
                ..RelayConfig::default()
            },
        );

        let report = relay.tick().await.unwrap();
        assert_eq!((report.claimed, report.retried), (1, 1));
        while !relay.tick().await.unwrap().is_idle() {}

        assert_eq!(*transport.seen.lock().unwrap(), vec![first, second]);
    }

    /// Records deliveries after a fixed delay.
    struct SlowRecorder {
        delay: Duration,
        seen: Mutex<Vec<EnvelopeId>>,
    }

    #[async_trait]
    impl Subscriber for SlowRecorder {
        fn name(&self) -> &str {
            "slow-recorder"
        }

        async fn deliver(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(envelope.id);
            Ok(())
        }
    }

    async fn slow_transport(delay: Duration) -> (InMemoryTransport, Arc<SlowRecorder>) {
        let transport = InMemoryTransport::new();
        let recorder = Arc::new(SlowRecorder {
            delay,
            seen: Mutex::new(Vec::new()),
        });
        transport.subscribe("Ping", recorder.clone()).await;
        (transport, recorder)
    }

    #[tokio::test]
    async fn live_batch_outlasting_stale_after_is_not_taken_over() {
        let db = InMemoryDatabase::new();
        let mut ids = Vec::new();
        for _ in 0..6 {
            ids.push(append(&db, AggregateId::new(), None).await);
        }
        let (transport, recorder) = slow_transport(Duration::from_millis(300)).await;
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let config = RelayConfig {
            publish_timeout: Duration::from_millis(400),
            stale_after: Duration::from_secs(1),
            ..RelayConfig::default()
        };
        config.validate().unwrap();
        let relay_a = OutboxRelay::new(
            Arc::new(db.clone()),
            transport.clone(),
            CommitSignal::new(),
            config.clone(),
        );
        let relay_b = OutboxRelay::new(Arc::new(db.clone()), transport, CommitSignal::new(), config);

        // A's batch takes about 1.8s; B ticks after A's first claim would
        // have gone stale.
        let (report_a, report_b) = tokio::join!(relay_a.tick(), async {
            tokio::time::sleep(Duration::from_millis(1300)).await;
            relay_b.tick().await
        });
        let (report_a, report_b) = (report_a.unwrap(), report_b.unwrap());

        assert_eq!(report_a.published, 6);
        assert_eq!(report_a.lost, 0);
        assert_eq!((report_b.recovered, report_b.claimed), (0, 0));
        assert_eq!(*recorder.seen.lock().unwrap(), ids);
    }

    #[tokio::test]
    async fn claims_recovered_mid_batch_are_skipped() {
        /// Publishes, then lets another relay take over everything in flight.
        struct TakeOver {
            db: InMemoryDatabase,
            published: Mutex<Vec<EnvelopeId>>,
        }

        #[async_trait]
        impl Transport for TakeOver {
            async fn publish(&self, envelope: &EventEnvelope) -> Result<(), TransportError> {
                self.published.lock().unwrap().push(envelope.id);
                let later = chrono::Utc::now() + chrono::Duration::seconds(1);
                self.db.recover_stale(later).await.unwrap();
                self.db.claim_pending(10, later).await.unwrap();
                Ok(())
            }

            async fn subscribe(&self, _event_type: &str, _subscriber: Arc<dyn Subscriber>) {}
        }

        let db = InMemoryDatabase::new();
        let first = append(&db, AggregateId::new(), None).await;
        append(&db, AggregateId::new(), None).await;
        append(&db, AggregateId::new(), None).await;
        let transport = Arc::new(TakeOver {
            db: db.clone(),
            published: Mutex::new(Vec::new()),
        });
        // Renews before every envelope.
        let relay = OutboxRelay::new(
            Arc::new(db.clone()),
            transport.clone(),
            CommitSignal::new(),
            RelayConfig {
                stale_after: Duration::ZERO,
                ..RelayConfig::default()
            },
        );

        let report = relay.tick().await.unwrap();
        assert_eq!(report.claimed, 3);
        assert_eq!(report.published, 1);
        assert_eq!(report.lost, 2);
        assert_eq!(*transport.published.lock().unwrap(), vec![first]);
    }

    #[tokio::test]
    async fn concurrent_relays_keep_aggregate_order() {
        let db = InMemoryDatabase::new();
        let aggregates: Vec<AggregateId> = (0..3).map(|_| AggregateId::new()).collect();
        let mut appended = Vec::new();
        for _ in 0..4 {
            for aggregate in &aggregates {
                appended.push((*aggregate, append(&db, *aggregate, None).await));
            }
        }
        let (transport, recorder) = slow_transport(Duration::from_millis(5)).await;
        let transport: Arc<dyn Transport> = Arc::new(transport);
        let relays: Vec<OutboxRelay> = (0..3)
            .map(|_| {
                OutboxRelay::new(
                    Arc::new(db.clone()),
                    transport.clone(),
                    CommitSignal::new(),
                    RelayConfig::default(),
                )
            })
            .collect();

        loop {
            let reports =
                futures_util::future::join_all(relays.iter().map(|relay| relay.tick())).await;
            if reports.into_iter().all(|report| report.unwrap().is_idle()) {
                break;
            }
        }

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), appended.len());
        for aggregate in &aggregates {
            let expected: Vec<EnvelopeId> = appended
                .iter()
                .filter(|(a, _)| a == aggregate)
                .map(|(_, id)| *id)
                .collect();
            let published: Vec<EnvelopeId> = seen
                .iter()
                .copied()
                .filter(|id| expected.contains(id))
                .collect();
            assert_eq!(published, expected);
        }
    }

    #[tokio::test]
    async fn run_wakes_on_commit_and_stops_on_shutdown() {
        let h = Harness::new().await;
        let relay = Arc::new(h.relay(RelayConfig {
            poll_interval: Duration::from_secs(3600),
            ..RelayConfig::default()
        }));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn({
            let relay = relay.clone();
            async move { relay.run(shutdown_rx).await }
        });

        let order_id = h.paid_order().await;
        let record_id = DeliverRecord::id_for(order_id);
        let mut delivered = false;
        for _ in 0..100 {
            if h.db.document("DeliverRecord", record_id).await.is_some() {
                delivered = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(delivered, "relay should run on the commit signal");

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay should stop")
            .unwrap();
    }
}
