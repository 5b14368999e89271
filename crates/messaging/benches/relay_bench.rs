use std::sync::Arc;

use common::AggregateId;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use messaging::{InMemoryTransport, OutboxRelay, RelayConfig};
use outbox::{CommitSignal, Database, InMemoryDatabase, NewEnvelope};

async fn fill_outbox(db: &InMemoryDatabase, envelopes: usize, aggregates: usize) {
    let ids: Vec<AggregateId> = (0..aggregates).map(|_| AggregateId::new()).collect();
    let mut tx = db.begin().await.unwrap();
    for i in 0..envelopes {
        let envelope = NewEnvelope::builder()
            .event_type("OrderPaid")
            .aggregate_id(ids[i % aggregates])
            .aggregate_type("Order")
            .payload_raw(serde_json::json!({ "seq": i }))
            .try_build()
            .unwrap();
        tx.append(envelope).await.unwrap();
    }
    tx.commit().await.unwrap();
}

fn bench_relay_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("relay/drain");

    for backlog in [100usize, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(backlog), &backlog, |b, &backlog| {
            b.iter(|| {
                rt.block_on(async {
                    let db = InMemoryDatabase::new();
                    fill_outbox(&db, backlog, 16).await;
                    let relay = OutboxRelay::new(
                        Arc::new(db.clone()),
                        Arc::new(InMemoryTransport::new()),
                        CommitSignal::new(),
                        RelayConfig::default(),
                    );
                    while relay.tick().await.unwrap().claimed > 0 {}
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_relay_drain);
criterion_main!(benches);
