use std::sync::Arc;

use common::AggregateId;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{Command, CommandBus, PermissionRegistry, PropagationLimits};
use outbox::{CommitSignal, InMemoryDatabase};

fn new_bus() -> CommandBus {
    CommandBus::standard(
        Arc::new(InMemoryDatabase::new()),
        CommitSignal::new(),
        Arc::new(PermissionRegistry::builtin()),
        PropagationLimits {
            max_fanout: 10_000,
            ..PropagationLimits::default()
        },
    )
}

async fn seed_role_holders(bus: &CommandBus, holders: usize) -> AggregateId {
    let role_id = AggregateId::new();
    bus.send(Command::CreateRole {
        role_id,
        name: "Editor".into(),
        permissions: vec![],
    })
    .await
    .unwrap();

    for i in 0..holders {
        let user_id = AggregateId::new();
        bus.send(Command::CreateUser {
            user_id,
            username: format!("user-{i}"),
        })
        .await
        .unwrap();
        bus.send(Command::AssignRole { user_id, role_id })
            .await
            .unwrap();
    }
    role_id
}

fn bench_order_pay_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let bus = new_bus();

    c.bench_function("domain/create_and_pay_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                let order_id = AggregateId::new();
                bus.send(Command::CreateOrder {
                    order_id,
                    amount_cents: 1000,
                })
                .await
                .unwrap();
                bus.send(Command::PayOrder { order_id }).await.unwrap();
            });
        });
    });
}

fn bench_role_rename_cascade(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("domain/role_rename_cascade");

    for holders in [10usize, 100] {
        let bus = new_bus();
        let role_id = rt.block_on(seed_role_holders(&bus, holders));
        let mut round = 0u64;

        group.bench_with_input(BenchmarkId::from_parameter(holders), &holders, |b, _| {
            b.iter(|| {
                round += 1;
                rt.block_on(async {
                    bus.send(Command::RenameRole {
                        role_id,
                        name: format!("Editor {round}"),
                    })
                    .await
                    .unwrap();
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_order_pay_cycle, bench_role_rename_cascade);
criterion_main!(benches);
