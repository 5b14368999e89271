//! Propagation engine process.
//!
//! Wires the command bus, the outbox relay, the integration consumers and
//! the order delivery saga over one backend, and serves the operator HTTP
//! surface with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use domain::{CommandBus, PermissionRegistry};
use messaging::{InMemoryTransport, OutboxRelay, default_consumers};
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{CommitSignal, Database, InMemoryDatabase, OutboxStore, PgDatabase};
use saga::{InMemorySagaStore, OrderDelivery, PgSagaStore, SagaCoordinator, SagaStore};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::NodeConfig;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub backend: &'static str,
    pub bus: CommandBus,
    pub outbox: Arc<dyn OutboxStore>,
    pub signal: CommitSignal,
    pub sagas: Arc<dyn SagaStore>,
    pub order_delivery: Arc<SagaCoordinator<OrderDelivery>>,
}

/// Every long-lived component of one process.
pub struct Node {
    pub state: Arc<AppState>,
    pub relay: Arc<OutboxRelay>,
}

impl Node {
    /// A node keeping everything in process memory.
    pub async fn in_memory(config: &NodeConfig) -> Self {
        let database = InMemoryDatabase::new();
        Self::assemble(
            "memory",
            Arc::new(database.clone()),
            Arc::new(database),
            Arc::new(InMemorySagaStore::new()),
            config,
        )
        .await
    }

    /// A node on PostgreSQL. Migrations must have run.
    pub async fn postgres(pool: PgPool, config: &NodeConfig) -> Self {
        let database = PgDatabase::new(pool.clone());
        Self::assemble(
            "postgres",
            Arc::new(database.clone()),
            Arc::new(database),
            Arc::new(PgSagaStore::new(pool)),
            config,
        )
        .await
    }

    async fn assemble(
        backend: &'static str,
        database: Arc<dyn Database>,
        outbox: Arc<dyn OutboxStore>,
        sagas: Arc<dyn SagaStore>,
        config: &NodeConfig,
    ) -> Self {
        let signal = CommitSignal::new();
        let bus = CommandBus::standard(
            database,
            signal.clone(),
            Arc::new(PermissionRegistry::builtin()),
            config.limits,
        );

        let transport = InMemoryTransport::new();
        for consumer in default_consumers(&bus, config.consumer_command_timeout) {
            tracing::debug!(consumer = consumer.name(), "subscribing consumer");
            consumer.subscribe(&transport).await;
        }
        let order_delivery = Arc::new(SagaCoordinator::new(
            OrderDelivery,
            sagas.clone(),
            bus.clone(),
        ));
        order_delivery.clone().subscribe(&transport).await;

        let relay = Arc::new(OutboxRelay::new(
            outbox.clone(),
            Arc::new(transport),
            signal.clone(),
            config.relay.clone(),
        ));

        Self {
            state: Arc::new(AppState {
                backend,
                bus,
                outbox,
                signal,
                sagas,
                order_delivery,
            }),
            relay,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/commands", post(routes::commands::send))
        .route("/operator/envelopes", get(routes::operator::list_envelopes))
        .route(
            "/operator/envelopes/{id}/requeue",
            post(routes::operator::requeue_envelope),
        )
        .route("/operator/sagas", get(routes::operator::list_sagas))
        .route("/operator/sagas/{id}/resume", post(routes::operator::resume_saga))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
