//! Node entry point.

use node::config::{LogFormat, NodeConfig};
use node::Node;
use outbox::PgDatabase;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &NodeConfig) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = NodeConfig::from_env();
    config.validate().expect("invalid relay configuration");

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the backend
    let node = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to PostgreSQL");
            PgDatabase::new(pool.clone())
                .run_migrations()
                .await
                .expect("failed to run migrations");
            Node::postgres(pool, &config).await
        }
        None => {
            tracing::warn!("DATABASE_URL not set, state is kept in memory only");
            Node::in_memory(&config).await
        }
    };

    // 4. Start the relay
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let relay = node.relay.clone();
    let relay_task = tokio::spawn(async move { relay.run(shutdown_rx).await });

    // 5. Build the application
    let app = node::create_app(node.state.clone(), metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, backend = node.state.backend, "starting node");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // 7. Let the relay finish its current tick
    let _ = shutdown_tx.send(true);
    if let Err(err) = relay_task.await {
        tracing::error!(error = %err, "relay task failed");
    }

    tracing::info!("node shut down gracefully");
}
