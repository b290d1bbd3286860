//! API server entry point.

use api::{Config, LogFormat, RuntimeConfig, SagaRuntime};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use payments::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
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

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve<O, L>(config: &Config, runtime: SagaRuntime<O, L>, metrics_handle: PrometheusHandle)
where
    O: OrderStore + Clone + 'static,
    L: LedgerStore + Clone + 'static,
{
    let app = api::create_app(runtime.state(), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Requests are done; let dispatchers and consumers finish their work.
    runtime.shutdown().await;
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let runtime_config = RuntimeConfig {
        dispatcher: config.dispatcher_config(),
        consumer: config.consumer_config(),
    };

    // 3. Start both services on the configured backend
    match config.database_urls() {
        Some((orders_url, payments_url)) => {
            let orders_pool = PgPoolOptions::new()
                .connect(orders_url)
                .await
                .expect("failed to connect to orders database");
            let payments_pool = PgPoolOptions::new()
                .connect(payments_url)
                .await
                .expect("failed to connect to payments database");

            let orders_store = PostgresOrderStore::new(orders_pool);
            orders_store
                .run_migrations()
                .await
                .expect("orders migrations failed");
            let ledger = PostgresLedgerStore::new(payments_pool);
            ledger
                .run_migrations()
                .await
                .expect("payments migrations failed");

            let runtime = SagaRuntime::start(
                orders_store,
                ledger,
                config.product_catalog(),
                "postgres",
                runtime_config,
            )
            .await;
            serve(&config, runtime, metrics_handle).await;
        }
        None => {
            tracing::warn!("database URLs not set, using in-memory stores");
            let runtime = SagaRuntime::start(
                InMemoryOrderStore::new(),
                InMemoryLedgerStore::new(),
                config.product_catalog(),
                "memory",
                runtime_config,
            )
            .await;
            serve(&config, runtime, metrics_handle).await;
        }
    }
}
