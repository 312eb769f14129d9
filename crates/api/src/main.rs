//! API server entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use fulfillment::{InMemoryCatalog, LoggingDeliverySink, ServiceConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{HistoryLedger, InMemoryOrderStore, OrderStore, PostgresOrderStore};
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
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

fn load_catalog(config: &Config) -> InMemoryCatalog {
    let Some(path) = &config.catalog_file else {
        tracing::warn!("CATALOG_FILE not set, starting with an empty catalog");
        return InMemoryCatalog::new();
    };

    let json = std::fs::read_to_string(path).expect("failed to read catalog file");
    let catalog = InMemoryCatalog::from_json(&json).expect("failed to parse catalog file");
    tracing::info!(path = %path.display(), items = catalog.len(), "catalog loaded");
    catalog
}

async fn serve<S: OrderStore + HistoryLedger + 'static>(
    store: S,
    config: &Config,
    catalog: InMemoryCatalog,
    metrics_handle: PrometheusHandle,
) {
    let state = api::create_state(
        store,
        Arc::new(catalog),
        Arc::new(LoggingDeliverySink),
        ServiceConfig {
            order_number_max_retries: config.order_number_max_retries,
        },
    );
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
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

    // 3. Seed the item catalog
    let catalog = load_catalog(&config);

    // 4. Pick the store and serve
    match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresOrderStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL order store");
            serve(store, &config, catalog, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory only");
            serve(InMemoryOrderStore::new(), &config, catalog, metrics_handle).await;
        }
    }

    tracing::info!("server shut down gracefully");
}
