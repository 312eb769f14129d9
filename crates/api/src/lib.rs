//! HTTP API server with observability for the supply order fulfillment engine.
//!
//! Exposes orders, their lines, status transitions and the history ledger
//! over REST, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use fulfillment::{Catalog, DeliverySink, FulfillmentService, ServiceConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{HistoryLedger, OrderStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + HistoryLedger + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{items, orders};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(orders::create::<S>).get(orders::list::<S>))
        .route(
            "/orders/{id}",
            get(orders::get::<S>)
                .put(orders::replace_header::<S>)
                .delete(orders::cancel::<S>),
        )
        .route("/orders/{id}/status", patch(orders::transition::<S>))
        .route("/orders/{id}/history", get(orders::history::<S>))
        .route("/orders/{id}/delivery", get(orders::delivery::<S>))
        .route("/orders/{id}/items", post(items::add::<S>))
        .route(
            "/items/{item_id}",
            put(items::update::<S>)
                .patch(items::update::<S>)
                .delete(items::remove::<S>),
        )
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

/// Creates the application state around a store and its collaborators.
pub fn create_state<S: OrderStore + HistoryLedger + 'static>(
    store: S,
    catalog: Arc<dyn Catalog>,
    delivery: Arc<dyn DeliverySink>,
    config: ServiceConfig,
) -> Arc<AppState<S>> {
    let service = FulfillmentService::new(store, catalog, delivery).with_config(config);
    Arc::new(AppState { service })
}
