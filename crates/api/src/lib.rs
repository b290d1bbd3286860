//! HTTP API server with observability for the order/payment saga.
//!
//! Exposes the order and payment services over REST, streams order status
//! as Server-Sent Events, and carries structured logging (tracing) and
//! Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod runtime;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::OrderStore;
use payments::LedgerStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::ApiError;
pub use runtime::{AppState, RuntimeConfig, SagaRuntime};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<O, L>(state: Arc<AppState<O, L>>, metrics_handle: PrometheusHandle) -> Router
where
    O: OrderStore + 'static,
    L: LedgerStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<O, L>))
        .route("/orders", post(routes::orders::create::<O, L>))
        .route("/orders/{id}", get(routes::orders::get::<O, L>))
        .route("/orders/{id}/status", get(routes::orders::status::<O, L>))
        .route("/users/{id}/orders", get(routes::orders::list_by_user::<O, L>))
        .route("/accounts", post(routes::accounts::create::<O, L>))
        .route("/accounts/{id}", get(routes::accounts::get::<O, L>))
        .route("/accounts/{id}/deposit", post(routes::accounts::deposit::<O, L>))
        .route("/accounts/{id}/withdraw", post(routes::accounts::withdraw::<O, L>))
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
