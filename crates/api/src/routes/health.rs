//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use orders::OrderStore;
use payments::LedgerStore;
use serde::Serialize;

use crate::runtime::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: &'static str,
}

/// GET /health: liveness plus the storage backend in use.
pub async fn check<O: OrderStore + 'static, L: LedgerStore + 'static>(
    State(state): State<Arc<AppState<O, L>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: state.backend,
    })
}
