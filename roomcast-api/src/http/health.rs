//! Health check endpoints
//!
//! Liveness check plus a snapshot of backplane counters.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use roomcast_cluster::BrokerStats;

use crate::http::AppState;

/// Health check router
pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(stats))
}

/// Basic health check (always returns OK if server is running)
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Connection, group and relay counters for this node
pub async fn stats(State(state): State<AppState>) -> Json<BrokerStats> {
    Json(state.broker.stats())
}
