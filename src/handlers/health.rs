use axum::{extract::State, Json};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::models::HealthResponse;
use crate::AppState;

/// Health check endpoint
pub async fn health_check(State(app_state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let rooms = app_state.registry.room_count().await;
    let connections = app_state.registry.connection_count().await;
    debug!("Health check requested: rooms={} connections={}", rooms, connections);
    Json(HealthResponse {
        status: "ok".to_string(),
        redis: app_state.redis_healthy.load(Ordering::Relaxed),
        rooms,
        connections,
    })
}
