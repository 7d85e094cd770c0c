//! Health check endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub queue: QueueHealthResponse,
}

#[derive(Debug, Serialize)]
pub struct QueueHealthResponse {
    pub backend: String,
    pub open_queues: usize,
    pub pending_scans: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.registry();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        queue: QueueHealthResponse {
            backend: registry.backend_type().to_string(),
            open_queues: registry.cached_count(),
            pending_scans: registry.pending().len(),
        },
    })
}
