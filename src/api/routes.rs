use axum::{
    routing::{get, post},
    Router,
};

use crate::server::AppState;

use super::health::health;
use super::metrics::prometheus_metrics;
use super::queue::{
    ephemeral_size, finish, init_queue, queue, queue_exists, queue_size, requeue, requeue_silent,
    take,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Queue operations
        .nest(
            "/api/v1",
            Router::new()
                .route("/queueExists", post(queue_exists))
                .route("/initQueue", post(init_queue))
                .route("/queue", post(queue))
                .route("/requeue", post(requeue))
                .route("/requeueSilent", post(requeue_silent))
                .route("/finish", post(finish))
                .route("/take", post(take))
                .route("/queueSize", post(queue_size))
                .route("/ephemeralSize", post(ephemeral_size)),
        )
}
