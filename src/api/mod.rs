//! API layer - HTTP endpoint handlers.

mod health;
mod metrics;
pub mod models;
mod queue;
mod routes;

// Re-export handlers for use in server/app.rs
pub use health::health;
pub use metrics::prometheus_metrics;
pub use models::{QueueRequest, WireMessage, WireResponse, WireValue};
pub use routes::api_routes;
