// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;

// Queue engine
pub mod queue;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod tasks;
