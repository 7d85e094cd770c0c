//! PostgreSQL persistence module.
//!
//! Provides connection pooling for the PostgreSQL queue backend.

pub mod pool;

pub use pool::{PostgresPool, PostgresPoolError};
