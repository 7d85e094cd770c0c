//! Redis connection handling for the Redis queue backend.

pub mod pool;

pub use pool::{is_connection_lost, PoolError, RedisPool};

/// Get current time in milliseconds since epoch
pub(crate) fn current_time_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
