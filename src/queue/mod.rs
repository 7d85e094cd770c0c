//! Queue management engine.
//!
//! - [`QueueRegistry`] resolves queue names to cached [`QueueInstance`]s
//! - [`QueueInstance`] runs the message lifecycle against one storage handle
//! - [`StorageProvider`] / [`QueueStorage`] are implemented by the memory,
//!   PostgreSQL and Redis backends
//! - [`QueueService`] is the client-facing contract used by the HTTP API

pub mod backend;
pub mod error;
pub mod factory;
pub mod instance;
pub mod memory_backend;
pub mod message;
pub mod pending;
pub mod postgres_backend;
pub mod redis_backend;
pub mod registry;
pub mod service;

pub use backend::{QueueStorage, StorageError, StorageProvider};
pub use error::QueueError;
pub use factory::{create_storage_backend, StorageBackend};
pub use instance::QueueInstance;
pub use memory_backend::MemoryStorageProvider;
pub use message::QueueMessage;
pub use pending::PendingScanSet;
pub use postgres_backend::PostgresStorageProvider;
pub use redis_backend::RedisStorageProvider;
pub use registry::{is_valid_queue_name, normalize, QueueRegistry};
pub use service::{QueueResponse, QueueService, ResponseValue};
