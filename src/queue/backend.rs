//! Backend traits for queue storage.
//!
//! Storage is split in two layers:
//!
//! - [`StorageProvider`] is the backend kind (PostgreSQL, Redis, memory). It
//!   owns queue provisioning, the queue metadata store and opens per-queue
//!   handles.
//! - [`QueueStorage`] is the handle for one queue: main storage (pending
//!   messages, FIFO) plus ephemeral storage (in-flight messages keyed by ID).
//!
//! New backends are added by implementing both traits.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::message::QueueMessage;

/// Errors that can occur during storage backend operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Redis operation failed
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// PostgreSQL operation failed
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend is temporarily unavailable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// The queue handle was shut down
    #[error("Queue storage is closed")]
    Closed,

    /// Stored data could not be interpreted
    #[error("Corrupted data: {0}")]
    Corrupted(String),
}

/// Storage for a single queue.
///
/// # Atomicity
///
/// `take`, `requeue`, `requeue_silent` and `move_from_ephemeral` each move a
/// message between main and ephemeral storage. Implementations must perform
/// each move as one backend-atomic unit: concurrent `take` calls never
/// receive the same message and a crash never leaves a message in both or
/// neither area.
#[async_trait]
pub trait QueueStorage: Send + Sync {
    /// Backend type identifier
    fn backend_type(&self) -> &'static str;

    /// Append a message to main storage.
    ///
    /// The backend assigns the message ID. Returns the stored message.
    async fn enqueue(&self, msg: &QueueMessage) -> Result<QueueMessage, StorageError>;

    /// Pop the oldest pending message into ephemeral storage.
    ///
    /// The returned message carries `timestamp = now`.
    async fn take(&self) -> Result<Option<QueueMessage>, StorageError>;

    /// Remove a message from ephemeral storage.
    ///
    /// Returns `false` if it was not there.
    async fn remove_from_ephemeral(&self, msg: &QueueMessage) -> Result<bool, StorageError>;

    /// Move a message from ephemeral storage back to main storage.
    ///
    /// `count_requeue` controls whether `num_requeues` is incremented.
    /// Returns `false` if the message was not in ephemeral storage.
    async fn move_from_ephemeral(
        &self,
        msg: &QueueMessage,
        count_requeue: bool,
    ) -> Result<bool, StorageError>;

    /// Ephemeral messages taken before `now - threshold_ms`, ordered by ID.
    async fn orphan_messages(&self, threshold_ms: u64) -> Result<Vec<QueueMessage>, StorageError>;

    /// Number of messages in main storage.
    async fn queue_size(&self) -> Result<i64, StorageError>;

    /// Number of messages in ephemeral storage.
    async fn ephemeral_size(&self) -> Result<i64, StorageError>;

    /// Release backend resources held by this handle.
    async fn shutdown(&self);
}

/// A storage backend kind.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Backend type identifier
    fn backend_type(&self) -> &'static str;

    /// Whether storage for the (normalized) queue exists.
    async fn queue_exists(&self, queue_name: &str) -> Result<bool, StorageError>;

    /// Provision storage and record metadata for the (normalized) queue.
    ///
    /// Must be idempotent: provisioning an existing queue is a no-op and an
    /// existing metadata record is not an error.
    async fn init_queue(&self, queue_name: &str) -> Result<bool, StorageError>;

    /// Every queue name recorded in the metadata store.
    async fn all_queue_names(&self) -> Result<Vec<String>, StorageError>;

    /// Open a storage handle for the (normalized) queue.
    async fn open(&self, queue_name: &str) -> Result<Arc<dyn QueueStorage>, StorageError>;
}
