//! A live queue bound to one storage handle.

use std::sync::Arc;

use tokio::sync::RwLock;

use super::backend::{QueueStorage, StorageError};
use super::message::QueueMessage;

/// One open queue.
///
/// Every operation holds a read guard on the shutdown gate, so `shutdown`
/// waits for in-progress operations and no operation starts on a closed
/// instance. Operations attempted after shutdown fail with
/// [`StorageError::Closed`].
pub struct QueueInstance {
    name: String,
    storage: Arc<dyn QueueStorage>,
    /// `true` once shut down
    closed: RwLock<bool>,
}

impl QueueInstance {
    pub fn new(name: impl Into<String>, storage: Arc<dyn QueueStorage>) -> Self {
        Self {
            name: name.into(),
            storage,
            closed: RwLock::new(false),
        }
    }

    /// Normalized queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend_type(&self) -> &'static str {
        self.storage.backend_type()
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }

    /// Append a message. Returns `true` once it is stored.
    pub async fn enqueue(&self, msg: &QueueMessage) -> Result<bool, StorageError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }

        let stored = self.storage.enqueue(msg).await?;
        tracing::trace!(queue = %self.name, message_id = stored.id, "Message enqueued");
        Ok(true)
    }

    /// Take the oldest pending message, marking it in flight.
    pub async fn take(&self) -> Result<Option<QueueMessage>, StorageError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }

        let msg = self.storage.take().await?;
        if let Some(ref m) = msg {
            tracing::trace!(queue = %self.name, message_id = m.id, "Message taken");
        }
        Ok(msg)
    }

    /// Acknowledge an in-flight message. Unknown messages return `false`.
    pub async fn finish(&self, msg: &QueueMessage) -> Result<bool, StorageError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }

        self.storage.remove_from_ephemeral(msg).await
    }

    /// Put an in-flight message back, counting the requeue.
    pub async fn requeue(&self, msg: &QueueMessage) -> Result<bool, StorageError> {
        self.move_back(msg, true).await
    }

    /// Put an in-flight message back without counting the requeue.
    pub async fn requeue_silent(&self, msg: &QueueMessage) -> Result<bool, StorageError> {
        self.move_back(msg, false).await
    }

    /// Recover an orphan message into main storage, counting the requeue.
    pub async fn move_from_ephemeral_to_queue_storage(
        &self,
        msg: &QueueMessage,
    ) -> Result<bool, StorageError> {
        self.move_back(msg, true).await
    }

    async fn move_back(&self, msg: &QueueMessage, count_requeue: bool) -> Result<bool, StorageError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }

        self.storage.move_from_ephemeral(msg, count_requeue).await
    }

    /// In-flight messages taken more than `threshold_ms` ago, ordered by ID.
    pub async fn orphan_messages(&self, threshold_ms: u64) -> Result<Vec<QueueMessage>, StorageError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }

        self.storage.orphan_messages(threshold_ms).await
    }

    pub async fn queue_size(&self) -> Result<i64, StorageError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }

        self.storage.queue_size().await
    }

    pub async fn ephemeral_size(&self) -> Result<i64, StorageError> {
        let closed = self.closed.read().await;
        if *closed {
            return Err(StorageError::Closed);
        }

        self.storage.ephemeral_size().await
    }

    /// Release backend resources.
    ///
    /// Returns `true` only for the call that actually shut the instance down.
    pub async fn shutdown(&self) -> bool {
        let mut closed = self.closed.write().await;
        if *closed {
            return false;
        }
        *closed = true;

        self.storage.shutdown().await;
        tracing::debug!(queue = %self.name, "Queue instance shut down");
        true
    }
}
