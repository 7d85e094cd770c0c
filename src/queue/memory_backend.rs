//! In-memory queue storage backend.
//!
//! Messages live in process memory and are lost on restart. This is the
//! default backend and the one used by the test suite.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::backend::{QueueStorage, StorageError, StorageProvider};
use super::message::{orphan_cutoff, QueueMessage};

/// Main and ephemeral storage of one queue.
#[derive(Debug, Default)]
struct QueueData {
    next_id: i64,
    main: VecDeque<QueueMessage>,
    ephemeral: BTreeMap<i64, QueueMessage>,
}

/// In-memory storage provider.
///
/// Queue data is kept here rather than in the handles so that evicting and
/// reopening a queue keeps its messages.
#[derive(Default)]
pub struct MemoryStorageProvider {
    /// Queue name -> creation time
    metadata: DashMap<String, DateTime<Utc>>,

    /// Queue name -> data
    queues: DashMap<String, Arc<Mutex<QueueData>>>,
}

impl MemoryStorageProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorageProvider {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn queue_exists(&self, queue_name: &str) -> Result<bool, StorageError> {
        Ok(self.metadata.contains_key(queue_name))
    }

    async fn init_queue(&self, queue_name: &str) -> Result<bool, StorageError> {
        self.queues.entry(queue_name.to_string()).or_default();
        self.metadata
            .entry(queue_name.to_string())
            .or_insert_with(Utc::now);

        tracing::debug!(queue = %queue_name, "Memory queue initialized");
        Ok(true)
    }

    async fn all_queue_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.metadata.iter().map(|e| e.key().clone()).collect())
    }

    async fn open(&self, queue_name: &str) -> Result<Arc<dyn QueueStorage>, StorageError> {
        let data = self
            .queues
            .entry(queue_name.to_string())
            .or_default()
            .clone();

        Ok(Arc::new(MemoryQueueStorage {
            queue_name: queue_name.to_string(),
            data,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle to one in-memory queue.
pub struct MemoryQueueStorage {
    queue_name: String,
    data: Arc<Mutex<QueueData>>,
    closed: AtomicBool,
}

impl MemoryQueueStorage {
    fn check_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueStorage for MemoryQueueStorage {
    fn backend_type(&self) -> &'static str {
        "memory"
    }

    async fn enqueue(&self, msg: &QueueMessage) -> Result<QueueMessage, StorageError> {
        self.check_open()?;
        let mut data = self.data.lock().await;

        data.next_id += 1;
        let mut stored = msg.clone();
        stored.id = data.next_id;
        data.main.push_back(stored.clone());

        Ok(stored)
    }

    async fn take(&self) -> Result<Option<QueueMessage>, StorageError> {
        self.check_open()?;
        let mut data = self.data.lock().await;

        let Some(mut msg) = data.main.pop_front() else {
            return Ok(None);
        };
        msg.timestamp = Utc::now();
        data.ephemeral.insert(msg.id, msg.clone());

        Ok(Some(msg))
    }

    async fn remove_from_ephemeral(&self, msg: &QueueMessage) -> Result<bool, StorageError> {
        self.check_open()?;
        let mut data = self.data.lock().await;
        Ok(data.ephemeral.remove(&msg.id).is_some())
    }

    async fn move_from_ephemeral(
        &self,
        msg: &QueueMessage,
        count_requeue: bool,
    ) -> Result<bool, StorageError> {
        self.check_open()?;
        let mut data = self.data.lock().await;

        let Some(stored) = data.ephemeral.remove(&msg.id) else {
            return Ok(false);
        };
        data.main.push_back(stored.requeued(count_requeue));

        Ok(true)
    }

    async fn orphan_messages(&self, threshold_ms: u64) -> Result<Vec<QueueMessage>, StorageError> {
        self.check_open()?;
        let cutoff = orphan_cutoff(threshold_ms);
        let data = self.data.lock().await;

        // BTreeMap iteration is already ordered by ID
        Ok(data
            .ephemeral
            .values()
            .filter(|m| m.timestamp < cutoff)
            .cloned()
            .collect())
    }

    async fn queue_size(&self) -> Result<i64, StorageError> {
        self.check_open()?;
        Ok(self.data.lock().await.main.len() as i64)
    }

    async fn ephemeral_size(&self) -> Result<i64, StorageError> {
        self.check_open()?;
        Ok(self.data.lock().await.ephemeral.len() as i64)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        tracing::debug!(queue = %self.queue_name, "Memory queue handle closed");
    }
}
