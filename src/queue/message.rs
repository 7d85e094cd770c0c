//! Queue message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message moving through a queue.
///
/// `id` is assigned by the storage backend on enqueue and stays unique within
/// the queue for as long as the message is referenced. `num_requeues` only
/// ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Backend-assigned message ID (0 until enqueued)
    pub id: i64,

    /// When the message was first enqueued
    pub original_timestamp: DateTime<Utc>,

    /// Last state transition (enqueue, take, requeue)
    pub timestamp: DateTime<Utc>,

    /// Number of times the message was put back into the queue
    pub num_requeues: i32,

    /// Opaque payload
    pub content: Vec<u8>,
}

impl QueueMessage {
    /// Create a fresh, not yet enqueued message.
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            original_timestamp: now,
            timestamp: now,
            num_requeues: 0,
            content: content.into(),
        }
    }

    /// Rebuild a message from its persisted fields.
    ///
    /// Negative IDs and requeue counts are clamped to zero.
    pub fn from_parts(
        id: i64,
        original_timestamp: DateTime<Utc>,
        timestamp: DateTime<Utc>,
        num_requeues: i32,
        content: Vec<u8>,
    ) -> Self {
        Self {
            id: id.max(0),
            original_timestamp,
            timestamp,
            num_requeues: num_requeues.max(0),
            content,
        }
    }

    /// Copy of this message as it looks once put back into main storage.
    ///
    /// `count_requeue` is false for silent requeues.
    pub fn requeued(&self, count_requeue: bool) -> Self {
        let mut msg = self.clone();
        msg.timestamp = Utc::now();
        if count_requeue {
            msg.num_requeues += 1;
        }
        msg
    }

    /// Whether the message was last touched before `now - threshold_ms`.
    pub fn is_older_than(&self, threshold_ms: u64) -> bool {
        self.timestamp < orphan_cutoff(threshold_ms)
    }
}

/// Oldest take time a message may carry before it counts as orphaned.
pub fn orphan_cutoff(threshold_ms: u64) -> DateTime<Utc> {
    let threshold = chrono::Duration::milliseconds(threshold_ms.min(i64::MAX as u64) as i64);
    Utc::now() - threshold
}
