//! Redis queue storage backend.
//!
//! Each queue uses four keys under the configured prefix:
//!
//! - `{prefix}queue_{name}_l` - list of pending message IDs (FIFO)
//! - `{prefix}queue_{name}_h` - hash of message ID to JSON body
//! - `{prefix}queue_{name}_s` - sorted set of in-flight IDs scored by take time (ms)
//! - `{prefix}queue_{name}_seq` - message ID counter
//!
//! Moves between pending and in-flight run as Lua scripts so each is atomic
//! on the server. Queue names are recorded in the `{prefix}{metadata_table}`
//! hash. Queues need no provisioning, so every queue exists.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tokio::sync::RwLock;

use crate::redis::{current_time_ms, is_connection_lost, PoolError, RedisPool};

use super::backend::{QueueStorage, StorageError, StorageProvider};
use super::message::{orphan_cutoff, QueueMessage};

/// LPOP the oldest ID, fetch its body and mark it in flight.
///
/// IDs without a body are skipped and counted. Returns `{id, body, skipped}`
/// with empty `id` and `body` when the list ran out.
///
/// KEYS: list, hash, in-flight set. ARGV: take time in ms.
const TAKE_SCRIPT: &str = r#"
local skipped = 0
while true do
    local id = redis.call('LPOP', KEYS[1])
    if not id then
        return {'', '', skipped}
    end
    local body = redis.call('HGET', KEYS[2], id)
    if body then
        redis.call('ZADD', KEYS[3], ARGV[1], id)
        return {id, body, skipped}
    end
    skipped = skipped + 1
end
"#;

/// Move an in-flight ID back to the list tail with an updated body.
///
/// KEYS: in-flight set, hash, list. ARGV: id, new body.
const REQUEUE_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('RPUSH', KEYS[3], ARGV[1])
return 1
"#;

/// Drop an in-flight ID and its body.
///
/// KEYS: in-flight set, hash. ARGV: id.
const FINISH_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
    return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
return 1
"#;

/// Convert pool error to storage error.
fn map_error(err: PoolError) -> StorageError {
    match err {
        PoolError::Redis(e) => StorageError::Redis(e),
    }
}

/// Redis keys of one queue.
#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueKeys {
    list: String,
    hash: String,
    inflight: String,
    seq: String,
}

impl QueueKeys {
    fn new(prefix: &str, queue_name: &str) -> Self {
        let base = format!("{}queue_{}", prefix, queue_name);
        Self {
            list: format!("{}_l", base),
            hash: format!("{}_h", base),
            inflight: format!("{}_s", base),
            seq: format!("{}_seq", base),
        }
    }
}

/// Redis storage provider.
pub struct RedisStorageProvider {
    pool: Arc<RedisPool>,
    prefix: String,
    metadata_key: String,
}

impl RedisStorageProvider {
    pub fn new(pool: Arc<RedisPool>, prefix: String, metadata_table: &str) -> Self {
        let metadata_key = format!("{}{}", prefix, metadata_table);
        Self {
            pool,
            prefix,
            metadata_key,
        }
    }
}

#[async_trait]
impl StorageProvider for RedisStorageProvider {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn queue_exists(&self, _queue_name: &str) -> Result<bool, StorageError> {
        Ok(true)
    }

    async fn init_queue(&self, queue_name: &str) -> Result<bool, StorageError> {
        let key = self.metadata_key.clone();
        let name = queue_name.to_string();

        let recorded: bool = self
            .pool
            .execute(|mut conn| async move { conn.hset_nx(key, name, current_time_ms()).await })
            .await
            .map_err(map_error)?;

        if !recorded {
            tracing::debug!(queue = %queue_name, "Queue metadata already recorded");
        }
        Ok(true)
    }

    async fn all_queue_names(&self) -> Result<Vec<String>, StorageError> {
        let key = self.metadata_key.clone();

        self.pool
            .execute(|mut conn| async move { conn.hkeys(key).await })
            .await
            .map_err(map_error)
    }

    async fn open(&self, queue_name: &str) -> Result<Arc<dyn QueueStorage>, StorageError> {
        let conn = self.pool.open_dedicated().await.map_err(map_error)?;
        let keys = QueueKeys::new(&self.prefix, queue_name);

        tracing::debug!(queue = %queue_name, list_key = %keys.list, "Opened Redis queue connection");

        Ok(Arc::new(RedisQueueStorage::new(
            queue_name,
            keys,
            self.pool.clone(),
            Link::Open(conn),
        )))
    }
}

/// Connection state of one queue handle.
enum Link {
    /// The previous connection was lost; reopened on next use
    Idle,
    Open(MultiplexedConnection),
    /// Shut down for good
    Closed,
}

/// Handle to one Redis-backed queue.
///
/// Owns a dedicated connection. A connection that drops is discarded and a
/// new one is opened by the next operation, so a Redis restart fails only
/// the calls that were in progress.
pub struct RedisQueueStorage {
    queue_name: String,
    keys: QueueKeys,
    pool: Arc<RedisPool>,
    link: RwLock<Link>,
    take_script: Script,
    requeue_script: Script,
    finish_script: Script,
}

impl RedisQueueStorage {
    fn new(queue_name: &str, keys: QueueKeys, pool: Arc<RedisPool>, link: Link) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            keys,
            pool,
            link: RwLock::new(link),
            take_script: Script::new(TAKE_SCRIPT),
            requeue_script: Script::new(REQUEUE_SCRIPT),
            finish_script: Script::new(FINISH_SCRIPT),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StorageError> {
        {
            let link = self.link.read().await;
            match &*link {
                Link::Open(conn) => return Ok(conn.clone()),
                Link::Closed => return Err(StorageError::Closed),
                Link::Idle => {}
            }
        }

        let mut link = self.link.write().await;
        match &*link {
            Link::Open(conn) => Ok(conn.clone()),
            Link::Closed => Err(StorageError::Closed),
            Link::Idle => {
                let conn = self.pool.open_dedicated().await.map_err(map_error)?;
                tracing::info!(queue = %self.queue_name, "Redis queue connection reopened");
                *link = Link::Open(conn.clone());
                Ok(conn)
            }
        }
    }

    /// Discard the connection if `err` shows it was lost.
    async fn release_if_lost(&self, err: &StorageError) {
        let StorageError::Redis(e) = err else {
            return;
        };
        if !is_connection_lost(e) {
            return;
        }

        let mut link = self.link.write().await;
        if matches!(*link, Link::Open(_)) {
            *link = Link::Idle;
            tracing::warn!(
                queue = %self.queue_name,
                error = %e,
                "Redis queue connection lost, reconnecting on next use"
            );
        }
    }

    /// Run `op` on the queue's connection.
    async fn with_connection<T, F, Fut>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let conn = self.connection().await?;
        let result = op(conn).await;
        if let Err(ref e) = result {
            self.release_if_lost(e).await;
        }
        result
    }

    fn parse_body(&self, id: i64, body: &str) -> Result<QueueMessage, StorageError> {
        let mut msg: QueueMessage = serde_json::from_str(body).map_err(|e| {
            StorageError::Corrupted(format!(
                "message {} in queue {}: {}",
                id, self.queue_name, e
            ))
        })?;
        msg.id = id;
        Ok(msg)
    }
}

fn parse_id(raw: &str) -> Result<i64, StorageError> {
    raw.parse::<i64>()
        .map_err(|_| StorageError::Corrupted(format!("invalid message id: {}", raw)))
}

/// ID returned by the take script, `None` when the list was empty.
fn taken_id(raw: &str) -> Result<Option<i64>, StorageError> {
    if raw.is_empty() {
        return Ok(None);
    }
    parse_id(raw).map(Some)
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[async_trait]
impl QueueStorage for RedisQueueStorage {
    fn backend_type(&self) -> &'static str {
        "redis"
    }

    async fn enqueue(&self, msg: &QueueMessage) -> Result<QueueMessage, StorageError> {
        self.with_connection(|mut conn| async move {
            let id: i64 = conn.incr(&self.keys.seq, 1).await?;
            let mut stored = msg.clone();
            stored.id = id;
            let body = serde_json::to_string(&stored)?;

            let _: () = redis::pipe()
                .atomic()
                .hset(&self.keys.hash, id, body)
                .ignore()
                .rpush(&self.keys.list, id)
                .ignore()
                .query_async(&mut conn)
                .await?;

            Ok::<_, StorageError>(stored)
        })
        .await
    }

    async fn take(&self) -> Result<Option<QueueMessage>, StorageError> {
        let now_ms = current_time_ms();

        let (raw_id, body, skipped): (String, String, i64) = self
            .with_connection(|mut conn| async move {
                Ok::<_, StorageError>(self
                    .take_script
                    .key(&self.keys.list)
                    .key(&self.keys.hash)
                    .key(&self.keys.inflight)
                    .arg(now_ms)
                    .invoke_async(&mut conn)
                    .await?)
            })
            .await?;

        if skipped > 0 {
            tracing::warn!(
                queue = %self.queue_name,
                skipped = skipped,
                "Dropped pending IDs without a stored body"
            );
        }
        let Some(id) = taken_id(&raw_id)? else {
            return Ok(None);
        };

        let mut msg = self.parse_body(id, &body)?;
        msg.timestamp = millis_to_datetime(now_ms);
        Ok(Some(msg))
    }

    async fn remove_from_ephemeral(&self, msg: &QueueMessage) -> Result<bool, StorageError> {
        let removed: i64 = self
            .with_connection(|mut conn| async move {
                Ok::<_, StorageError>(self
                    .finish_script
                    .key(&self.keys.inflight)
                    .key(&self.keys.hash)
                    .arg(msg.id)
                    .invoke_async(&mut conn)
                    .await?)
            })
            .await?;

        Ok(removed == 1)
    }

    async fn move_from_ephemeral(
        &self,
        msg: &QueueMessage,
        count_requeue: bool,
    ) -> Result<bool, StorageError> {
        self.with_connection(|mut conn| async move {
            // The stored body is authoritative; the script only applies if the
            // message is still in flight.
            let body: Option<String> = conn.hget(&self.keys.hash, msg.id).await?;
            let Some(body) = body else {
                return Ok(false);
            };
            let requeued = self.parse_body(msg.id, &body)?.requeued(count_requeue);
            let new_body = serde_json::to_string(&requeued)?;

            let moved: i64 = self
                .requeue_script
                .key(&self.keys.inflight)
                .key(&self.keys.hash)
                .key(&self.keys.list)
                .arg(msg.id)
                .arg(new_body)
                .invoke_async(&mut conn)
                .await?;

            Ok::<_, StorageError>(moved == 1)
        })
        .await
    }

    async fn orphan_messages(&self, threshold_ms: u64) -> Result<Vec<QueueMessage>, StorageError> {
        let cutoff_ms = orphan_cutoff(threshold_ms).timestamp_millis();

        let (entries, bodies) = self
            .with_connection(|mut conn| async move {
                let entries: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
                    .arg(&self.keys.inflight)
                    .arg("-inf")
                    .arg(format!("({}", cutoff_ms))
                    .arg("WITHSCORES")
                    .query_async(&mut conn)
                    .await?;

                if entries.is_empty() {
                    return Ok((entries, Vec::new()));
                }

                let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
                let bodies: Vec<Option<String>> = redis::cmd("HMGET")
                    .arg(&self.keys.hash)
                    .arg(&ids)
                    .query_async(&mut conn)
                    .await?;

                Ok::<_, StorageError>((entries, bodies))
            })
            .await?;

        let mut messages = Vec::with_capacity(entries.len());
        for ((raw_id, score), body) in entries.iter().zip(bodies) {
            let Some(body) = body else {
                // Finished between the two reads
                continue;
            };
            match parse_id(raw_id).and_then(|id| self.parse_body(id, &body)) {
                Ok(mut msg) => {
                    msg.timestamp = millis_to_datetime(*score as i64);
                    messages.push(msg);
                }
                Err(e) => {
                    tracing::warn!(
                        queue = %self.queue_name,
                        message_id = %raw_id,
                        error = %e,
                        "Skipping unreadable in-flight message"
                    );
                }
            }
        }

        messages.sort_by_key(|m| m.id);
        Ok(messages)
    }

    async fn queue_size(&self) -> Result<i64, StorageError> {
        self.with_connection(|mut conn| async move {
            Ok::<_, StorageError>(conn.llen(&self.keys.list).await?)
        })
            .await
    }

    async fn ephemeral_size(&self) -> Result<i64, StorageError> {
        self.with_connection(|mut conn| async move {
            Ok::<_, StorageError>(conn.zcard(&self.keys.inflight).await?)
        })
            .await
    }

    async fn shutdown(&self) {
        let mut link = self.link.write().await;
        if let Link::Open(_) = std::mem::replace(&mut *link, Link::Closed) {
            tracing::debug!(queue = %self.queue_name, "Redis queue connection released");
        }
    }
}
