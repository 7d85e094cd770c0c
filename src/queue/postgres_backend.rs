//! PostgreSQL queue storage backend.
//!
//! Each queue is stored in two tables:
//!
//! - `queue_{name}` - main storage, `queue_id BIGSERIAL` gives FIFO order
//! - `queue_{name}_ephemeral` - in-flight messages keyed by `queue_id`,
//!   indexed on `msg_timestamp` for the orphan scan
//!
//! Queue names are recorded in a metadata table (`queue_metadata` by
//! default). Every move between the two tables runs in one transaction, and
//! `take` locks its row with `FOR UPDATE SKIP LOCKED` so concurrent takers
//! never receive the same message.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::config::DatabaseConfig;
use crate::postgres::{PostgresPool, PostgresPoolError};

use super::backend::{QueueStorage, StorageError, StorageProvider};
use super::message::{orphan_cutoff, QueueMessage};

/// Row layout shared by both queue tables.
type MessageRow = (i64, DateTime<Utc>, DateTime<Utc>, i32, Vec<u8>);

/// PostgreSQL error codes raised when concurrent `CREATE ... IF NOT EXISTS`
/// statements race.
const DUPLICATE_CODES: [&str; 3] = ["23505", "42P07", "42710"];

fn main_table(queue_name: &str) -> String {
    format!("queue_{}", queue_name)
}

fn ephemeral_table(queue_name: &str) -> String {
    format!("queue_{}_ephemeral", queue_name)
}

/// Whether `name` is safe to splice into SQL as an unquoted identifier.
fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        && !name.as_bytes()[0].is_ascii_digit()
}

fn row_to_message(row: MessageRow) -> QueueMessage {
    let (id, original_timestamp, timestamp, num_requeues, content) = row;
    QueueMessage::from_parts(id, original_timestamp, timestamp, num_requeues, content)
}

fn is_duplicate_object(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| DUPLICATE_CODES.contains(&&*code))
            .unwrap_or(false),
        _ => false,
    }
}

fn map_pool_error(err: PostgresPoolError) -> StorageError {
    match err {
        PostgresPoolError::Sqlx(e) => StorageError::Postgres(e),
        PostgresPoolError::ConnectionUnavailable(msg) => StorageError::Unavailable(msg),
    }
}

/// PostgreSQL storage provider.
pub struct PostgresStorageProvider {
    /// Shared pool for metadata and provisioning
    pool: PostgresPool,

    /// Settings used to build per-queue pools
    config: DatabaseConfig,

    /// Metadata table name
    metadata_table: String,
}

impl PostgresStorageProvider {
    /// Create the provider and make sure the metadata table exists.
    pub async fn new(
        pool: PostgresPool,
        config: DatabaseConfig,
        metadata_table: String,
    ) -> Result<Self, StorageError> {
        if !is_safe_identifier(&metadata_table) {
            return Err(StorageError::Unavailable(format!(
                "invalid metadata table name: {}",
                metadata_table
            )));
        }

        let provider = Self {
            pool,
            config,
            metadata_table,
        };
        provider.ensure_metadata_table().await?;

        tracing::info!(
            metadata_table = %provider.metadata_table,
            url = %provider.pool.database_url_masked(),
            "PostgreSQL storage provider ready"
        );

        Ok(provider)
    }

    async fn ensure_metadata_table(&self) -> Result<(), StorageError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                queue_name TEXT PRIMARY KEY,
                queue_timestamp_create TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.metadata_table
        );

        match sqlx::query(&sql).execute(self.pool.pool()).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_object(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_queue_tables(&self, queue_name: &str) -> Result<(), sqlx::Error> {
        let main = main_table(queue_name);
        let ephemeral = ephemeral_table(queue_name);

        let statements = [
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    queue_id BIGSERIAL PRIMARY KEY,
                    msg_org_timestamp TIMESTAMPTZ NOT NULL,
                    msg_timestamp TIMESTAMPTZ NOT NULL,
                    msg_num_requeues INTEGER NOT NULL DEFAULT 0,
                    msg_content BYTEA NOT NULL
                )
                "#,
                main
            ),
            format!(
                r#"
                CREATE TABLE IF NOT EXISTS {} (
                    queue_id BIGINT PRIMARY KEY,
                    msg_org_timestamp TIMESTAMPTZ NOT NULL,
                    msg_timestamp TIMESTAMPTZ NOT NULL,
                    msg_num_requeues INTEGER NOT NULL DEFAULT 0,
                    msg_content BYTEA NOT NULL
                )
                "#,
                ephemeral
            ),
            format!(
                "CREATE INDEX IF NOT EXISTS {0}_ts_idx ON {0} (msg_timestamp)",
                ephemeral
            ),
        ];

        for sql in statements.iter() {
            match sqlx::query(sql).execute(self.pool.pool()).await {
                Ok(_) => {}
                Err(e) if is_duplicate_object(&e) => {
                    tracing::debug!(queue = %queue_name, "Queue table created concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StorageProvider for PostgresStorageProvider {
    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn queue_exists(&self, queue_name: &str) -> Result<bool, StorageError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM information_schema.tables
            WHERE table_schema = current_schema() AND table_name IN ($1, $2)
            "#,
        )
        .bind(main_table(queue_name))
        .bind(ephemeral_table(queue_name))
        .fetch_one(self.pool.pool())
        .await?;

        Ok(count == 2)
    }

    async fn init_queue(&self, queue_name: &str) -> Result<bool, StorageError> {
        if !is_safe_identifier(&ephemeral_table(queue_name)) {
            return Err(StorageError::Unavailable(format!(
                "queue name too long for PostgreSQL: {}",
                queue_name
            )));
        }

        self.create_queue_tables(queue_name).await?;

        let sql = format!(
            "INSERT INTO {} (queue_name, queue_timestamp_create) VALUES ($1, NOW()) ON CONFLICT (queue_name) DO NOTHING",
            self.metadata_table
        );
        let result = sqlx::query(&sql)
            .bind(queue_name)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(queue = %queue_name, "Queue metadata already recorded");
        }

        Ok(true)
    }

    async fn all_queue_names(&self) -> Result<Vec<String>, StorageError> {
        let sql = format!("SELECT queue_name FROM {} ORDER BY queue_name", self.metadata_table);
        let rows: Vec<(String,)> = sqlx::query_as(&sql).fetch_all(self.pool.pool()).await?;

        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn open(&self, queue_name: &str) -> Result<Arc<dyn QueueStorage>, StorageError> {
        let pool = PostgresPool::connect_lazy(&self.config).map_err(map_pool_error)?;

        tracing::debug!(
            queue = %queue_name,
            pool_size = self.config.queue_pool_size,
            "Opened PostgreSQL queue pool"
        );

        Ok(Arc::new(PostgresQueueStorage {
            queue_name: queue_name.to_string(),
            main_table: main_table(queue_name),
            ephemeral_table: ephemeral_table(queue_name),
            pool,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Handle to one PostgreSQL-backed queue.
pub struct PostgresQueueStorage {
    queue_name: String,
    main_table: String,
    ephemeral_table: String,
    pool: PostgresPool,
    closed: AtomicBool,
}

impl PostgresQueueStorage {
    fn pool(&self) -> Result<&PgPool, StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(self.pool.pool())
    }

    fn columns() -> &'static str {
        "queue_id, msg_org_timestamp, msg_timestamp, msg_num_requeues, msg_content"
    }
}

#[async_trait]
impl QueueStorage for PostgresQueueStorage {
    fn backend_type(&self) -> &'static str {
        "postgres"
    }

    async fn enqueue(&self, msg: &QueueMessage) -> Result<QueueMessage, StorageError> {
        let sql = format!(
            r#"
            INSERT INTO {} (msg_org_timestamp, msg_timestamp, msg_num_requeues, msg_content)
            VALUES ($1, $2, $3, $4)
            RETURNING queue_id
            "#,
            self.main_table
        );

        let (id,): (i64,) = sqlx::query_as(&sql)
            .bind(msg.original_timestamp)
            .bind(msg.timestamp)
            .bind(msg.num_requeues)
            .bind(&msg.content)
            .fetch_one(self.pool()?)
            .await?;

        let mut stored = msg.clone();
        stored.id = id;
        Ok(stored)
    }

    async fn take(&self) -> Result<Option<QueueMessage>, StorageError> {
        let mut tx = self.pool()?.begin().await?;

        let select = format!(
            r#"
            DELETE FROM {0}
            WHERE queue_id = (
                SELECT queue_id FROM {0}
                ORDER BY queue_id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {1}
            "#,
            self.main_table,
            Self::columns()
        );

        let row: Option<MessageRow> = sqlx::query_as(&select).fetch_optional(&mut *tx).await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut msg = row_to_message(row);
        msg.timestamp = Utc::now();

        let insert = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5)",
            self.ephemeral_table,
            Self::columns()
        );
        sqlx::query(&insert)
            .bind(msg.id)
            .bind(msg.original_timestamp)
            .bind(msg.timestamp)
            .bind(msg.num_requeues)
            .bind(&msg.content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(msg))
    }

    async fn remove_from_ephemeral(&self, msg: &QueueMessage) -> Result<bool, StorageError> {
        let sql = format!("DELETE FROM {} WHERE queue_id = $1", self.ephemeral_table);
        let result = sqlx::query(&sql).bind(msg.id).execute(self.pool()?).await?;

        Ok(result.rows_affected() > 0)
    }

    async fn move_from_ephemeral(
        &self,
        msg: &QueueMessage,
        count_requeue: bool,
    ) -> Result<bool, StorageError> {
        let mut tx = self.pool()?.begin().await?;

        let delete = format!(
            "DELETE FROM {} WHERE queue_id = $1 RETURNING {}",
            self.ephemeral_table,
            Self::columns()
        );
        let row: Option<MessageRow> = sqlx::query_as(&delete)
            .bind(msg.id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        // Back at the tail with a fresh ID
        let requeued = row_to_message(row).requeued(count_requeue);
        let insert = format!(
            r#"
            INSERT INTO {} (msg_org_timestamp, msg_timestamp, msg_num_requeues, msg_content)
            VALUES ($1, $2, $3, $4)
            "#,
            self.main_table
        );
        sqlx::query(&insert)
            .bind(requeued.original_timestamp)
            .bind(requeued.timestamp)
            .bind(requeued.num_requeues)
            .bind(&requeued.content)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn orphan_messages(&self, threshold_ms: u64) -> Result<Vec<QueueMessage>, StorageError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE msg_timestamp < $1 ORDER BY queue_id",
            Self::columns(),
            self.ephemeral_table
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(orphan_cutoff(threshold_ms))
            .fetch_all(self.pool()?)
            .await?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    async fn queue_size(&self) -> Result<i64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.main_table);
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(self.pool()?).await?;
        Ok(count)
    }

    async fn ephemeral_size(&self) -> Result<i64, StorageError> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.ephemeral_table);
        let (count,): (i64,) = sqlx::query_as(&sql).fetch_one(self.pool()?).await?;
        Ok(count)
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.pool.close().await;
        tracing::debug!(queue = %self.queue_name, "PostgreSQL queue pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert_eq!(main_table("orders"), "queue_orders");
        assert_eq!(ephemeral_table("orders"), "queue_orders_ephemeral");
    }

    #[test]
    fn test_safe_identifier() {
        assert!(is_safe_identifier("queue_metadata"));
        assert!(is_safe_identifier("queue_orders1_ephemeral"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("1queue"));
        assert!(!is_safe_identifier("queue; DROP TABLE x"));
        assert!(!is_safe_identifier("Queue"));
        assert!(!is_safe_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_row_to_message() {
        let org = Utc::now() - chrono::Duration::seconds(60);
        let now = Utc::now();
        let msg = row_to_message((42, org, now, 3, b"payload".to_vec()));

        assert_eq!(msg.id, 42);
        assert_eq!(msg.original_timestamp, org);
        assert_eq!(msg.timestamp, now);
        assert_eq!(msg.num_requeues, 3);
        assert_eq!(msg.content, b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_operations() {
        let config = DatabaseConfig {
            url: "postgres://user:pw@127.0.0.1:1/none".to_string(),
            ..Default::default()
        };
        let storage = PostgresQueueStorage {
            queue_name: "orders".to_string(),
            main_table: main_table("orders"),
            ephemeral_table: ephemeral_table("orders"),
            pool: PostgresPool::connect_lazy(&config).unwrap(),
            closed: AtomicBool::new(false),
        };

        storage.shutdown().await;
        assert!(matches!(storage.queue_size().await, Err(StorageError::Closed)));
        assert!(matches!(storage.take().await, Err(StorageError::Closed)));
    }
}
