//! Storage provider factory

use std::sync::Arc;

use crate::config::Settings;
use crate::postgres::PostgresPool;
use crate::redis::RedisPool;

use super::backend::{StorageError, StorageProvider};
use super::memory_backend::MemoryStorageProvider;
use super::postgres_backend::PostgresStorageProvider;
use super::redis_backend::RedisStorageProvider;

/// A storage provider plus the shared pools it was built on.
///
/// The pools are kept so they can be closed on shutdown.
pub struct StorageBackend {
    pub provider: Arc<dyn StorageProvider>,
    pub postgres_pool: Option<PostgresPool>,
    pub redis_pool: Option<Arc<RedisPool>>,
}

impl StorageBackend {
    pub fn memory() -> Self {
        Self {
            provider: Arc::new(MemoryStorageProvider::new()),
            postgres_pool: None,
            redis_pool: None,
        }
    }

    /// Close the shared pools.
    pub async fn close(&self) {
        if let Some(ref pool) = self.postgres_pool {
            pool.close().await;
        }
        if let Some(ref pool) = self.redis_pool {
            pool.close().await;
        }
    }
}

/// Create a storage provider based on configuration.
///
/// The `queue.backend` setting selects:
/// - `"postgres"`: `PostgresStorageProvider` on a pool built from `database`
/// - `"redis"`: `RedisStorageProvider` on a pool built from `redis`
/// - `"memory"`: `MemoryStorageProvider`
///
/// Unknown values fall back to memory with a warning.
pub async fn create_storage_backend(settings: &Settings) -> Result<StorageBackend, StorageError> {
    let queue = &settings.queue;

    match queue.backend.as_str() {
        "postgres" => {
            let pool = PostgresPool::new(&settings.database)
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))?;

            tracing::info!(
                backend = "postgres",
                metadata_table = %queue.metadata_table,
                "Creating PostgreSQL storage provider"
            );
            let provider = PostgresStorageProvider::new(
                pool.clone(),
                settings.database.clone(),
                queue.metadata_table.clone(),
            )
            .await?;

            Ok(StorageBackend {
                provider: Arc::new(provider),
                postgres_pool: Some(pool),
                redis_pool: None,
            })
        }
        "redis" => {
            let pool = Arc::new(
                RedisPool::new(settings.redis.clone())
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?,
            );

            // Connections are lazy; an unreachable server is only reported here
            if let Err(e) = pool.ping().await {
                tracing::warn!(error = %e, "Redis not reachable yet");
            }

            tracing::info!(
                backend = "redis",
                prefix = %queue.redis_prefix,
                "Creating Redis storage provider"
            );
            let provider =
                RedisStorageProvider::new(pool.clone(), queue.redis_prefix.clone(), &queue.metadata_table);

            Ok(StorageBackend {
                provider: Arc::new(provider),
                postgres_pool: None,
                redis_pool: Some(pool),
            })
        }
        "memory" => {
            tracing::info!(backend = "memory", "Creating memory storage provider");
            Ok(StorageBackend::memory())
        }
        other => {
            tracing::warn!(backend = %other, "Unknown queue backend, falling back to memory");
            Ok(StorageBackend::memory())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DatabaseConfig, LogConfig, QueueConfig, RedisConfig, ServerConfig,
    };

    fn settings(backend: &str) -> Settings {
        Settings {
            server: ServerConfig::default(),
            queue: QueueConfig {
                backend: backend.to_string(),
                ..Default::default()
            },
            redis: RedisConfig {
                url: "redis://127.0.0.1:1".to_string(),
            },
            database: DatabaseConfig::default(),
            log: LogConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_memory_backend() {
        let backend = create_storage_backend(&settings("memory")).await.unwrap();
        assert_eq!(backend.provider.backend_type(), "memory");
    }

    #[tokio::test]
    async fn test_unknown_backend_falls_back_to_memory() {
        let backend = create_storage_backend(&settings("cassandra")).await.unwrap();
        assert_eq!(backend.provider.backend_type(), "memory");
    }

    #[tokio::test]
    async fn test_redis_backend_is_lazy() {
        let backend = create_storage_backend(&settings("redis")).await.unwrap();
        assert_eq!(backend.provider.backend_type(), "redis");
        assert!(backend.redis_pool.is_some());
        backend.close().await;
    }
}
