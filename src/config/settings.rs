use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Maximum request body size in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Storage backend: "postgres", "redis" or "memory"
    #[serde(default = "default_queue_backend")]
    pub backend: String,
    /// What to do with orphan messages: "discard" or "requeue"
    #[serde(default = "default_orphan_policy")]
    pub orphan_policy: String,
    /// Milliseconds before an in-flight message is considered orphaned
    #[serde(default = "default_orphan_threshold_ms")]
    pub orphan_threshold_ms: u64,
    /// Prefix for every Redis key written by the Redis backend
    #[serde(default)]
    pub redis_prefix: String,
    /// Name of the queue metadata table (PostgreSQL) or hash (Redis)
    #[serde(default = "default_metadata_table")]
    pub metadata_table: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Connections in the shared pool used for metadata and provisioning
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    /// Connections in the pool owned by each open queue
    #[serde(default = "default_queue_pool_size")]
    pub queue_pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Default filter when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_body_limit() -> usize {
    4 * 1024 * 1024 // 4 MiB
}

fn default_queue_backend() -> String {
    "memory".to_string()
}

fn default_orphan_policy() -> String {
    "discard".to_string()
}

fn default_orphan_threshold_ms() -> u64 {
    10_000 // 10 seconds
}

fn default_metadata_table() -> String {
    "queue_metadata".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_database_url() -> String {
    "postgres://localhost:5432/queueserver".to_string()
}

fn default_pool_size() -> u32 {
    8
}

fn default_queue_pool_size() -> u32 {
    2
}

fn default_connect_timeout() -> u32 {
    10
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            .set_default("queue.backend", default_queue_backend())?
            .set_default("queue.orphan_policy", default_orphan_policy())?
            .set_default("queue.orphan_threshold_ms", default_orphan_threshold_ms())?
            .set_default("redis.url", default_redis_url())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // QUEUE_BACKEND, QUEUE_ORPHAN_POLICY, REDIS_URL, DATABASE_URL, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            )
            // Keys containing '_' cannot be reached through the separator
            .set_override_option("queue.orphan_policy", env::var("QUEUE_ORPHAN_POLICY").ok())?
            .set_override_option(
                "queue.orphan_threshold_ms",
                env::var("QUEUE_ORPHAN_THRESHOLD_MS").ok(),
            )?
            .set_override_option("queue.redis_prefix", env::var("QUEUE_REDIS_PREFIX").ok())?
            .set_override_option("queue.metadata_table", env::var("QUEUE_METADATA_TABLE").ok())?
            .set_override_option("server.body_limit", env::var("SERVER_BODY_LIMIT").ok())?
            .set_override_option("database.pool_size", env::var("DATABASE_POOL_SIZE").ok())?;

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: vec![],
            body_limit: default_body_limit(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            orphan_policy: default_orphan_policy(),
            orphan_threshold_ms: default_orphan_threshold_ms(),
            redis_prefix: String::new(),
            metadata_table: default_metadata_table(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            queue_pool_size: default_queue_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
