mod settings;

pub use settings::{
    DatabaseConfig, LogConfig, QueueConfig, RedisConfig, ServerConfig, Settings,
};
