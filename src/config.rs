//! Configuration handling for the table broker.
//!
//! This module provides configuration management via CLI arguments and environment variables.

use crate::db::SqliteServiceOptions;
use crate::executor::QueueOrder;
use clap::Parser;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:table-broker.db";
pub const DEFAULT_APP_NAME: &str = "default";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Library-side settings of a broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Service order of caller requests
    pub queue_order: QueueOrder,
}

impl BrokerSettings {
    pub fn with_queue_order(queue_order: QueueOrder) -> Self {
        Self { queue_order }
    }
}

/// Configuration for the table broker binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "table-broker",
    about = "Request broker between a UI bridge and a local table store",
    version,
    author
)]
pub struct Config {
    /// SQLite database URL, e.g. "sqlite:data.db"
    #[arg(
        short = 'd',
        long = "database",
        value_name = "URL",
        default_value = DEFAULT_DATABASE_URL,
        env = "BROKER_DATABASE"
    )]
    pub database: String,

    /// Application name passed to the database service
    #[arg(long, default_value = DEFAULT_APP_NAME, env = "BROKER_APP_NAME")]
    pub app_name: String,

    /// Service order of queued requests (lifo or fifo)
    #[arg(long, default_value = "lifo", env = "BROKER_QUEUE_ORDER")]
    pub queue_order: QueueOrder,

    /// Maximum pooled connections, including ones held by open transactions
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONNECTIONS,
        env = "BROKER_MAX_CONNECTIONS"
    )]
    pub max_connections: u32,

    /// Connection acquire timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS,
        env = "BROKER_ACQUIRE_TIMEOUT"
    )]
    pub acquire_timeout: u64,

    /// SQLite busy timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_BUSY_TIMEOUT_SECS,
        env = "BROKER_BUSY_TIMEOUT"
    )]
    pub busy_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BROKER_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "BROKER_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Create a default configuration (useful for testing).
    pub fn default_config() -> Self {
        Self {
            database: DEFAULT_DATABASE_URL.to_string(),
            app_name: DEFAULT_APP_NAME.to_string(),
            queue_order: QueueOrder::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            busy_timeout: DEFAULT_BUSY_TIMEOUT_SECS,
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if !self.database.starts_with("sqlite:") {
            return Err(format!(
                "Unsupported database URL '{}': only sqlite: URLs are supported",
                self.database
            ));
        }
        if self.app_name.trim().is_empty() {
            return Err("app_name must not be empty".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Library-side broker settings.
    pub fn settings(&self) -> BrokerSettings {
        BrokerSettings::with_queue_order(self.queue_order)
    }

    /// Pool settings of the SQLite service.
    pub fn service_options(&self) -> SqliteServiceOptions {
        SqliteServiceOptions {
            max_connections: self.max_connections,
            acquire_timeout: self.acquire_timeout_duration(),
            busy_timeout: Duration::from_secs(self.busy_timeout),
        }
    }

    /// Get the acquire timeout as a Duration.
    pub fn acquire_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}
