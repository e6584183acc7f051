//! Storage configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default name of the execution log table
pub const DEFAULT_LOG_TABLE: &str = "strata_migrations";

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackend,

    /// Connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Name of the table holding the execution log
    #[serde(default = "default_log_table")]
    pub log_table: String,
}

fn default_log_table() -> String {
    DEFAULT_LOG_TABLE.to_string()
}

/// Storage backend type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageBackend {
    /// SQLite backend (default)
    Sqlite {
        /// Database file path
        database_path: PathBuf,
        /// Auto-create directory if it doesn't exist
        auto_create_dir: bool,
    },

    /// Any database URL sea-orm understands
    Url {
        /// Connection URL
        url: String,
    },

    /// In-memory backend (for testing)
    InMemory,
}

/// Connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Idle timeout before closing connections
    pub idle_timeout: Option<Duration>,

    /// Log every SQL statement at debug level
    pub sql_logging: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite {
                database_path: PathBuf::from("strata.db"),
                auto_create_dir: true,
            },
            connection: ConnectionConfig::default(),
            log_table: default_log_table(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        // A migration run holds one connection at a time
        Self {
            max_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(1)),
            sql_logging: cfg!(debug_assertions),
        }
    }
}

impl StorageConfig {
    /// Create a new configuration for SQLite
    pub fn sqlite<P: Into<PathBuf>>(database_path: P) -> Self {
        Self {
            backend: StorageBackend::Sqlite {
                database_path: database_path.into(),
                auto_create_dir: true,
            },
            ..Default::default()
        }
    }

    /// Create a configuration from a database URL
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::Url { url: url.into() },
            ..Default::default()
        }
    }

    /// Create a new in-memory configuration (for testing)
    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::InMemory,
            ..Default::default()
        }
    }

    /// Use a custom log table name
    pub fn with_log_table(mut self, table: impl Into<String>) -> Self {
        self.log_table = table.into();
        self
    }

    /// Get the connection URL for the backend
    pub fn connection_url(&self) -> crate::StorageResult<String> {
        match &self.backend {
            StorageBackend::Sqlite { database_path, .. } => {
                Ok(format!("sqlite://{}?mode=rwc", database_path.display()))
            }
            StorageBackend::Url { url } => Ok(url.clone()),
            StorageBackend::InMemory => Ok("sqlite::memory:".to_string()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::StorageResult<()> {
        if self.connection.max_connections == 0 {
            return Err(crate::StorageError::ConfigError(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        if self.log_table.is_empty()
            || !self
                .log_table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(crate::StorageError::ConfigError(format!(
                "invalid log table name: '{}'",
                self.log_table
            )));
        }

        if let StorageBackend::Url { url } = &self.backend {
            if url.trim().is_empty() {
                return Err(crate::StorageError::ConfigError(
                    "database url must not be empty".to_string(),
                ));
            }
        }

        Ok(())
    }
}
