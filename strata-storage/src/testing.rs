//! Database testing utilities for strata-storage
//!
//! Provides an isolated SQLite database in a temporary directory that is
//! removed when the [`TestDatabase`] is dropped.

use std::sync::Arc;
use tempfile::TempDir;

use crate::config::StorageConfig;
use crate::connection::{connect, Connection, StorageHandle};
use crate::log::ExecutionLog;
use crate::StorageResult;

/// Test database for isolated testing
pub struct TestDatabase {
    _temp_dir: TempDir,
    pub config: StorageConfig,
    pub handle: StorageHandle,
}

impl TestDatabase {
    /// Create a new SQLite test database
    pub async fn new() -> StorageResult<Self> {
        let temp_dir = TempDir::new()?;
        let config = StorageConfig::sqlite(temp_dir.path().join("test.db"));
        let handle = connect(&config).await?;

        Ok(Self {
            _temp_dir: temp_dir,
            config,
            handle,
        })
    }

    /// Create a test database whose log lives in `table`
    pub async fn with_log_table(table: &str) -> StorageResult<Self> {
        let temp_dir = TempDir::new()?;
        let config = StorageConfig::sqlite(temp_dir.path().join("test.db")).with_log_table(table);
        let handle = connect(&config).await?;

        Ok(Self {
            _temp_dir: temp_dir,
            config,
            handle,
        })
    }

    pub fn connection(&self) -> Arc<dyn Connection> {
        self.handle.connection.clone()
    }

    pub fn log(&self) -> Arc<dyn ExecutionLog> {
        self.handle.log.clone()
    }

    /// Names of the user tables currently present, sorted
    pub async fn tables(&self) -> StorageResult<Vec<String>> {
        let rows = self
            .handle
            .connection
            .fetch_json(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.get("name").and_then(|n| n.as_str()).map(str::to_string))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_starts_empty() {
        let db = TestDatabase::new().await.unwrap();
        assert!(db.tables().await.unwrap().is_empty());

        db.log().ensure_log().await.unwrap();
        assert_eq!(db.tables().await.unwrap(), vec!["strata_migrations".to_string()]);
    }
}
