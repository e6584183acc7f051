//! sea-orm backed connection

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, FromQueryResult,
    QueryResult, Statement, TransactionTrait,
};
use tracing::{debug, info};

use crate::config::{StorageBackend, StorageConfig};
use crate::connection::{Connection, Transaction};
use crate::{StorageError, StorageResult};

/// Connection to a relational database through sea-orm
#[derive(Clone)]
pub struct SeaOrmConnection {
    connection: DatabaseConnection,
}

impl SeaOrmConnection {
    /// Open a connection pool for the configured backend
    pub async fn connect(config: &StorageConfig) -> StorageResult<Self> {
        let url = config.connection_url()?;

        if let StorageBackend::Sqlite {
            database_path,
            auto_create_dir: true,
        } = &config.backend
        {
            ensure_parent_dir(database_path)?;
        }

        info!("Connecting to database: {}", url);

        let mut opts = ConnectOptions::new(url);
        opts.max_connections(config.connection.max_connections)
            .min_connections(1)
            .connect_timeout(config.connection.connect_timeout)
            .acquire_timeout(config.connection.connect_timeout)
            .sqlx_logging(config.connection.sql_logging);
        if let Some(idle) = config.connection.idle_timeout {
            opts.idle_timeout(idle);
        }

        let connection = Database::connect(opts).await?;

        debug!(
            "Database connection established with {} max connections",
            config.connection.max_connections
        );

        Ok(Self { connection })
    }

    /// Wrap an existing sea-orm connection
    pub fn from_connection(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Get the underlying sea-orm connection
    pub fn inner(&self) -> &DatabaseConnection {
        &self.connection
    }
}

fn ensure_parent_dir(path: &std::path::Path) -> StorageResult<()> {
    if let Some(parent_dir) = path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
            info!("Creating database directory: {:?}", parent_dir);
            std::fs::create_dir_all(parent_dir)?;
        }
    }
    Ok(())
}

fn rows_to_json(rows: Vec<QueryResult>) -> StorageResult<Vec<serde_json::Value>> {
    rows.iter()
        .map(|row| serde_json::Value::from_query_result(row, "").map_err(StorageError::from))
        .collect()
}

#[async_trait]
impl Connection for SeaOrmConnection {
    async fn execute(&self, sql: &str) -> StorageResult<u64> {
        Ok(self.connection.execute_unprepared(sql).await?.rows_affected())
    }

    async fn fetch_json(&self, sql: &str) -> StorageResult<Vec<serde_json::Value>> {
        let stmt = Statement::from_string(self.connection.get_database_backend(), sql);
        rows_to_json(self.connection.query_all(stmt).await?)
    }

    async fn begin_transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        let tx = self
            .connection
            .begin()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))?;
        Ok(Box::new(SeaOrmTransaction { inner: tx }))
    }

    async fn ping(&self) -> StorageResult<bool> {
        self.connection.ping().await?;
        Ok(true)
    }
}

/// Transaction on a sea-orm connection
pub struct SeaOrmTransaction {
    inner: DatabaseTransaction,
}

#[async_trait]
impl Transaction for SeaOrmTransaction {
    async fn execute(&mut self, sql: &str) -> StorageResult<u64> {
        Ok(self.inner.execute_unprepared(sql).await?.rows_affected())
    }

    async fn fetch_json(&mut self, sql: &str) -> StorageResult<Vec<serde_json::Value>> {
        let stmt = Statement::from_string(self.inner.get_database_backend(), sql);
        rows_to_json(self.inner.query_all(stmt).await?)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.inner
            .commit()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.inner
            .rollback()
            .await
            .map_err(|e| StorageError::TransactionFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn sqlite() -> (TempDir, SeaOrmConnection) {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig::sqlite(dir.path().join("nested").join("app.db"));
        let connection = SeaOrmConnection::connect(&config).await.unwrap();
        (dir, connection)
    }

    #[tokio::test]
    async fn test_connect_creates_directory() {
        let (dir, connection) = sqlite().await;
        assert!(connection.ping().await.unwrap());
        assert!(dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_io_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blocker"), "not a directory").unwrap();

        let config = StorageConfig::sqlite(dir.path().join("blocker").join("app.db"));
        let result = SeaOrmConnection::connect(&config).await;
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_rolled_back_transaction_leaves_no_trace() {
        let (_dir, connection) = sqlite().await;
        connection
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        let mut tx = connection.begin_transaction().await.unwrap();
        tx.execute("INSERT INTO users (name) VALUES ('ada')").await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = connection.begin_transaction().await.unwrap();
        tx.execute("INSERT INTO users (name) VALUES ('grace')").await.unwrap();
        tx.commit().await.unwrap();

        let rows = connection.fetch_json("SELECT name FROM users").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "grace");
    }
}
