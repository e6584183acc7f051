//! Connection management abstractions

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::log::{memory::InMemoryExecutionLog, ExecutionLog};
use crate::{StorageConfig, StorageError, StorageResult};

/// Generic connection trait (object-safe version)
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute one or more statements that return no rows
    async fn execute(&self, sql: &str) -> StorageResult<u64>;

    /// Execute a query and return its rows as JSON objects
    async fn fetch_json(&self, sql: &str) -> StorageResult<Vec<serde_json::Value>>;

    /// Begin a transaction
    async fn begin_transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Check if the connection is healthy
    async fn ping(&self) -> StorageResult<bool>;
}

/// Transaction trait (object-safe version)
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Execute statements within the transaction
    async fn execute(&mut self, sql: &str) -> StorageResult<u64>;

    /// Fetch JSON rows within the transaction
    async fn fetch_json(&mut self, sql: &str) -> StorageResult<Vec<serde_json::Value>>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// The handle a migration unit runs its statements through.
///
/// Units see the transaction scoped to them, or the bare connection when
/// transactional wrapping is disabled.
pub enum ExecutionContext<'a> {
    Connection(&'a dyn Connection),
    Transaction(&'a mut dyn Transaction),
}

impl ExecutionContext<'_> {
    /// Execute statements in this context
    pub async fn execute(&mut self, sql: &str) -> StorageResult<u64> {
        match self {
            ExecutionContext::Connection(connection) => connection.execute(sql).await,
            ExecutionContext::Transaction(tx) => tx.execute(sql).await,
        }
    }

    /// Fetch rows in this context
    pub async fn fetch_json(&mut self, sql: &str) -> StorageResult<Vec<serde_json::Value>> {
        match self {
            ExecutionContext::Connection(connection) => connection.fetch_json(sql).await,
            ExecutionContext::Transaction(tx) => tx.fetch_json(sql).await,
        }
    }

    pub fn is_transactional(&self) -> bool {
        matches!(self, ExecutionContext::Transaction(_))
    }
}

/// Connection and execution log for one configured backend
#[derive(Clone)]
pub struct StorageHandle {
    pub connection: Arc<dyn Connection>,
    pub log: Arc<dyn ExecutionLog>,
}

/// Factory function to create the connection and log store based on configuration
pub async fn connect(config: &StorageConfig) -> StorageResult<StorageHandle> {
    config.validate()?;

    match &config.backend {
        crate::config::StorageBackend::InMemory => Ok(StorageHandle {
            connection: Arc::new(InMemoryConnection::new()),
            log: Arc::new(InMemoryExecutionLog::new(config.log_table.clone())),
        }),

        #[cfg(feature = "database")]
        _ => {
            let connection = crate::seaorm::SeaOrmConnection::connect(config).await?;
            let log = crate::log::sql::SqlExecutionLog::new(
                connection.inner().clone(),
                config.log_table.clone(),
            );
            Ok(StorageHandle {
                connection: Arc::new(connection),
                log: Arc::new(log),
            })
        }

        #[cfg(not(feature = "database"))]
        _ => Err(StorageError::ConfigError(
            "Database backend requires 'database' feature to be enabled".to_string(),
        )),
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    committed: Vec<String>,
    fail_pattern: Option<String>,
    transactions_begun: u64,
    rollbacks: u64,
}

impl InMemoryState {
    fn check(&self, sql: &str) -> StorageResult<()> {
        match &self.fail_pattern {
            Some(pattern) if sql.contains(pattern.as_str()) => Err(StorageError::QueryFailed(
                format!("statement rejected: {}", sql),
            )),
            _ => Ok(()),
        }
    }
}

/// In-memory connection for testing.
///
/// Keeps the statements that were committed, drops the ones that were
/// rolled back, and can reject statements containing a pattern.
#[derive(Clone, Default)]
pub struct InMemoryConnection {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryConnection {
    /// Create a new in-memory connection
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every statement containing `pattern`
    pub fn failing_on(pattern: impl Into<String>) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryState {
                fail_pattern: Some(pattern.into()),
                ..Default::default()
            })),
        }
    }

    /// Replace the rejection pattern
    pub async fn set_failure(&self, pattern: Option<String>) {
        self.state.write().await.fail_pattern = pattern;
    }

    /// Statements that took effect, in order
    pub async fn committed_statements(&self) -> Vec<String> {
        self.state.read().await.committed.clone()
    }

    pub async fn transactions_begun(&self) -> u64 {
        self.state.read().await.transactions_begun
    }

    pub async fn rollbacks(&self) -> u64 {
        self.state.read().await.rollbacks
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn execute(&self, sql: &str) -> StorageResult<u64> {
        let mut state = self.state.write().await;
        state.check(sql)?;
        state.committed.push(sql.to_string());
        Ok(1)
    }

    async fn fetch_json(&self, sql: &str) -> StorageResult<Vec<serde_json::Value>> {
        self.state.read().await.check(sql)?;
        Ok(Vec::new())
    }

    async fn begin_transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        self.state.write().await.transactions_begun += 1;
        Ok(Box::new(InMemoryTransaction {
            state: self.state.clone(),
            pending: Vec::new(),
        }))
    }

    async fn ping(&self) -> StorageResult<bool> {
        Ok(true)
    }
}

/// In-memory transaction for testing
pub struct InMemoryTransaction {
    state: Arc<RwLock<InMemoryState>>,
    pending: Vec<String>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn execute(&mut self, sql: &str) -> StorageResult<u64> {
        self.state.read().await.check(sql)?;
        self.pending.push(sql.to_string());
        Ok(1)
    }

    async fn fetch_json(&mut self, sql: &str) -> StorageResult<Vec<serde_json::Value>> {
        self.state.read().await.check(sql)?;
        Ok(Vec::new())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        let mut state = this.state.write().await;
        state.committed.extend(this.pending);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        self.state.write().await.rollbacks += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_commit_keeps_statements() {
        let conn = InMemoryConnection::new();
        conn.execute("CREATE TABLE a (id INTEGER)").await.unwrap();

        let mut tx = conn.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE b (id INTEGER)").await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            conn.committed_statements().await,
            vec!["CREATE TABLE a (id INTEGER)", "CREATE TABLE b (id INTEGER)"]
        );
        assert_eq!(conn.transactions_begun().await, 1);
    }

    #[tokio::test]
    async fn test_in_memory_rollback_discards_statements() {
        let conn = InMemoryConnection::new();
        let mut tx = conn.begin_transaction().await.unwrap();
        tx.execute("CREATE TABLE b (id INTEGER)").await.unwrap();
        tx.rollback().await.unwrap();

        assert!(conn.committed_statements().await.is_empty());
        assert_eq!(conn.rollbacks().await, 1);
    }

    #[tokio::test]
    async fn test_failure_pattern() {
        let conn = InMemoryConnection::failing_on("DROP");
        assert!(conn.execute("DROP TABLE a").await.is_err());
        assert!(conn.execute("CREATE TABLE a (id INTEGER)").await.is_ok());

        conn.set_failure(None).await;
        assert!(conn.execute("DROP TABLE a").await.is_ok());
    }

    #[tokio::test]
    async fn test_execution_context_routes_to_transaction() {
        let conn = InMemoryConnection::new();
        let mut tx = conn.begin_transaction().await.unwrap();
        {
            let mut ctx = ExecutionContext::Transaction(tx.as_mut());
            assert!(ctx.is_transactional());
            ctx.execute("INSERT INTO t VALUES (1)").await.unwrap();
        }
        assert!(conn.committed_statements().await.is_empty());
        tx.commit().await.unwrap();
        assert_eq!(conn.committed_statements().await.len(), 1);

        let mut ctx = ExecutionContext::Connection(&conn);
        assert!(!ctx.is_transactional());
        ctx.execute("INSERT INTO t VALUES (2)").await.unwrap();
        assert_eq!(conn.committed_statements().await.len(), 2);
    }

    #[tokio::test]
    async fn test_connect_in_memory() {
        let handle = connect(&StorageConfig::in_memory()).await.unwrap();
        assert!(handle.connection.ping().await.unwrap());
        assert_eq!(handle.log.table_name(), crate::config::DEFAULT_LOG_TABLE);
    }
}
