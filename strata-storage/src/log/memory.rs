//! In-memory execution log for testing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{ExecutionLog, LogEntry};
use crate::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct Table {
    next_id: i64,
    entries: Vec<LogEntry>,
}

/// Execution log kept in process memory.
///
/// Starts out without a table, like a fresh database, so `ensure_log` has
/// something to create.
pub struct InMemoryExecutionLog {
    table_name: String,
    table: RwLock<Option<Table>>,
}

impl InMemoryExecutionLog {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            table: RwLock::new(None),
        }
    }

    /// Seed an entry with an explicit batch and timestamp, creating the table
    /// if needed
    pub async fn seed(&self, name: &str, batch: i64, applied_at: DateTime<Utc>) {
        let mut guard = self.table.write().await;
        let table = guard.get_or_insert_with(Table::default);
        table.next_id += 1;
        table.entries.push(LogEntry {
            id: table.next_id,
            name: name.to_string(),
            batch,
            applied_at,
        });
    }

    pub async fn exists(&self) -> bool {
        self.table.read().await.is_some()
    }

    fn missing(&self) -> StorageError {
        StorageError::RelationMissing(self.table_name.clone())
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn probe(&self) -> StorageResult<()> {
        match *self.table.read().await {
            Some(_) => Ok(()),
            None => Err(self.missing()),
        }
    }

    async fn create(&self) -> StorageResult<()> {
        let mut guard = self.table.write().await;
        if guard.is_none() {
            *guard = Some(Table::default());
        }
        Ok(())
    }

    async fn insert(&self, name: &str, batch: i64, applied_at: DateTime<Utc>) -> StorageResult<()> {
        let mut guard = self.table.write().await;
        let table = guard.as_mut().ok_or_else(|| self.missing())?;

        if table.entries.iter().any(|e| e.name == name) {
            return Err(StorageError::QueryFailed(format!(
                "UNIQUE constraint failed: {}.name ({})",
                self.table_name, name
            )));
        }

        table.next_id += 1;
        table.entries.push(LogEntry {
            id: table.next_id,
            name: name.to_string(),
            batch,
            applied_at,
        });
        Ok(())
    }

    async fn remove(&self, name: &str) -> StorageResult<()> {
        let mut guard = self.table.write().await;
        let table = guard.as_mut().ok_or_else(|| self.missing())?;
        table.entries.retain(|e| e.name != name);
        Ok(())
    }

    async fn list_applied(&self) -> StorageResult<Vec<LogEntry>> {
        Ok(self
            .table
            .read()
            .await
            .as_ref()
            .map(|t| t.entries.clone())
            .unwrap_or_default())
    }

    async fn current_max_batch(&self) -> StorageResult<i64> {
        Ok(self
            .table
            .read()
            .await
            .as_ref()
            .and_then(|t| t.entries.iter().map(|e| e.batch).max())
            .unwrap_or(0))
    }
}
