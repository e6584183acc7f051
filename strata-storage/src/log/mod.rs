//! Execution log: the persisted record of which migration units have run
//!
//! The log is the only source of truth for "executed" versus "pending".
//! Entries are appended when a unit is applied and deleted when it is
//! reverted; every entry carries the batch number of the `up` run that
//! applied it.

pub mod memory;
#[cfg(feature = "database")]
pub mod sql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::StorageResult;

/// One applied migration unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Store-assigned id, increasing in insertion order
    pub id: i64,
    pub name: String,
    pub batch: i64,
    pub applied_at: DateTime<Utc>,
}

/// Persistent store behind the execution log
#[async_trait]
pub trait ExecutionLog: Send + Sync {
    /// Name of the table holding the log
    fn table_name(&self) -> &str;

    /// Touch the log table; fails with `RelationMissing` when it does not exist
    async fn probe(&self) -> StorageResult<()>;

    /// Create the log table
    async fn create(&self) -> StorageResult<()>;

    /// Append an entry
    async fn insert(&self, name: &str, batch: i64, applied_at: DateTime<Utc>) -> StorageResult<()>;

    /// Delete the entry for `name`; deleting an absent entry is not an error
    async fn remove(&self, name: &str) -> StorageResult<()>;

    /// All entries in insertion order. A missing table reads as an empty log.
    async fn list_applied(&self) -> StorageResult<Vec<LogEntry>>;

    /// Highest batch number present, `0` when the log is empty
    async fn current_max_batch(&self) -> StorageResult<i64>;

    /// Make sure the log table exists. Returns `true` when it had to be created.
    async fn ensure_log(&self) -> StorageResult<bool> {
        match self.probe().await {
            Ok(()) => Ok(false),
            Err(err) if err.is_relation_missing() => {
                info!("Creating execution log table: {}", self.table_name());
                self.create().await?;
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }
}

/// Log writes for a single runner invocation.
///
/// The batch number is read from the store the first time a unit is
/// recorded as applied and reused for the rest of the session, so every unit
/// applied by one `up` run lands in the same batch. A session that never
/// applies anything never reads it.
pub struct LogSession<'a> {
    log: &'a dyn ExecutionLog,
    batch: OnceCell<i64>,
}

impl<'a> LogSession<'a> {
    pub fn new(log: &'a dyn ExecutionLog) -> Self {
        Self {
            log,
            batch: OnceCell::new(),
        }
    }

    /// Batch number assigned to this session, if one was computed yet
    pub fn batch(&self) -> Option<i64> {
        self.batch.get().copied()
    }

    /// Record `name` as applied in this session's batch
    pub async fn record_applied(&self, name: &str) -> StorageResult<i64> {
        let batch = *self
            .batch
            .get_or_try_init(|| async {
                let max = self.log.current_max_batch().await?;
                Ok::<_, crate::StorageError>(max + 1)
            })
            .await?;

        debug!("Logging {} in batch {}", name, batch);
        self.log.insert(name, batch, Utc::now()).await?;
        Ok(batch)
    }

    /// Remove `name` from the log
    pub async fn record_reverted(&self, name: &str) -> StorageResult<()> {
        debug!("Unlogging {}", name);
        self.log.remove(name).await
    }
}
