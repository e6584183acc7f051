//! Execution log stored in a SQL table through sea-orm

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, QueryResult, Statement, Value};
use tracing::debug;

use super::{ExecutionLog, LogEntry};
use crate::{StorageError, StorageResult};

/// Execution log table on a relational database.
///
/// Table layout:
///
/// | column | type | constraint |
/// |---|---|---|
/// | id | auto-increment | primary key |
/// | name | varchar(255) | not null, unique |
/// | batch | integer | not null |
/// | applied_at | RFC 3339 text | not null |
pub struct SqlExecutionLog {
    connection: DatabaseConnection,
    table_name: String,
}

impl SqlExecutionLog {
    pub fn new(connection: DatabaseConnection, table_name: impl Into<String>) -> Self {
        Self {
            connection,
            table_name: table_name.into(),
        }
    }

    fn backend(&self) -> DatabaseBackend {
        self.connection.get_database_backend()
    }

    fn placeholder(&self, index: usize) -> String {
        match self.backend() {
            DatabaseBackend::Postgres => format!("${}", index),
            _ => "?".to_string(),
        }
    }

    fn statement(&self, sql: String) -> Statement {
        Statement::from_string(self.backend(), sql)
    }

    fn query_error(&self, err: DbErr) -> StorageError {
        StorageError::classify_query_error(&self.table_name, err.to_string())
    }

    fn create_table_sql(&self) -> String {
        let columns = match self.backend() {
            DatabaseBackend::Postgres => {
                "id BIGSERIAL PRIMARY KEY, \
                 name VARCHAR(255) NOT NULL UNIQUE, \
                 batch BIGINT NOT NULL, \
                 applied_at TEXT NOT NULL"
            }
            DatabaseBackend::MySql => {
                "id BIGINT AUTO_INCREMENT PRIMARY KEY, \
                 name VARCHAR(255) NOT NULL UNIQUE, \
                 batch BIGINT NOT NULL, \
                 applied_at VARCHAR(64) NOT NULL"
            }
            _ => {
                "id INTEGER PRIMARY KEY AUTOINCREMENT, \
                 name VARCHAR(255) NOT NULL UNIQUE, \
                 batch INTEGER NOT NULL, \
                 applied_at TEXT NOT NULL"
            }
        };
        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.table_name, columns)
    }

    fn entry_from_row(row: &QueryResult) -> StorageResult<LogEntry> {
        let applied_at: String = row.try_get("", "applied_at")?;
        let applied_at = DateTime::parse_from_rfc3339(&applied_at)
            .map_err(|e| StorageError::SerializationError(format!("applied_at '{}': {}", applied_at, e)))?
            .with_timezone(&Utc);

        Ok(LogEntry {
            id: row.try_get("", "id")?,
            name: row.try_get("", "name")?,
            batch: row.try_get("", "batch")?,
            applied_at,
        })
    }
}

#[async_trait]
impl ExecutionLog for SqlExecutionLog {
    fn table_name(&self) -> &str {
        &self.table_name
    }

    async fn probe(&self) -> StorageResult<()> {
        let stmt = self.statement(format!("SELECT COUNT(id) AS entries FROM {}", self.table_name));
        self.connection
            .query_one(stmt)
            .await
            .map_err(|e| self.query_error(e))?;
        Ok(())
    }

    async fn create(&self) -> StorageResult<()> {
        self.connection
            .execute_unprepared(&self.create_table_sql())
            .await
            .map_err(|e| self.query_error(e))?;
        Ok(())
    }

    async fn insert(&self, name: &str, batch: i64, applied_at: DateTime<Utc>) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO {} (name, batch, applied_at) VALUES ({}, {}, {})",
            self.table_name,
            self.placeholder(1),
            self.placeholder(2),
            self.placeholder(3)
        );
        let values: Vec<Value> = vec![
            name.to_string().into(),
            batch.into(),
            applied_at.to_rfc3339().into(),
        ];

        debug!("Inserting log entry {} (batch {})", name, batch);
        self.connection
            .execute(Statement::from_sql_and_values(self.backend(), sql, values))
            .await
            .map_err(|e| self.query_error(e))?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> StorageResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE name = {}",
            self.table_name,
            self.placeholder(1)
        );
        let values: Vec<Value> = vec![name.to_string().into()];

        self.connection
            .execute(Statement::from_sql_and_values(self.backend(), sql, values))
            .await
            .map_err(|e| self.query_error(e))?;
        Ok(())
    }

    async fn list_applied(&self) -> StorageResult<Vec<LogEntry>> {
        let stmt = self.statement(format!(
            "SELECT id, name, batch, applied_at FROM {} ORDER BY id ASC",
            self.table_name
        ));

        let rows = match self.connection.query_all(stmt).await {
            Ok(rows) => rows,
            Err(e) => match self.query_error(e) {
                StorageError::RelationMissing(_) => return Ok(Vec::new()),
                other => return Err(other),
            },
        };

        rows.iter().map(Self::entry_from_row).collect()
    }

    async fn current_max_batch(&self) -> StorageResult<i64> {
        let stmt = self.statement(format!(
            "SELECT MAX(batch) AS max_batch FROM {}",
            self.table_name
        ));

        let row = match self.connection.query_one(stmt).await {
            Ok(row) => row,
            Err(e) => match self.query_error(e) {
                StorageError::RelationMissing(_) => return Ok(0),
                other => return Err(other),
            },
        };

        match row {
            Some(row) => Ok(row.try_get::<Option<i64>>("", "max_batch")?.unwrap_or(0)),
            None => Ok(0),
        }
    }
}
