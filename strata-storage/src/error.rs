//! Storage error types

use regex::Regex;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection-related errors
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// The log table (or any other relation) does not exist yet
    #[error("Relation does not exist: {0}")]
    RelationMissing(String),

    /// Query execution errors
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction errors
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Migration unit body errors
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Stored data could not be decoded
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether this error means the relation is absent and can be created.
    pub fn is_relation_missing(&self) -> bool {
        matches!(self, StorageError::RelationMissing(_))
    }

    /// Classify a backend error message for a query against `table`.
    ///
    /// SQLite, PostgreSQL and MySQL each report a missing table differently;
    /// all three are folded into [`StorageError::RelationMissing`], anything
    /// else becomes [`StorageError::QueryFailed`].
    pub fn classify_query_error(table: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if relation_missing_message(table, &message) {
            StorageError::RelationMissing(table.to_string())
        } else {
            StorageError::QueryFailed(message)
        }
    }
}

fn relation_missing_message(table: &str, message: &str) -> bool {
    let table = regex::escape(table);
    let patterns = [
        format!(r"no such table: (\w+\.)?{table}\b"),
        format!(r#"relation "(\w+\.)?{table}" does not exist"#),
        format!(r"Table '([^']+\.)?{table}' doesn't exist"),
    ];

    message.contains("ER_NO_SUCH_TABLE")
        || patterns
            .iter()
            .filter_map(|pattern| Regex::new(pattern).ok())
            .any(|re| re.is_match(message))
}

#[cfg(feature = "database")]
impl From<sea_orm::DbErr> for StorageError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(e) => StorageError::ConnectionFailed(e.to_string()),
            sea_orm::DbErr::ConnectionAcquire(e) => StorageError::ConnectionFailed(e.to_string()),
            sea_orm::DbErr::Type(msg) => StorageError::SerializationError(msg),
            other => StorageError::QueryFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_missing_table() {
        let err = StorageError::classify_query_error(
            "strata_migrations",
            "error returned from database: (code: 1) no such table: strata_migrations",
        );
        assert!(err.is_relation_missing());
    }

    #[test]
    fn test_postgres_missing_relation() {
        let err = StorageError::classify_query_error(
            "strata_migrations",
            r#"error returned from database: relation "strata_migrations" does not exist"#,
        );
        assert!(err.is_relation_missing());
    }

    #[test]
    fn test_mysql_missing_table() {
        let err = StorageError::classify_query_error(
            "strata_migrations",
            "Table 'app.strata_migrations' doesn't exist",
        );
        assert!(err.is_relation_missing());

        let err = StorageError::classify_query_error("strata_migrations", "ER_NO_SUCH_TABLE");
        assert!(err.is_relation_missing());
    }

    #[test]
    fn test_other_table_is_not_missing_log() {
        let err = StorageError::classify_query_error(
            "strata_migrations",
            "no such table: strata_migrations_lock",
        );
        assert!(!err.is_relation_missing());
        assert!(matches!(err, StorageError::QueryFailed(_)));
    }
}
