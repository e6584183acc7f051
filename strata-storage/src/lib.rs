//! Storage layer for Strata migrations
//!
//! This crate owns everything that touches the database: the connection and
//! transaction abstractions migration units run through, and the execution
//! log that records which units have been applied and in which batch.

pub mod config;
pub mod connection;
pub mod error;
pub mod log;

// SeaORM implementation (feature-gated)
#[cfg(feature = "database")]
pub mod seaorm;

#[cfg(feature = "testing")]
pub mod testing;

// Re-export core types for convenience
pub use config::{StorageBackend, StorageConfig, DEFAULT_LOG_TABLE};
pub use connection::{connect, Connection, ExecutionContext, InMemoryConnection, StorageHandle, Transaction};
pub use error::{StorageError, StorageResult};
pub use log::{memory::InMemoryExecutionLog, ExecutionLog, LogEntry, LogSession};

#[cfg(feature = "database")]
pub use log::sql::SqlExecutionLog;
#[cfg(feature = "database")]
pub use seaorm::SeaOrmConnection;
