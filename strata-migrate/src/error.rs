//! Migration engine error types

use strata_storage::StorageError;
use thiserror::Error;

use crate::plan::Direction;

/// Result type for migration operations
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors raised while loading, resolving or running migrations
#[derive(Debug, Error)]
pub enum MigrateError {
    /// A `to`/`only` value matches no unit
    #[error("No such migration: {name}")]
    UnitNotFound { name: String },

    /// `only` named a unit that is already applied
    #[error("Migration is already applied: {name}")]
    AlreadyApplied { name: String },

    /// `only` named a unit that has not been applied
    #[error("Migration is not applied: {name}")]
    NotApplied { name: String },

    /// A unit's apply or revert failed; nothing after it was attempted
    #[error("Migration {name} failed during {direction}: {source}")]
    UnitExecution {
        name: String,
        direction: Direction,
        #[source]
        source: StorageError,
    },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Duplicate migration name: {0}")]
    DuplicateUnit(String),

    #[error("Invalid step value: '{0}'")]
    InvalidStep(String),

    #[error("Invalid migration file pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Migration catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    /// Log and connection errors, passed through unchanged
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl MigrateError {
    /// Name of the unit this error is about, if any
    pub fn unit_name(&self) -> Option<&str> {
        match self {
            MigrateError::UnitNotFound { name }
            | MigrateError::AlreadyApplied { name }
            | MigrateError::NotApplied { name }
            | MigrateError::UnitExecution { name, .. } => Some(name),
            MigrateError::DuplicateUnit(name) => Some(name),
            _ => None,
        }
    }
}
