//! Migration units

use async_trait::async_trait;
use std::path::Path;
use strata_storage::{ExecutionContext, StorageError, StorageResult};

use crate::{MigrateError, MigrateResult};

/// A single versioned migration.
///
/// Names sort lexicographically in the order the units must be applied,
/// canonically `<timestamp>_<description>`.
#[async_trait]
pub trait MigrationUnit: Send + Sync {
    /// Unique, immutable unit name
    fn name(&self) -> &str;

    /// Apply the unit
    async fn apply(&self, ctx: &mut ExecutionContext<'_>) -> StorageResult<()>;

    /// Revert the unit
    async fn revert(&self, ctx: &mut ExecutionContext<'_>) -> StorageResult<()>;
}

/// Migration defined by a pair of SQL scripts
#[derive(Debug, Clone)]
pub struct SqlMigration {
    name: String,
    up_sql: String,
    down_sql: Option<String>,
}

impl SqlMigration {
    pub fn new(name: impl Into<String>, up_sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            up_sql: up_sql.into(),
            down_sql: None,
        }
    }

    /// Set down SQL for revert
    pub fn with_down_sql(mut self, down_sql: impl Into<String>) -> Self {
        self.down_sql = Some(down_sql.into());
        self
    }

    /// Parse a migration file.
    ///
    /// The body is split on `-- up` and `-- down` marker lines. Text before the
    /// first marker belongs to the up script when no `-- up` marker is present.
    pub fn parse(name: impl Into<String>, content: &str) -> Self {
        let mut up = String::new();
        let mut down = String::new();
        let mut in_down = false;
        let mut saw_down = false;

        for line in content.lines() {
            match line.trim().to_ascii_lowercase().as_str() {
                "-- up" => in_down = false,
                "-- down" => {
                    in_down = true;
                    saw_down = true;
                }
                _ => {
                    let target = if in_down { &mut down } else { &mut up };
                    target.push_str(line);
                    target.push('\n');
                }
            }
        }

        let down = down.trim();
        Self {
            name: name.into(),
            up_sql: up.trim().to_string(),
            down_sql: (saw_down && !down.is_empty()).then(|| down.to_string()),
        }
    }

    /// Load a migration file; the unit is named after the file without its
    /// `.sql` extension
    pub fn from_file(path: &Path) -> MigrateResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MigrateError::Catalog(format!("invalid file name: {:?}", path)))?;
        let name = file_name.strip_suffix(".sql").unwrap_or(file_name);
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(name, &content))
    }

    pub fn up_sql(&self) -> &str {
        &self.up_sql
    }

    pub fn down_sql(&self) -> Option<&str> {
        self.down_sql.as_deref()
    }
}

#[async_trait]
impl MigrationUnit for SqlMigration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply(&self, ctx: &mut ExecutionContext<'_>) -> StorageResult<()> {
        if !self.up_sql.is_empty() {
            ctx.execute(&self.up_sql).await?;
        }
        Ok(())
    }

    async fn revert(&self, ctx: &mut ExecutionContext<'_>) -> StorageResult<()> {
        match &self.down_sql {
            Some(down_sql) => {
                ctx.execute(down_sql).await?;
                Ok(())
            }
            None => Err(StorageError::MigrationFailed(format!(
                "No down migration defined for {}",
                self.name
            ))),
        }
    }
}
