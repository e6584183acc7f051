//! Migrator configuration and environment overrides

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strata_storage::{StorageConfig, DEFAULT_LOG_TABLE};

use crate::catalog::DEFAULT_FILE_PATTERN;
use crate::plan::UnmatchedTarget;
use crate::{MigrateError, MigrateResult};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// Directory holding the migration files
    pub directory: PathBuf,

    /// Regular expression a file name must match to be loaded
    pub pattern: String,

    /// Execution log table
    pub table_name: String,

    /// Run each unit inside its own transaction
    pub transactional: bool,

    /// Behaviour when `to` names no known migration
    pub unmatched_target: UnmatchedTarget,

    /// Database to migrate
    pub database_url: Option<String>,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("migrations"),
            pattern: DEFAULT_FILE_PATTERN.to_string(),
            table_name: DEFAULT_LOG_TABLE.to_string(),
            transactional: true,
            unmatched_target: UnmatchedTarget::default(),
            database_url: None,
        }
    }
}

impl MigratorConfig {
    pub fn from_yaml_str(content: &str) -> MigrateResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MigrateResult<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(MigrateError::Config("directory must not be empty".to_string()));
        }

        regex::Regex::new(&self.pattern)?;

        if self.table_name.is_empty()
            || !self
                .table_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(MigrateError::Config(format!(
                "invalid table name: '{}'",
                self.table_name
            )));
        }

        if let Some(url) = &self.database_url {
            if url.trim().is_empty() {
                return Err(MigrateError::Config("database_url must not be empty".to_string()));
            }
        }

        Ok(())
    }

    /// Storage configuration for the configured database
    pub fn storage_config(&self) -> MigrateResult<StorageConfig> {
        let url = self
            .database_url
            .as_deref()
            .ok_or_else(|| MigrateError::Config("no database_url configured".to_string()))?;
        Ok(StorageConfig::url(url).with_log_table(self.table_name.clone()))
    }
}

/// Loads [`MigratorConfig`] from YAML files and `STRATA_*` variables
pub struct ConfigLoader {
    prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            prefix: "STRATA".to_string(),
        }
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load a YAML file, then apply environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> MigrateResult<MigratorConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: MigratorConfig = serde_yaml::from_str(&content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides
    pub fn from_env(&self) -> MigrateResult<MigratorConfig> {
        let mut config = MigratorConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> MigrateResult<MigratorConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn apply_env_overrides(&self, config: &mut MigratorConfig) -> MigrateResult<()> {
        if let Ok(dir) = self.get_env_var("MIGRATIONS_DIR") {
            config.directory = PathBuf::from(dir);
        }

        if let Ok(table) = self.get_env_var("MIGRATIONS_TABLE") {
            config.table_name = table;
        }

        if let Ok(pattern) = self.get_env_var("MIGRATIONS_PATTERN") {
            config.pattern = pattern;
        }

        if let Ok(transactional) = self.get_env_var("TRANSACTIONAL") {
            config.transactional = transactional
                .parse()
                .map_err(|e| MigrateError::Config(format!("Invalid TRANSACTIONAL: {}", e)))?;
        }

        if let Ok(url) = self.get_env_var("DATABASE_URL") {
            config.database_url = Some(url);
        }

        Ok(())
    }

    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
