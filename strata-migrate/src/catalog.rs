//! Migration catalog: every known unit in canonical order

use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use strata_storage::LogEntry;
use tracing::debug;
use walkdir::WalkDir;

use crate::unit::{MigrationUnit, SqlMigration};
use crate::{MigrateError, MigrateResult};

/// Default pattern for migration file names: `<digits>_<name>.sql`
pub const DEFAULT_FILE_PATTERN: &str = r"^\d+_.+\.sql$";

/// Ordered, immutable set of migration units
#[derive(Clone, Default)]
pub struct Catalog {
    units: Vec<Arc<dyn MigrationUnit>>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.units.iter().map(|u| u.name())).finish()
    }
}

impl Catalog {
    /// Build a catalog from units in any order
    pub fn from_units(units: Vec<Arc<dyn MigrationUnit>>) -> MigrateResult<Self> {
        let mut seen = HashSet::new();
        for unit in &units {
            if !seen.insert(unit.name().to_string()) {
                return Err(MigrateError::DuplicateUnit(unit.name().to_string()));
            }
        }

        let mut units = units;
        units.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(Self { units })
    }

    /// Load every file in `dir` whose name matches `pattern`.
    ///
    /// Only the directory itself is read; entries that don't match are skipped.
    pub fn from_dir(dir: impl AsRef<Path>, pattern: &str) -> MigrateResult<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(MigrateError::Catalog(format!(
                "No migrations directory at '{}'",
                dir.display()
            )));
        }

        let pattern = Regex::new(pattern)?;
        let mut units: Vec<Arc<dyn MigrationUnit>> = Vec::new();

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let matches = entry
                .file_name()
                .to_str()
                .map(|name| pattern.is_match(name))
                .unwrap_or(false);
            if !matches {
                debug!("Skipping {:?}", entry.path());
                continue;
            }

            units.push(Arc::new(SqlMigration::from_file(entry.path())?));
        }

        debug!("Loaded {} migrations from {}", units.len(), dir.display());
        Self::from_units(units)
    }

    /// Units in ascending name order
    pub fn units(&self) -> impl Iterator<Item = &Arc<dyn MigrationUnit>> + '_ {
        self.units.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.units.iter().map(|u| u.name())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn MigrationUnit>> {
        self.units
            .binary_search_by(|u| u.name().cmp(name))
            .ok()
            .map(|i| &self.units[i])
    }

    /// Units not present in the log, catalog order
    pub fn pending(&self, applied: &[LogEntry]) -> Vec<Arc<dyn MigrationUnit>> {
        let applied: HashSet<&str> = applied.iter().map(|e| e.name.as_str()).collect();
        self.units
            .iter()
            .filter(|u| !applied.contains(u.name()))
            .cloned()
            .collect()
    }

    /// Units present in the log, catalog order
    pub fn executed(&self, applied: &[LogEntry]) -> Vec<Arc<dyn MigrationUnit>> {
        let applied: HashSet<&str> = applied.iter().map(|e| e.name.as_str()).collect();
        self.units
            .iter()
            .filter(|u| applied.contains(u.name()))
            .cloned()
            .collect()
    }
}
