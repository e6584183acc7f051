//! Plan resolution: which units a request executes, and in what order
//!
//! Resolution works on two inputs, the catalog and the current log, and
//! never touches the database itself. Rules, in priority order:
//!
//! 1. `only` without `to`/`from` selects exactly one unit.
//! 2. Otherwise the candidates are the pending units (for `up`) or the
//!    executed units newest first (for `down`).
//! 3. `from` drops candidates before the first match; no match is ignored.
//! 4. `to` drops candidates after the first match. `0` means "everything"
//!    for `down`.
//! 5. `step` keeps at most that many of the remaining candidates.
//!
//! Every name given in a request is a prefix: `20200101` selects
//! `20200101_create_users`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use strata_storage::LogEntry;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::unit::MigrationUnit;
use crate::{MigrateError, MigrateResult};

/// Whether units are applied or reverted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

/// Bound given as `to` or `from`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// `0`: no bound at all
    All,
    /// Name prefix of a unit
    Name(String),
}

impl Target {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "0" => Target::All,
            name => Target::Name(name.to_string()),
        }
    }
}

impl From<&str> for Target {
    fn from(value: &str) -> Self {
        Target::parse(value)
    }
}

impl From<String> for Target {
    fn from(value: String) -> Self {
        Target::parse(&value)
    }
}

/// What to do when `to` names a unit that does not exist
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedTarget {
    /// Fail with [`MigrateError::UnitNotFound`]
    #[default]
    Error,
    /// Resolve to an empty plan
    Ignore,
}

/// Filters for an `up` or `down` request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationRequest {
    pub to: Option<Target>,
    pub from: Option<Target>,
    pub only: Option<String>,
    pub step: Option<usize>,
}

impl MigrationRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to(mut self, target: impl Into<Target>) -> Self {
        self.to = Some(target.into());
        self
    }

    pub fn from(mut self, target: impl Into<Target>) -> Self {
        self.from = Some(target.into());
        self
    }

    pub fn only(mut self, name: impl Into<String>) -> Self {
        self.only = Some(name.into());
        self
    }

    pub fn step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    /// Set the step from its textual form; an empty value means one step
    pub fn step_str(self, step: &str) -> MigrateResult<Self> {
        Ok(self.step(parse_step(step)?))
    }
}

/// Parse a textual step count. An empty value means `1`.
pub fn parse_step(value: &str) -> MigrateResult<usize> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(1);
    }
    trimmed
        .parse()
        .map_err(|_| MigrateError::InvalidStep(value.to_string()))
}

/// Ordered units a request will execute
#[derive(Clone)]
pub struct Plan {
    direction: Direction,
    units: Vec<Arc<dyn MigrationUnit>>,
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("direction", &self.direction)
            .field("units", &self.names())
            .finish()
    }
}

impl Plan {
    pub fn new(direction: Direction, units: Vec<Arc<dyn MigrationUnit>>) -> Self {
        Self { direction, units }
    }

    pub fn empty(direction: Direction) -> Self {
        Self::new(direction, Vec::new())
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn units(&self) -> &[Arc<dyn MigrationUnit>] {
        &self.units
    }

    pub fn names(&self) -> Vec<String> {
        self.units.iter().map(|u| u.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Resolves requests against one snapshot of catalog and log
pub struct Resolver<'a> {
    catalog: &'a Catalog,
    applied: &'a [LogEntry],
    unmatched: UnmatchedTarget,
}

impl<'a> Resolver<'a> {
    pub fn new(catalog: &'a Catalog, applied: &'a [LogEntry]) -> Self {
        Self {
            catalog,
            applied,
            unmatched: UnmatchedTarget::default(),
        }
    }

    pub fn with_unmatched_target(mut self, policy: UnmatchedTarget) -> Self {
        self.unmatched = policy;
        self
    }

    /// Candidates before any bound is applied
    pub fn candidates(&self, direction: Direction) -> Vec<Arc<dyn MigrationUnit>> {
        match direction {
            Direction::Up => self.catalog.pending(self.applied),
            Direction::Down => {
                let mut executed = self.catalog.executed(self.applied);
                executed.reverse();
                executed
            }
        }
    }

    pub fn resolve(&self, direction: Direction, request: &MigrationRequest) -> MigrateResult<Plan> {
        if request.to.is_none() && request.from.is_none() {
            if let Some(only) = &request.only {
                return self.resolve_only(direction, only);
            }
        }

        let mut candidates = self.candidates(direction);

        if let Some(Target::Name(from)) = &request.from {
            match position(&candidates, from) {
                Some(index) => candidates = candidates.split_off(index),
                None => debug!("--from {} matches no {} candidate, ignoring it", from, direction),
            }
        }

        match &request.to {
            None => {}
            Some(Target::All) if direction == Direction::Down => {}
            Some(Target::All) => return self.unmatched_target("0", direction),
            Some(Target::Name(to)) => match position(&candidates, to) {
                Some(index) => candidates.truncate(index + 1),
                None => return self.unmatched_target(to, direction),
            },
        }

        if let Some(step) = request.step {
            candidates.truncate(step);
        }

        debug!("Resolved {} plan with {} units", direction, candidates.len());
        Ok(Plan::new(direction, candidates))
    }

    fn resolve_only(&self, direction: Direction, only: &str) -> MigrateResult<Plan> {
        let unit = self
            .catalog_match(only)
            .ok_or_else(|| MigrateError::UnitNotFound {
                name: only.to_string(),
            })?;

        let is_applied = self.applied.iter().any(|e| e.name == unit.name());
        match (direction, is_applied) {
            (Direction::Up, true) => Err(MigrateError::AlreadyApplied {
                name: unit.name().to_string(),
            }),
            (Direction::Down, false) => Err(MigrateError::NotApplied {
                name: unit.name().to_string(),
            }),
            _ => Ok(Plan::new(direction, vec![unit])),
        }
    }

    /// `to` matched no candidate. A unit that exists but is already on the
    /// far side of the target means there is nothing left to do; a name that
    /// exists nowhere is handled by the configured policy.
    fn unmatched_target(&self, target: &str, direction: Direction) -> MigrateResult<Plan> {
        if target != "0" && self.catalog_match(target).is_some() {
            info!("Already at target {} ({})", target, direction);
            return Ok(Plan::empty(direction));
        }

        match self.unmatched {
            UnmatchedTarget::Error => Err(MigrateError::UnitNotFound {
                name: target.to_string(),
            }),
            UnmatchedTarget::Ignore => {
                warn!("No such migration: {}, nothing to {}", target, direction);
                Ok(Plan::empty(direction))
            }
        }
    }

    fn catalog_match(&self, prefix: &str) -> Option<Arc<dyn MigrationUnit>> {
        let mut matches = self.catalog.units().filter(|u| u.name().starts_with(prefix));
        let first = matches.next().cloned();
        if first.is_some() && matches.next().is_some() {
            warn!("'{}' matches more than one migration, using the first", prefix);
        }
        first
    }
}

/// Index of the candidate matched by `prefix`.
///
/// When several candidates share the prefix the one with the smallest name
/// wins, i.e. the first in catalog order. `down` candidates run newest first,
/// so there that is the last match in the slice, not the first.
fn position(candidates: &[Arc<dyn MigrationUnit>], prefix: &str) -> Option<usize> {
    let matches: Vec<(usize, &str)> = candidates
        .iter()
        .enumerate()
        .filter(|(_, u)| u.name().starts_with(prefix))
        .map(|(i, u)| (i, u.name()))
        .collect();

    if matches.len() > 1 {
        warn!(
            "'{}' matches {} migrations, using the first in catalog order",
            prefix,
            matches.len()
        );
    }

    matches.into_iter().min_by_key(|(_, name)| *name).map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::SqlMigration;
    use chrono::Utc;

    fn catalog(names: &[&str]) -> Catalog {
        Catalog::from_units(
            names
                .iter()
                .map(|n| Arc::new(SqlMigration::new(*n, "SELECT 1")) as Arc<dyn MigrationUnit>)
                .collect(),
        )
        .unwrap()
    }

    fn log(names: &[&str]) -> Vec<LogEntry> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| LogEntry {
                id: i as i64 + 1,
                name: n.to_string(),
                batch: 1,
                applied_at: Utc::now(),
            })
            .collect()
    }

    const FIVE: [&str; 5] = ["20200101_a", "20200102_b", "20200103_c", "20200104_d", "20200105_e"];

    #[test]
    fn test_up_defaults_to_all_pending() {
        let catalog = catalog(&FIVE);
        let applied = log(&["20200101_a"]);
        let plan = Resolver::new(&catalog, &applied)
            .resolve(Direction::Up, &MigrationRequest::new())
            .unwrap();
        assert_eq!(plan.names(), vec!["20200102_b", "20200103_c", "20200104_d", "20200105_e"]);
    }

    #[test]
    fn test_up_step_applies_first_n() {
        let catalog = catalog(&FIVE);
        let plan = Resolver::new(&catalog, &[])
            .resolve(Direction::Up, &MigrationRequest::new().step(2))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a", "20200102_b"]);
    }

    #[test]
    fn test_step_is_clamped() {
        let catalog = catalog(&FIVE);
        let plan = Resolver::new(&catalog, &[])
            .resolve(Direction::Up, &MigrationRequest::new().step(50))
            .unwrap();
        assert_eq!(plan.len(), 5);

        let plan = Resolver::new(&catalog, &[])
            .resolve(Direction::Up, &MigrationRequest::new().step(0))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_down_runs_newest_first() {
        let catalog = catalog(&FIVE);
        let applied = log(&["20200101_a", "20200102_b", "20200103_c"]);
        let resolver = Resolver::new(&catalog, &applied);

        let plan = resolver
            .resolve(Direction::Down, &MigrationRequest::new().to("0"))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200103_c", "20200102_b", "20200101_a"]);

        let plan = resolver
            .resolve(Direction::Down, &MigrationRequest::new().step_str("").unwrap())
            .unwrap();
        assert_eq!(plan.names(), vec!["20200103_c"]);
    }

    #[test]
    fn test_to_is_inclusive_prefix() {
        let catalog = catalog(&FIVE);
        let plan = Resolver::new(&catalog, &[])
            .resolve(Direction::Up, &MigrationRequest::new().to("20200103"))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a", "20200102_b", "20200103_c"]);
    }

    #[test]
    fn test_step_and_to_take_the_smaller_bound() {
        let catalog = catalog(&FIVE);
        let resolver = Resolver::new(&catalog, &[]);

        let plan = resolver
            .resolve(Direction::Up, &MigrationRequest::new().to("20200104").step(2))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a", "20200102_b"]);

        let plan = resolver
            .resolve(Direction::Up, &MigrationRequest::new().to("20200102").step(4))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a", "20200102_b"]);
    }

    #[test]
    fn test_from_starts_at_match() {
        let catalog = catalog(&FIVE);
        let resolver = Resolver::new(&catalog, &[]);

        let plan = resolver
            .resolve(
                Direction::Up,
                &MigrationRequest::new().from("20200102").to("20200104"),
            )
            .unwrap();
        assert_eq!(plan.names(), vec!["20200102_b", "20200103_c", "20200104_d"]);

        // an unmatched `from` has no effect
        let plan = resolver
            .resolve(
                Direction::Up,
                &MigrationRequest::new().from("29990101").to("20200102"),
            )
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a", "20200102_b"]);

        let plan = resolver
            .resolve(Direction::Up, &MigrationRequest::new().from("0").step(1))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a"]);
    }

    #[test]
    fn test_only_selects_one_unit() {
        let catalog = catalog(&FIVE);
        let applied = log(&["20200101_a"]);
        let resolver = Resolver::new(&catalog, &applied);

        let plan = resolver
            .resolve(Direction::Up, &MigrationRequest::new().only("20200104"))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200104_d"]);
        assert_eq!(plan.direction(), Direction::Up);

        let plan = resolver
            .resolve(Direction::Down, &MigrationRequest::new().only("20200101_a"))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a"]);

        assert!(matches!(
            resolver.resolve(Direction::Up, &MigrationRequest::new().only("20200101")),
            Err(MigrateError::AlreadyApplied { .. })
        ));
        assert!(matches!(
            resolver.resolve(Direction::Down, &MigrationRequest::new().only("20200105")),
            Err(MigrateError::NotApplied { .. })
        ));
        assert!(matches!(
            resolver.resolve(Direction::Up, &MigrationRequest::new().only("nope")),
            Err(MigrateError::UnitNotFound { .. })
        ));
    }

    #[test]
    fn test_only_is_ignored_when_bounded() {
        let catalog = catalog(&FIVE);
        let plan = Resolver::new(&catalog, &[])
            .resolve(
                Direction::Up,
                &MigrationRequest::new().only("20200105").to("20200101"),
            )
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a"]);
    }

    #[test]
    fn test_unknown_target_is_an_error_by_default() {
        let catalog = catalog(&FIVE);
        let err = Resolver::new(&catalog, &[])
            .resolve(Direction::Up, &MigrationRequest::new().to("20990101"))
            .unwrap_err();
        assert!(matches!(err, MigrateError::UnitNotFound { name } if name == "20990101"));
    }

    #[test]
    fn test_unknown_target_can_be_ignored() {
        let catalog = catalog(&FIVE);
        let plan = Resolver::new(&catalog, &[])
            .with_unmatched_target(UnmatchedTarget::Ignore)
            .resolve(Direction::Up, &MigrationRequest::new().to("20990101"))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_up_to_zero_matches_nothing() {
        let catalog = catalog(&FIVE);
        let resolver = Resolver::new(&catalog, &[]);
        assert!(matches!(
            resolver.resolve(Direction::Up, &MigrationRequest::new().to(Target::All)),
            Err(MigrateError::UnitNotFound { .. })
        ));

        let plan = resolver
            .with_unmatched_target(UnmatchedTarget::Ignore)
            .resolve(Direction::Up, &MigrationRequest::new().to(Target::All))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_target_already_reached_is_empty_not_error() {
        let catalog = catalog(&FIVE);
        let applied = log(&["20200101_a", "20200102_b"]);
        let plan = Resolver::new(&catalog, &applied)
            .resolve(Direction::Up, &MigrationRequest::new().to("20200102_b"))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_ambiguous_prefix_takes_first_in_catalog_order() {
        let catalog = catalog(&["20200101_a", "20200101_b", "20200102_c"]);
        let applied = log(&["20200101_a", "20200101_b", "20200102_c"]);
        let resolver = Resolver::new(&catalog, &applied);

        let plan = resolver
            .resolve(Direction::Up, &MigrationRequest::new())
            .unwrap();
        assert!(plan.is_empty());

        // newest first: c, b, a; the first catalog-order match of "20200101" is a
        let plan = resolver
            .resolve(Direction::Down, &MigrationRequest::new().to("20200101"))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200102_c", "20200101_b", "20200101_a"]);

        let plan = Resolver::new(&catalog, &[])
            .resolve(Direction::Up, &MigrationRequest::new().to("20200101"))
            .unwrap();
        assert_eq!(plan.names(), vec!["20200101_a"]);
    }

    #[test]
    fn test_parse_step() {
        assert_eq!(parse_step("").unwrap(), 1);
        assert_eq!(parse_step("3").unwrap(), 3);
        assert!(matches!(parse_step("two"), Err(MigrateError::InvalidStep(_))));
        assert_eq!(Target::parse("0"), Target::All);
        assert_eq!(Target::parse("2020"), Target::Name("2020".to_string()));
    }
}
