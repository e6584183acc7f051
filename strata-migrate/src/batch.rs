//! Batch bookkeeping for rollback and redo

use std::collections::HashSet;
use strata_storage::LogEntry;
use tracing::debug;

use crate::catalog::Catalog;
use crate::plan::{Direction, Plan};
use crate::{MigrateError, MigrateResult};

/// The most recent batch in a log snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestBatch<'a> {
    pub batch: i64,
    /// Member applied first, by `applied_at` and then insertion order
    pub earliest: &'a LogEntry,
    pub members: Vec<&'a LogEntry>,
}

/// Find the highest batch in `applied`, or `None` for an empty log
pub fn latest_batch(applied: &[LogEntry]) -> Option<LatestBatch<'_>> {
    let batch = applied.iter().map(|e| e.batch).max()?;
    let members: Vec<&LogEntry> = applied.iter().filter(|e| e.batch == batch).collect();
    let earliest = *members.iter().min_by_key(|e| (e.applied_at, e.id))?;

    Some(LatestBatch {
        batch,
        earliest,
        members,
    })
}

/// Plan reverting exactly the members of the latest batch, newest first.
///
/// Walks the executed units backwards and stops after the batch's earliest
/// member. A member with no unit in the catalog cannot be reverted and is
/// reported as [`MigrateError::UnitNotFound`].
pub fn rollback_plan(catalog: &Catalog, applied: &[LogEntry]) -> MigrateResult<Plan> {
    let Some(latest) = latest_batch(applied) else {
        debug!("Log is empty, nothing to roll back");
        return Ok(Plan::empty(Direction::Down));
    };

    for member in &latest.members {
        if catalog.get(&member.name).is_none() {
            return Err(MigrateError::UnitNotFound {
                name: member.name.clone(),
            });
        }
    }

    let members: HashSet<&str> = latest.members.iter().map(|e| e.name.as_str()).collect();
    let mut units = Vec::with_capacity(members.len());
    let mut executed = catalog.executed(applied);
    executed.reverse();

    for unit in executed {
        if !members.contains(unit.name()) {
            continue;
        }
        let reached_earliest = unit.name() == latest.earliest.name;
        units.push(unit);
        if reached_earliest {
            break;
        }
    }

    // Members sorting before the earliest one can only come from a log
    // written out of catalog order; they still belong to the batch.
    if units.len() < members.len() {
        let planned: HashSet<String> = units.iter().map(|u| u.name().to_string()).collect();
        let mut rest: Vec<_> = catalog
            .executed(applied)
            .into_iter()
            .filter(|u| members.contains(u.name()) && !planned.contains(u.name()))
            .collect();
        rest.reverse();
        units.extend(rest);
    }

    debug!(
        "Rolling back batch {} ({} migrations, earliest {})",
        latest.batch,
        units.len(),
        latest.earliest.name
    );
    Ok(Plan::new(Direction::Down, units))
}
