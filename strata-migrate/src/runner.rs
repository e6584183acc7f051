//! Plan execution

use std::fmt;
use std::sync::{Arc, Mutex};
use strata_storage::{Connection, ExecutionContext, ExecutionLog, LogSession, StorageResult};
use tracing::{debug, error, info, warn};

use crate::events::{Action, MigrationEvent, MigrationObserver, NoopObserver};
use crate::plan::{Direction, Plan};
use crate::unit::MigrationUnit;
use crate::{MigrateError, MigrateResult};

/// Where a runner is in its current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Resolving,
    /// Running the unit at this plan index
    Executing(usize),
    Succeeded,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => write!(f, "idle"),
            RunState::Resolving => write!(f, "resolving"),
            RunState::Executing(index) => write!(f, "executing #{}", index),
            RunState::Succeeded => write!(f, "succeeded"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

/// Executes plans one unit at a time.
///
/// Each unit runs in its own transaction unless transactions are disabled.
/// The log is written after the unit's transaction commits, so a crash in
/// between leaves a unit applied but unlogged.
pub struct Runner {
    connection: Arc<dyn Connection>,
    log: Arc<dyn ExecutionLog>,
    observer: Arc<dyn MigrationObserver>,
    transactional: bool,
    state: Mutex<RunState>,
}

impl Runner {
    pub fn new(connection: Arc<dyn Connection>, log: Arc<dyn ExecutionLog>) -> Self {
        Self {
            connection,
            log,
            observer: Arc::new(NoopObserver),
            transactional: true,
            state: Mutex::new(RunState::Idle),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Disable per-unit transactions, for statements that cannot run inside one
    pub fn with_transactions(mut self, transactional: bool) -> Self {
        self.transactional = transactional;
        self
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    pub fn log(&self) -> &Arc<dyn ExecutionLog> {
        &self.log
    }

    pub fn state(&self) -> RunState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub(crate) fn set_state(&self, next: RunState) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!("Runner {} -> {}", *state, next);
        *state = next;
    }

    pub(crate) fn emit(&self, action: Action, migration: &str) {
        self.observer.notify(&MigrationEvent::new(action, migration));
    }

    /// Run every unit of `plan` in order, returning the names that completed.
    ///
    /// Stops at the first failing unit. Units before it stay applied (or
    /// reverted) and logged.
    pub async fn run(&self, plan: &Plan) -> MigrateResult<Vec<String>> {
        let direction = plan.direction();
        if plan.is_empty() {
            info!("No migrations to {}", direction);
            self.set_state(RunState::Succeeded);
            return Ok(Vec::new());
        }

        info!("Running {} migrations {}", plan.len(), direction);

        let session = LogSession::new(self.log.as_ref());
        let mut completed = Vec::with_capacity(plan.len());

        for (index, unit) in plan.units().iter().enumerate() {
            self.set_state(RunState::Executing(index));
            if let Err(err) = self.run_unit(&session, unit.as_ref(), direction).await {
                error!("Migration {} failed: {}", unit.name(), err);
                self.set_state(RunState::Failed);
                return Err(err);
            }
            completed.push(unit.name().to_string());
        }

        match session.batch() {
            Some(batch) => info!("Applied {} migrations in batch {}", completed.len(), batch),
            None => info!("Reverted {} migrations", completed.len()),
        }
        self.set_state(RunState::Succeeded);
        Ok(completed)
    }

    async fn run_unit(
        &self,
        session: &LogSession<'_>,
        unit: &dyn MigrationUnit,
        direction: Direction,
    ) -> MigrateResult<()> {
        let name = unit.name();
        let (started, finished) = match direction {
            Direction::Up => (Action::Migrate, Action::Migrated),
            Direction::Down => (Action::Revert, Action::Reverted),
        };

        self.emit(started, name);
        debug!("{} {}", started, name);

        let outcome = if self.transactional {
            self.invoke_in_transaction(unit, direction).await
        } else {
            let mut ctx = ExecutionContext::Connection(self.connection.as_ref());
            invoke(unit, direction, &mut ctx).await
        };
        outcome.map_err(|source| MigrateError::UnitExecution {
            name: name.to_string(),
            direction,
            source,
        })?;

        match direction {
            Direction::Up => {
                session.record_applied(name).await?;
            }
            Direction::Down => session.record_reverted(name).await?,
        }

        self.emit(finished, name);
        info!("{} {}", finished, name);
        Ok(())
    }

    async fn invoke_in_transaction(&self, unit: &dyn MigrationUnit, direction: Direction) -> StorageResult<()> {
        let mut tx = self.connection.begin_transaction().await?;

        let result = {
            let mut ctx = ExecutionContext::Transaction(tx.as_mut());
            invoke(unit, direction, &mut ctx).await
        };

        match result {
            Ok(()) => tx.commit().await,
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of {} failed: {}", unit.name(), rollback_err);
                }
                Err(err)
            }
        }
    }
}

async fn invoke(unit: &dyn MigrationUnit, direction: Direction, ctx: &mut ExecutionContext<'_>) -> StorageResult<()> {
    match direction {
        Direction::Up => unit.apply(ctx).await,
        Direction::Down => unit.revert(ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingObserver;
    use crate::unit::SqlMigration;
    use strata_storage::{InMemoryConnection, InMemoryExecutionLog, StorageError};

    fn unit(name: &str, up: &str) -> Arc<dyn MigrationUnit> {
        Arc::new(SqlMigration::new(name, up).with_down_sql(format!("DROP {}", name)))
    }

    async fn runner(connection: InMemoryConnection) -> (Runner, Arc<InMemoryExecutionLog>, Arc<RecordingObserver>) {
        let log = Arc::new(InMemoryExecutionLog::new("strata_migrations"));
        log.ensure_log().await.unwrap();
        let observer = Arc::new(RecordingObserver::new());
        let runner = Runner::new(Arc::new(connection), log.clone()).with_observer(observer.clone());
        (runner, log, observer)
    }

    #[tokio::test]
    async fn test_run_applies_and_logs_in_one_batch() {
        let conn = InMemoryConnection::new();
        let (runner, log, observer) = runner(conn.clone()).await;
        assert_eq!(runner.state(), RunState::Idle);

        let plan = Plan::new(
            Direction::Up,
            vec![unit("1_a", "CREATE a"), unit("2_b", "CREATE b")],
        );
        let done = runner.run(&plan).await.unwrap();

        assert_eq!(done, vec!["1_a", "2_b"]);
        assert_eq!(runner.state(), RunState::Succeeded);
        assert_eq!(conn.committed_statements().await, vec!["CREATE a", "CREATE b"]);
        assert_eq!(conn.transactions_begun().await, 2);

        let entries = log.list_applied().await.unwrap();
        assert_eq!(entries.iter().map(|e| e.batch).collect::<Vec<_>>(), vec![1, 1]);

        let actions: Vec<(Action, String)> = observer
            .events()
            .into_iter()
            .map(|e| (e.action, e.migration))
            .collect();
        assert_eq!(
            actions,
            vec![
                (Action::Migrate, "1_a".to_string()),
                (Action::Migrated, "1_a".to_string()),
                (Action::Migrate, "2_b".to_string()),
                (Action::Migrated, "2_b".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_stops_run_and_rolls_back_unit() {
        let conn = InMemoryConnection::failing_on("BROKEN");
        let (runner, log, observer) = runner(conn.clone()).await;

        let plan = Plan::new(
            Direction::Up,
            vec![
                unit("1_a", "CREATE a"),
                unit("2_b", "BROKEN b"),
                unit("3_c", "CREATE c"),
            ],
        );
        let err = runner.run(&plan).await.unwrap_err();

        match err {
            MigrateError::UnitExecution { name, direction, source } => {
                assert_eq!(name, "2_b");
                assert_eq!(direction, Direction::Up);
                assert!(matches!(source, StorageError::QueryFailed(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.state(), RunState::Failed);
        assert_eq!(conn.committed_statements().await, vec!["CREATE a"]);
        assert_eq!(conn.rollbacks().await, 1);

        let names: Vec<String> = log.list_applied().await.unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["1_a"]);
        assert_eq!(observer.names(Action::Migrate), vec!["1_a", "2_b"]);
        assert_eq!(observer.names(Action::Migrated), vec!["1_a"]);
    }

    #[tokio::test]
    async fn test_revert_removes_entries() {
        let conn = InMemoryConnection::new();
        let (runner, log, observer) = runner(conn.clone()).await;
        log.seed("1_a", 1, chrono::Utc::now()).await;

        let plan = Plan::new(Direction::Down, vec![unit("1_a", "CREATE a")]);
        assert_eq!(runner.run(&plan).await.unwrap(), vec!["1_a"]);

        assert!(log.list_applied().await.unwrap().is_empty());
        assert_eq!(conn.committed_statements().await, vec!["DROP 1_a"]);
        assert_eq!(observer.names(Action::Reverted), vec!["1_a"]);
    }

    #[tokio::test]
    async fn test_empty_plan_is_silent() {
        let conn = InMemoryConnection::new();
        let (runner, log, observer) = runner(conn.clone()).await;

        assert!(runner.run(&Plan::empty(Direction::Up)).await.unwrap().is_empty());
        assert!(observer.events().is_empty());
        assert_eq!(conn.transactions_begun().await, 0);
        assert_eq!(log.current_max_batch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_non_transactional_mode_runs_on_connection() {
        let conn = InMemoryConnection::new();
        let (runner, _log, _observer) = runner(conn.clone()).await;
        let runner = runner.with_transactions(false);
        assert!(!runner.is_transactional());

        let plan = Plan::new(Direction::Up, vec![unit("1_a", "CREATE INDEX CONCURRENTLY i")]);
        runner.run(&plan).await.unwrap();

        assert_eq!(conn.transactions_begun().await, 0);
        assert_eq!(conn.committed_statements().await.len(), 1);
    }
}
