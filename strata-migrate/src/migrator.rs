//! Command facade over catalog, log and runner

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use strata_storage::{connect, StorageHandle};
use tracing::{debug, info};

use crate::batch::rollback_plan;
use crate::catalog::Catalog;
use crate::config::MigratorConfig;
use crate::events::{Action, MigrationObserver};
use crate::plan::{Direction, MigrationRequest, Plan, Resolver, UnmatchedTarget};
use crate::runner::{RunState, Runner};
use crate::{MigrateError, MigrateResult};

/// Commands understood by [`Migrator::execute`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Up,
    Down,
    Pending,
    List,
    Rollback,
    Redo,
}

impl FromStr for Command {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Command::Up),
            "down" => Ok(Command::Down),
            "pending" => Ok(Command::Pending),
            "list" => Ok(Command::List),
            "rollback" => Ok(Command::Rollback),
            "redo" => Ok(Command::Redo),
            other => Err(MigrateError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Up => "up",
            Command::Down => "down",
            Command::Pending => "pending",
            Command::List => "list",
            Command::Rollback => "rollback",
            Command::Redo => "redo",
        };
        f.write_str(s)
    }
}

/// Entry point for running migrations against one database.
///
/// Callers must not run two commands against the same database at once; the
/// engine takes no locks of its own.
pub struct Migrator {
    catalog: Catalog,
    runner: Runner,
    unmatched: UnmatchedTarget,
}

impl Migrator {
    pub fn new(catalog: Catalog, storage: StorageHandle) -> Self {
        Self {
            catalog,
            runner: Runner::new(storage.connection, storage.log),
            unmatched: UnmatchedTarget::default(),
        }
    }

    /// Load the catalog and connect to the database named in `config`
    pub async fn from_config(config: &MigratorConfig) -> MigrateResult<Self> {
        config.validate()?;
        let catalog = Catalog::from_dir(&config.directory, &config.pattern)?;
        let storage = connect(&config.storage_config()?).await?;

        info!(
            "Loaded {} migrations from {}",
            catalog.len(),
            config.directory.display()
        );

        Ok(Self::new(catalog, storage)
            .with_transactions(config.transactional)
            .with_unmatched_target(config.unmatched_target))
    }

    pub fn with_observer(mut self, observer: Arc<dyn MigrationObserver>) -> Self {
        self.runner = self.runner.with_observer(observer);
        self
    }

    pub fn with_transactions(mut self, transactional: bool) -> Self {
        self.runner = self.runner.with_transactions(transactional);
        self
    }

    pub fn with_unmatched_target(mut self, policy: UnmatchedTarget) -> Self {
        self.unmatched = policy;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// State of the most recent run
    pub fn state(&self) -> RunState {
        self.runner.state()
    }

    /// Parse `command` and run it. Unknown commands fail before any I/O.
    pub async fn execute(&self, command: &str, request: &MigrationRequest) -> MigrateResult<Vec<String>> {
        let command: Command = command.parse()?;
        debug!("Executing {} command", command);

        match command {
            Command::Up => self.up(request).await,
            Command::Down => self.down(request).await,
            Command::Pending => self.pending().await,
            Command::List => self.list().await,
            Command::Rollback => self.rollback().await,
            Command::Redo => self.redo().await,
        }
    }

    /// Apply pending migrations, returning the names applied
    pub async fn up(&self, request: &MigrationRequest) -> MigrateResult<Vec<String>> {
        self.migrate(Direction::Up, request).await
    }

    /// Revert executed migrations, returning the names reverted
    pub async fn down(&self, request: &MigrationRequest) -> MigrateResult<Vec<String>> {
        self.migrate(Direction::Down, request).await
    }

    /// Names of the migrations not yet applied, in catalog order
    pub async fn pending(&self) -> MigrateResult<Vec<String>> {
        let applied = self.runner.log().list_applied().await?;
        Ok(self
            .catalog
            .pending(&applied)
            .iter()
            .map(|u| u.name().to_string())
            .collect())
    }

    /// Names of the applied migrations, in the order they were applied
    pub async fn list(&self) -> MigrateResult<Vec<String>> {
        let applied = self.runner.log().list_applied().await?;
        Ok(applied.into_iter().map(|e| e.name).collect())
    }

    /// Revert the most recent batch
    pub async fn rollback(&self) -> MigrateResult<Vec<String>> {
        self.ensure_log().await?;
        self.runner.set_state(RunState::Resolving);
        let plan = match self.runner.log().list_applied().await {
            Ok(applied) => rollback_plan(&self.catalog, &applied),
            Err(err) => Err(err.into()),
        };
        let plan = plan.inspect_err(|_| self.runner.set_state(RunState::Failed))?;
        self.runner.run(&plan).await
    }

    /// Revert the most recent batch, then apply everything pending
    pub async fn redo(&self) -> MigrateResult<Vec<String>> {
        let reverted = self.rollback().await?;
        debug!("Redo reverted {:?}", reverted);
        self.up(&MigrationRequest::default()).await
    }

    /// Resolve a request without running it. Never creates the log table.
    pub async fn plan(&self, direction: Direction, request: &MigrationRequest) -> MigrateResult<Plan> {
        let applied = self.runner.log().list_applied().await?;
        Resolver::new(&self.catalog, &applied)
            .with_unmatched_target(self.unmatched)
            .resolve(direction, request)
    }

    async fn migrate(&self, direction: Direction, request: &MigrationRequest) -> MigrateResult<Vec<String>> {
        self.ensure_log().await?;
        self.runner.set_state(RunState::Resolving);
        let plan = self
            .plan(direction, request)
            .await
            .inspect_err(|_| self.runner.set_state(RunState::Failed))?;
        self.runner.run(&plan).await
    }

    async fn ensure_log(&self) -> MigrateResult<()> {
        let log = self.runner.log();
        let created = log
            .ensure_log()
            .await
            .inspect_err(|_| self.runner.set_state(RunState::Failed))?;
        if created {
            self.runner
                .emit(Action::Debug, &format!("Created migrations table {}", log.table_name()));
        }
        Ok(())
    }
}
