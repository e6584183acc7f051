//! Batch-aware schema migration engine
//!
//! A [`Migrator`] loads an ordered [`Catalog`] of migration units, compares
//! it with the execution log kept by `strata-storage`, and applies or reverts
//! units to reach the requested state. Every `up` run records its units under
//! a single batch number so that [`Migrator::rollback`] can undo exactly that
//! run.
//!
//! ```no_run
//! use strata_migrate::{MigrationRequest, Migrator, MigratorConfig};
//!
//! # async fn run() -> strata_migrate::MigrateResult<()> {
//! let config = MigratorConfig {
//!     database_url: Some("sqlite://app.db?mode=rwc".to_string()),
//!     ..Default::default()
//! };
//! let migrator = Migrator::from_config(&config).await?;
//! let applied = migrator.up(&MigrationRequest::new().step(2)).await?;
//! println!("applied {:?}", applied);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod catalog;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod migrator;
pub mod plan;
pub mod runner;
pub mod unit;

pub use catalog::{Catalog, DEFAULT_FILE_PATTERN};
pub use config::{ConfigLoader, MigratorConfig};
pub use error::{MigrateError, MigrateResult};
pub use events::{Action, ChannelObserver, MigrationEvent, MigrationObserver, NoopObserver, RecordingObserver};
pub use migrator::{Command, Migrator};
pub use plan::{parse_step, Direction, MigrationRequest, Plan, Resolver, Target, UnmatchedTarget};
pub use runner::{RunState, Runner};
pub use unit::{MigrationUnit, SqlMigration};
