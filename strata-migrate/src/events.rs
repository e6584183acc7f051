//! Progress events emitted while migrations run

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

/// Kind of progress event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// A unit is about to be applied
    Migrate,
    /// A unit was applied and logged
    Migrated,
    /// A unit is about to be reverted
    Revert,
    /// A unit was reverted and unlogged
    Reverted,
    /// Housekeeping, such as creating the log table
    Debug,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Migrate => "migrate",
            Action::Migrated => "migrated",
            Action::Revert => "revert",
            Action::Reverted => "reverted",
            Action::Debug => "debug",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEvent {
    pub action: Action,
    /// Unit name, or a free-form message for [`Action::Debug`]
    pub migration: String,
}

impl MigrationEvent {
    pub fn new(action: Action, migration: impl Into<String>) -> Self {
        Self {
            action,
            migration: migration.into(),
        }
    }
}

/// Receives progress events in execution order
pub trait MigrationObserver: Send + Sync {
    fn notify(&self, event: &MigrationEvent);
}

impl<F> MigrationObserver for F
where
    F: Fn(&MigrationEvent) + Send + Sync,
{
    fn notify(&self, event: &MigrationEvent) {
        self(event)
    }
}

/// Discards every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl MigrationObserver for NoopObserver {
    fn notify(&self, _event: &MigrationEvent) {}
}

/// Forwards events to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<MigrationEvent>,
}

impl ChannelObserver {
    pub fn new(sender: mpsc::UnboundedSender<MigrationEvent>) -> Self {
        Self { sender }
    }

    /// Create an observer together with the receiving end of its channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<MigrationEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }
}

impl MigrationObserver for ChannelObserver {
    fn notify(&self, event: &MigrationEvent) {
        // A dropped receiver only means nobody is listening anymore
        if self.sender.send(event.clone()).is_err() {
            trace!("Event receiver dropped, discarding {} {}", event.action, event.migration);
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<MigrationEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Unit names of the events with `action`, in order
    pub fn names(&self, action: Action) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.action == action)
            .map(|e| e.migration)
            .collect()
    }
}

impl MigrationObserver for RecordingObserver {
    fn notify(&self, event: &MigrationEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
