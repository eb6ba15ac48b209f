//! Event log persistence.
//!
//! Two backends share one trait: a JSONL file log and an indexed sqlite
//! store. Both keep the full history readable in order; replay is just
//! `events()` applied front to back.

pub mod file_store;
pub mod sqlite_store;

pub use file_store::FileEventStore;
pub use sqlite_store::{migrate_file_to_sqlite, SqliteEventStore};

use crate::event::EventRecord;
use std::fmt::{Display, Formatter};

/// Errors from event log persistence.
#[derive(Debug, Clone)]
pub enum StoreError {
    /// Underlying I/O failure.
    Io { message: String },
    /// A persisted record could not be decoded. Loading is fail-closed:
    /// a corrupt log refuses to open rather than replaying partial history.
    Corrupt { message: String },
    /// A record carries a type no subsystem has registered.
    UnknownEventType { event_type: String },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { message } => write!(f, "event store I/O failure: {}", message),
            Self::Corrupt { message } => write!(f, "event log corrupt: {}", message),
            Self::UnknownEventType { event_type } => {
                write!(f, "event log holds unregistered type: {}", event_type)
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io {
            message: e.to_string(),
        }
    }
}

/// Append-only event log.
pub trait EventStore: Send + Sync {
    /// Appends records in order. Each record must be durable before this
    /// returns; a failure leaves the log unchanged past the last durable
    /// record.
    fn append(&self, events: &[EventRecord]) -> Result<(), StoreError>;

    /// Full history in append order.
    fn events(&self) -> Vec<EventRecord>;

    /// History for a single aggregate, in append order.
    fn events_for(&self, aggregate_id: &str) -> Vec<EventRecord>;

    /// (Re)loads history from the backing medium. Called once at boot.
    fn load(&self) -> Result<(), StoreError>;
}
