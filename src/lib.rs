//! Hearth: a local, event-sourced personal assistant runtime.
//!
//! Every change enters as a command, becomes one or more persisted events,
//! and fans out to in-memory projections and subscribers. Restart replays
//! the log; nothing else is state. Modules are declared in YAML manifests,
//! registered behind stale-checked gates, and hot reloaded from disk.

pub mod aggregate;
pub mod bus;
pub mod chat;
pub mod command;
pub mod config;
pub mod event;
pub mod event_store;
pub mod modules;
pub mod orchestration;
pub mod processor;
pub mod recovery;
pub mod runtime;
pub mod scheduler;
pub mod structured_logger;

pub use config::RuntimeConfig;
pub use event::{EventRecord, Payload};
pub use processor::{CommandError, EventProcessor};
pub use runtime::Runtime;
