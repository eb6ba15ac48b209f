//! Command dispatch pipeline.
//!
//! `execute_command` is the single entry point for state change: it runs the
//! command handler, then drains a bounded work queue of the events it
//! produced and the follow-ups their subscribers requested. Each event is
//! appended to the log and applied to the aggregates in one step, then
//! published. One dispatch lock serializes the whole batch, so replay order
//! equals execution order.

use crate::aggregate::{Aggregate, AggregateSet, StateSnapshot};
use crate::bus::{Dispatch, EventBus, EventHandler, SubscriptionId};
use crate::command::{CommandCatalog, CommandInfo, CommandShape};
use crate::event::{EventRecord, Payload};
use crate::event_store::{EventStore, StoreError};
use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Errors surfaced by `execute_command`. Only the initial command reports
/// through this; cascade failures are logged and skipped.
#[derive(Debug, Clone)]
pub enum CommandError {
    UnknownCommand { name: String },
    HandlerFailed { name: String, message: String },
    /// The command belongs to a module whose registration has been retired.
    ModuleStale { name: String, module: String },
    Storage { message: String },
}

impl Display for CommandError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCommand { name } => write!(f, "unknown command: {}", name),
            Self::HandlerFailed { name, message } => {
                write!(f, "command {} failed: {}", name, message)
            }
            Self::ModuleStale { name, module } => {
                write!(f, "command {} belongs to stale module {}", name, module)
            }
            Self::Storage { message } => write!(f, "event persistence failed: {}", message),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        Self::Storage {
            message: e.to_string(),
        }
    }
}

/// Command handlers are synchronous and pure with respect to the runtime:
/// input payload and state snapshot in, events out. Long-running work goes
/// through the recovery layer and re-enters as a follow-up command.
pub type CommandHandler =
    Arc<dyn Fn(&Payload, &StateSnapshot) -> anyhow::Result<Vec<EventRecord>> + Send + Sync>;

/// Liveness gate for one module registration. Reloading a module retires the
/// old gate instead of evicting its entries, so a handler captured by a
/// stale closure can never run again.
pub struct ModuleGate {
    module: String,
    version: u64,
    active: AtomicBool,
}

impl ModuleGate {
    pub fn new(module: &str, version: u64) -> Self {
        Self {
            module: module.to_string(),
            version,
            active: AtomicBool::new(true),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn retire(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

struct CommandEntry {
    handler: CommandHandler,
    shape: Option<CommandShape>,
    gate: Option<Arc<ModuleGate>>,
}

enum WorkItem {
    Event { record: EventRecord, depth: usize },
    Command {
        name: String,
        payload: Payload,
        depth: usize,
    },
}

pub struct EventProcessor {
    store: Arc<dyn EventStore>,
    bus: Arc<EventBus>,
    aggregates: RwLock<AggregateSet>,
    commands: RwLock<HashMap<String, CommandEntry>>,
    dispatch: Mutex<()>,
    max_cascade_depth: usize,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn EventStore>, bus: Arc<EventBus>, max_cascade_depth: usize) -> Self {
        Self {
            store,
            bus,
            aggregates: RwLock::new(AggregateSet::default()),
            commands: RwLock::new(HashMap::new()),
            dispatch: Mutex::new(()),
            max_cascade_depth,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Registers an aggregate and hydrates it from the store, so a
    /// projection registered after boot (or swapped in by a module reload)
    /// matches what a fresh restart would rebuild. Hydration never
    /// publishes.
    pub fn register_aggregate(&self, mut aggregate: Box<dyn Aggregate>) {
        for event in self.store.events_for(aggregate.id()) {
            if let Err(err) = aggregate.apply(&event) {
                tracing::warn!(
                    aggregate = aggregate.id(),
                    event_type = %event.event_type,
                    error = %err,
                    "aggregate hydration skipped an event"
                );
            }
        }
        if let Ok(mut aggregates) = self.aggregates.write() {
            aggregates.register(aggregate);
        }
    }

    /// Registers a built-in command with no module gate.
    pub fn register_command(&self, name: &str, handler: CommandHandler) {
        self.install_command(name, handler, None, None);
    }

    /// Registers a module command. Re-registration by the same module (a
    /// reload) replaces its own entry; a collision with another live module
    /// keeps the first registration and logs the loser.
    pub fn register_module_command(
        &self,
        name: &str,
        handler: CommandHandler,
        shape: Option<CommandShape>,
        gate: Arc<ModuleGate>,
    ) {
        self.install_command(name, handler, shape, Some(gate));
    }

    fn install_command(
        &self,
        name: &str,
        handler: CommandHandler,
        shape: Option<CommandShape>,
        gate: Option<Arc<ModuleGate>>,
    ) {
        let Ok(mut commands) = self.commands.write() else {
            return;
        };
        if let Some(existing) = commands.get(name) {
            let same_module = match (&existing.gate, &gate) {
                (Some(old), Some(new)) => old.module() == new.module(),
                _ => false,
            };
            // A retired entry no longer owns the name; anyone may claim it.
            let retired = existing
                .gate
                .as_ref()
                .map(|g| !g.is_active())
                .unwrap_or(false);
            if !same_module && !retired {
                tracing::warn!(
                    command = name,
                    winner = existing.gate.as_ref().map(|g| g.module()).unwrap_or("builtin"),
                    loser = gate.as_ref().map(|g| g.module()).unwrap_or("builtin"),
                    "command name collision, first registration wins"
                );
                return;
            }
        }
        commands.insert(
            name.to_string(),
            CommandEntry {
                handler,
                shape,
                gate,
            },
        );
    }

    pub fn subscribe(&self, event_type: &str, handler: EventHandler) -> SubscriptionId {
        self.bus.subscribe(event_type, handler)
    }

    /// Commands currently resolvable, stale-gated entries excluded.
    pub fn catalog(&self) -> CommandCatalog {
        let mut entries: Vec<CommandInfo> = self
            .commands
            .read()
            .map(|commands| {
                commands
                    .iter()
                    .filter(|(_, entry)| {
                        entry.gate.as_ref().map(|g| g.is_active()).unwrap_or(true)
                    })
                    .map(|(name, entry)| CommandInfo {
                        name: name.clone(),
                        module: entry.gate.as_ref().map(|g| g.module().to_string()),
                        shape: entry.shape.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        CommandCatalog { entries }
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        self.aggregates
            .read()
            .map(|aggregates| aggregates.snapshot())
            .unwrap_or_default()
    }

    pub fn aggregate_state(&self, aggregate_id: &str) -> Option<Payload> {
        self.aggregates
            .read()
            .ok()
            .and_then(|aggregates| aggregates.state_of(aggregate_id))
    }

    fn lookup(&self, name: &str) -> Result<CommandHandler, CommandError> {
        let commands = self.commands.read().map_err(|_| CommandError::Storage {
            message: "command table poisoned".to_string(),
        })?;
        let entry = commands.get(name).ok_or_else(|| CommandError::UnknownCommand {
            name: name.to_string(),
        })?;
        if let Some(gate) = &entry.gate {
            if !gate.is_active() {
                return Err(CommandError::ModuleStale {
                    name: name.to_string(),
                    module: gate.module().to_string(),
                });
            }
        }
        Ok(Arc::clone(&entry.handler))
    }

    /// Executes one command and drains every follow-up it triggers.
    ///
    /// The initial handler is strict: unknown commands, stale gates, and
    /// handler errors abort with no state change. Once events start
    /// committing, cascade failures (bad follow-up commands, handler errors)
    /// are logged and skipped so one misbehaving subscriber cannot poison an
    /// already-persisted batch. Follow-ups deeper than the cascade limit are
    /// dropped with a warning.
    pub fn execute_command(&self, name: &str, payload: Payload) -> Result<(), CommandError> {
        let _guard = self.dispatch.lock().map_err(|_| CommandError::Storage {
            message: "dispatch lock poisoned".to_string(),
        })?;

        let handler = self.lookup(name)?;
        let snapshot = self.state_snapshot();
        let events = handler(&payload, &snapshot).map_err(|e| CommandError::HandlerFailed {
            name: name.to_string(),
            message: format!("{:#}", e),
        })?;

        let mut queue: VecDeque<WorkItem> = events
            .into_iter()
            .map(|record| WorkItem::Event { record, depth: 0 })
            .collect();

        while let Some(item) = queue.pop_front() {
            match item {
                WorkItem::Event { record, depth } => {
                    self.commit_and_publish(record, depth, &mut queue)?;
                }
                WorkItem::Command {
                    name,
                    payload,
                    depth,
                } => {
                    let handler = match self.lookup(&name) {
                        Ok(handler) => handler,
                        Err(err) => {
                            tracing::warn!(command = %name, error = %err, "cascade command skipped");
                            continue;
                        }
                    };
                    let snapshot = self.state_snapshot();
                    match handler(&payload, &snapshot) {
                        Ok(events) => {
                            // A command's events commit before anything
                            // queued behind it, so the next command's
                            // snapshot already reflects them.
                            for record in events.into_iter().rev() {
                                queue.push_front(WorkItem::Event { record, depth });
                            }
                        }
                        Err(err) => {
                            tracing::warn!(
                                command = %name,
                                error = %err,
                                "cascade command failed, skipping"
                            );
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn commit_and_publish(
        &self,
        record: EventRecord,
        depth: usize,
        queue: &mut VecDeque<WorkItem>,
    ) -> Result<(), CommandError> {
        {
            // Appending while the state lock is held keeps the two in step:
            // a reader that observes the applied state will find the record
            // in the log, and a failed append leaves the state untouched.
            let mut aggregates = self.aggregates.write().map_err(|_| CommandError::Storage {
                message: "aggregate state poisoned".to_string(),
            })?;
            self.store.append(std::slice::from_ref(&record))?;
            aggregates.apply_all(&record);
        }

        let snapshot = self.state_snapshot();
        let catalog = self.catalog();
        let follow_ups = self.bus.publish(&record, &snapshot, &catalog);

        if follow_ups.is_empty() {
            return Ok(());
        }
        if depth + 1 > self.max_cascade_depth {
            tracing::warn!(
                event_type = %record.event_type,
                depth,
                limit = self.max_cascade_depth,
                "cascade depth limit reached, dropping follow-ups"
            );
            return Ok(());
        }
        for dispatch in follow_ups {
            match dispatch {
                Dispatch::Event(record) => queue.push_back(WorkItem::Event {
                    record,
                    depth: depth + 1,
                }),
                Dispatch::Command { name, payload } => queue.push_back(WorkItem::Command {
                    name,
                    payload,
                    depth: depth + 1,
                }),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/processor_tests.rs"]
mod tests;
