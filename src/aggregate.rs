//! Aggregates: pure projections of the event history.
//!
//! Aggregates hold no logic beyond `apply`; replaying the log front to back
//! through `apply` must always land in the same state. Modules that do not
//! need a custom projection get a [`GenericAggregate`], which groups event
//! payloads by type.

use crate::event::{EventRecord, Payload};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashSet;

/// Snapshot of every aggregate's state, keyed by aggregate id. Handed to
/// command and event handlers as their read model.
pub type StateSnapshot = serde_json::Map<String, Value>;

pub trait Aggregate: Send + Sync {
    fn id(&self) -> &str;

    /// Applies one event. Must be deterministic and must not touch anything
    /// outside the aggregate. Events the aggregate does not care about are
    /// ignored, not errors.
    fn apply(&mut self, event: &EventRecord) -> anyhow::Result<()>;

    /// Current state as an ordered JSON object.
    fn state(&self) -> Payload;
}

/// Keyed projection for manifest modules: payloads grouped by event type,
/// newest last, plus the latest payload per type for quick reads.
pub struct GenericAggregate {
    id: String,
    interests: HashSet<String>,
    history: BTreeMap<String, Vec<Value>>,
}

impl GenericAggregate {
    pub fn new(id: &str, interests: impl IntoIterator<Item = String>) -> Self {
        Self {
            id: id.to_string(),
            interests: interests.into_iter().collect(),
            history: BTreeMap::new(),
        }
    }

    pub fn latest(&self, event_type: &str) -> Option<&Value> {
        self.history.get(event_type).and_then(|entries| entries.last())
    }
}

impl Aggregate for GenericAggregate {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, event: &EventRecord) -> anyhow::Result<()> {
        if !self.interests.contains(&event.event_type) {
            return Ok(());
        }
        self.history
            .entry(event.event_type.clone())
            .or_default()
            .push(Value::Object(event.data.clone()));
        Ok(())
    }

    fn state(&self) -> Payload {
        let mut state = Payload::new();
        for (event_type, entries) in &self.history {
            state.insert(event_type.clone(), Value::Array(entries.clone()));
        }
        state
    }
}

/// The runtime's aggregates, applied as a unit.
#[derive(Default)]
pub struct AggregateSet {
    items: Vec<Box<dyn Aggregate>>,
}

impl AggregateSet {
    pub fn register(&mut self, aggregate: Box<dyn Aggregate>) {
        if self.items.iter().any(|a| a.id() == aggregate.id()) {
            tracing::warn!(aggregate = aggregate.id(), "replacing aggregate projection");
            self.items.retain(|a| a.id() != aggregate.id());
        }
        self.items.push(aggregate);
    }

    /// Applies the event to every aggregate. Apply failures are logged and
    /// do not stop the others; projections are best-effort views, the log
    /// itself stays authoritative.
    pub fn apply_all(&mut self, event: &EventRecord) {
        for aggregate in &mut self.items {
            if let Err(err) = aggregate.apply(event) {
                tracing::warn!(
                    aggregate = aggregate.id(),
                    event_type = %event.event_type,
                    error = %err,
                    "aggregate apply failed"
                );
            }
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let mut snapshot = StateSnapshot::new();
        for aggregate in &self.items {
            snapshot.insert(aggregate.id().to_string(), Value::Object(aggregate.state()));
        }
        snapshot
    }

    pub fn state_of(&self, aggregate_id: &str) -> Option<Payload> {
        self.items
            .iter()
            .find(|a| a.id() == aggregate_id)
            .map(|a| a.state())
    }
}

#[cfg(test)]
#[path = "tests/aggregate_tests.rs"]
mod tests;
