//! Core event model.
//!
//! Every state change in the runtime is an [`EventRecord`]: a self-describing,
//! append-only record whose payload is an ordered JSON map. Typed event enums
//! (see `orchestration::events`) round-trip through records via the tagged
//! codec in this module, and the [`EventTypeRegistry`] lets stores refuse to
//! load types nothing has registered.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Ordered JSON object used for event payloads and command inputs.
pub type Payload = serde_json::Map<String, Value>;

/// UTC timestamp newtype shared by events, faults, and log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimestampUtc(pub DateTime<Utc>);

impl TimestampUtc {
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl Display for TimestampUtc {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%dT%H:%M:%S%.6fZ"))
    }
}

/// A single persisted event.
///
/// Records are self-describing: the `event_type` travels with the payload, so
/// the log can hold events from modules that did not exist when the runtime
/// shipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub data: Payload,
    pub occurred_at: TimestampUtc,
    pub version: u32,
}

impl EventRecord {
    pub fn new(aggregate_id: &str, event_type: &str, data: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            aggregate_id: aggregate_id.to_string(),
            event_type: event_type.to_string(),
            data,
            occurred_at: TimestampUtc::now(),
            version: 1,
        }
    }

    /// Convenience accessor for a string field of the payload.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.data.get(name).and_then(Value::as_str)
    }
}

/// Errors converting between typed events and [`EventRecord`]s.
#[derive(Debug, Clone)]
pub enum EventCodecError {
    /// The typed event did not serialize to a JSON object.
    NotAnObject,
    /// The serialized form is missing the `event_type` tag.
    MissingTag,
    /// The record's type is not registered with any decoder.
    UnknownType { event_type: String },
    /// serde failure, carried as text.
    Serde { message: String },
}

impl Display for EventCodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject => write!(f, "typed event is not a JSON object"),
            Self::MissingTag => write!(f, "serialized event is missing the event_type tag"),
            Self::UnknownType { event_type } => {
                write!(f, "unregistered event type: {}", event_type)
            }
            Self::Serde { message } => write!(f, "event (de)serialization failed: {}", message),
        }
    }
}

impl std::error::Error for EventCodecError {}

/// Serializes an internally-tagged typed event into a record.
///
/// The `event_type` tag is lifted out of the payload into the record header;
/// the remaining fields become the ordered payload map.
pub fn record_from_tagged<T: Serialize>(
    aggregate_id: &str,
    event: &T,
) -> Result<EventRecord, EventCodecError> {
    let value = serde_json::to_value(event).map_err(|e| EventCodecError::Serde {
        message: e.to_string(),
    })?;
    let Value::Object(mut data) = value else {
        return Err(EventCodecError::NotAnObject);
    };
    let tag = match data.shift_remove("event_type") {
        Some(Value::String(tag)) => tag,
        _ => return Err(EventCodecError::MissingTag),
    };
    Ok(EventRecord::new(aggregate_id, &tag, data))
}

/// Rebuilds a typed event from a record by reinserting the tag.
pub fn tagged_from_record<T: DeserializeOwned>(record: &EventRecord) -> Result<T, EventCodecError> {
    let mut data = Payload::new();
    data.insert(
        "event_type".to_string(),
        Value::String(record.event_type.clone()),
    );
    for (key, value) in &record.data {
        data.insert(key.clone(), value.clone());
    }
    serde_json::from_value(Value::Object(data)).map_err(|e| EventCodecError::Serde {
        message: e.to_string(),
    })
}

/// Decode check invoked when a store loads a record of a given type.
pub type DecodeCheck = Arc<dyn Fn(&EventRecord) -> Result<(), EventCodecError> + Send + Sync>;

/// Registry of known event types.
///
/// Typed subsystems register a round-trip check; manifest modules register
/// their declared event types as passthrough. Loading a record whose type was
/// never registered is an error, which keeps indexed stores fail-closed.
#[derive(Default)]
pub struct EventTypeRegistry {
    checks: RwLock<HashMap<String, DecodeCheck>>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: &str, check: DecodeCheck) {
        if let Ok(mut checks) = self.checks.write() {
            checks.insert(event_type.to_string(), check);
        }
    }

    /// Registers a type whose payload is accepted as-is.
    pub fn register_passthrough(&self, event_type: &str) {
        self.register(event_type, Arc::new(|_| Ok(())));
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.checks
            .read()
            .map(|checks| checks.contains_key(event_type))
            .unwrap_or(false)
    }

    /// Validates a record against its registered decode check.
    pub fn check(&self, record: &EventRecord) -> Result<(), EventCodecError> {
        let check = self
            .checks
            .read()
            .ok()
            .and_then(|checks| checks.get(&record.event_type).cloned());
        match check {
            Some(check) => check(record),
            None => Err(EventCodecError::UnknownType {
                event_type: record.event_type.clone(),
            }),
        }
    }
}

#[cfg(test)]
#[path = "tests/event_tests.rs"]
mod tests;
