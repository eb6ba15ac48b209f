//! In-process event bus.
//!
//! Persisted events are routed to typed subscribers in registration order;
//! subscribe-all observers get a notify-only copy of everything first.
//! Handlers never mutate state directly: they return [`Dispatch`] items
//! which the processor feeds back through its work queue.
//!
//! A separate lossy broadcast channel carries transient streaming updates
//! (partial LLM output, progress) that never touch the log.

use crate::aggregate::StateSnapshot;
use crate::command::CommandCatalog;
use crate::event::{EventRecord, Payload};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Follow-up work produced by an event handler.
#[derive(Debug, Clone)]
pub enum Dispatch {
    /// A new event to apply, persist, and publish.
    Event(EventRecord),
    /// A command to execute through the normal pipeline.
    Command { name: String, payload: Payload },
}

pub type EventHandler = Arc<
    dyn Fn(&EventRecord, &StateSnapshot, &CommandCatalog) -> anyhow::Result<Vec<Dispatch>>
        + Send
        + Sync,
>;

/// Notify-only observer; sees every event, cannot produce follow-ups.
pub type EventObserver = Arc<dyn Fn(&EventRecord) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Transient update on the streaming channel.
#[derive(Debug, Clone)]
pub struct StreamingUpdate {
    pub update_type: String,
    pub data: Payload,
}

pub struct EventBus {
    subscribers: RwLock<HashMap<String, Vec<(SubscriptionId, EventHandler)>>>,
    observers: RwLock<Vec<(SubscriptionId, EventObserver)>>,
    next_id: AtomicU64,
    streaming_tx: broadcast::Sender<StreamingUpdate>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (streaming_tx, _) = broadcast::channel(256);
        Self {
            subscribers: RwLock::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            streaming_tx,
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub fn subscribe(&self, event_type: &str, handler: EventHandler) -> SubscriptionId {
        let id = self.next_id();
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers
                .entry(event_type.to_string())
                .or_default()
                .push((id, handler));
        }
        id
    }

    pub fn subscribe_all(&self, observer: EventObserver) -> SubscriptionId {
        let id = self.next_id();
        if let Ok(mut observers) = self.observers.write() {
            observers.push((id, observer));
        }
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            for handlers in subscribers.values_mut() {
                handlers.retain(|(handler_id, _)| *handler_id != id);
            }
        }
        if let Ok(mut observers) = self.observers.write() {
            observers.retain(|(observer_id, _)| *observer_id != id);
        }
    }

    /// Routes one persisted event. Observers run first, then typed handlers
    /// in registration order. A handler error is logged and skipped; the
    /// remaining handlers still run.
    pub fn publish(
        &self,
        event: &EventRecord,
        state: &StateSnapshot,
        catalog: &CommandCatalog,
    ) -> Vec<Dispatch> {
        let observers = self
            .observers
            .read()
            .map(|o| o.clone())
            .unwrap_or_default();
        for (_, observer) in &observers {
            observer(event);
        }

        let handlers = self
            .subscribers
            .read()
            .ok()
            .and_then(|s| s.get(&event.event_type).cloned())
            .unwrap_or_default();

        let mut dispatches = Vec::new();
        for (_, handler) in &handlers {
            match handler(event, state, catalog) {
                Ok(mut follow_ups) => dispatches.append(&mut follow_ups),
                Err(err) => {
                    tracing::warn!(
                        event_type = %event.event_type,
                        error = %err,
                        "event handler failed, skipping"
                    );
                }
            }
        }
        dispatches
    }

    /// Publishes a transient update. Lossy: with no receivers, or with slow
    /// ones, updates are dropped rather than blocking the publisher.
    pub fn publish_streaming(&self, update_type: &str, data: Payload) {
        let _ = self.streaming_tx.send(StreamingUpdate {
            update_type: update_type.to_string(),
            data,
        });
    }

    pub fn subscribe_streaming(&self) -> broadcast::Receiver<StreamingUpdate> {
        self.streaming_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/bus_tests.rs"]
mod tests;
