//! Safe execution layer.
//!
//! Background work never runs on a bare `tokio::spawn`: it goes through
//! [`RecoveryManager::spawn_guarded`], which catches panics and errors,
//! turns them into [`FaultReport`]s for registered handlers, and counts
//! repeated faults from the same task name inside a sliding window so a
//! crash loop is visible instead of silent.

use crate::event::{Payload, TimestampUtc};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A captured failure from a guarded task.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FaultReport {
    pub task_name: String,
    pub error: String,
    pub trace: String,
    pub context: Payload,
    pub occurred_at: TimestampUtc,
}

pub type FaultHandler = Arc<dyn Fn(&FaultReport) + Send + Sync>;

/// Tracks guarded tasks and fans faults out to handlers.
pub struct RecoveryManager {
    handlers: RwLock<Vec<FaultHandler>>,
    fault_counts: Mutex<HashMap<String, u32>>,
    window: Duration,
    max_faults: u32,
}

impl RecoveryManager {
    pub fn new(window: Duration, max_faults: u32) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            fault_counts: Mutex::new(HashMap::new()),
            window,
            max_faults,
        }
    }

    /// Registers a fault handler. Handlers run in registration order on the
    /// task's own tokio worker.
    pub fn register_handler(&self, handler: FaultHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(handler);
        }
    }

    /// Spawns `work` with panic and error capture.
    ///
    /// A panic or an `Err` produces a fault report; the spawning side never
    /// observes either. The handle completes once the work (and any fault
    /// fan-out) is done.
    pub fn spawn_guarded<F>(
        self: &Arc<Self>,
        task_name: &str,
        context: Payload,
        work: F,
    ) -> JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let task_name = task_name.to_string();
        tokio::spawn(async move {
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    manager.report(&task_name, format!("{:#}", err), String::new(), context);
                }
                Err(panic) => {
                    let error = panic_message(panic.as_ref());
                    let trace = std::backtrace::Backtrace::force_capture().to_string();
                    manager.report(&task_name, error, trace, context);
                }
            }
        })
    }

    fn report(&self, task_name: &str, error: String, trace: String, context: Payload) {
        let report = FaultReport {
            task_name: task_name.to_string(),
            error,
            trace,
            context,
            occurred_at: TimestampUtc::now(),
        };

        let handlers = self
            .handlers
            .read()
            .map(|h| h.clone())
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::error!(task = %report.task_name, error = %report.error, "unhandled fault");
        } else {
            for handler in &handlers {
                handler(&report);
            }
        }

        self.track_fault(task_name);
    }

    /// Counts faults per task name inside the current window bucket. Going
    /// over the threshold logs a systemic-failure warning.
    fn track_fault(&self, task_name: &str) {
        let bucket = TimestampUtc::now().0.timestamp() / self.window.as_secs().max(1) as i64;
        let key = format!("{}@{}", task_name, bucket);

        let Ok(mut counts) = self.fault_counts.lock() else {
            return;
        };
        let count = counts.entry(key).or_insert(0);
        *count += 1;
        if *count > self.max_faults {
            tracing::warn!(
                task = task_name,
                faults = *count,
                window_secs = self.window.as_secs(),
                "repeated faults, possible systemic failure"
            );
        }

        // Old buckets accumulate one entry per window; purge occasionally.
        if counts.len() > 1024 {
            counts.retain(|key, _| {
                key.rsplit_once('@')
                    .and_then(|(_, b)| b.parse::<i64>().ok())
                    .map(|b| b >= bucket - 1)
                    .unwrap_or(false)
            });
        }
    }

    /// Fault count for a task in the current window, used by health checks.
    pub fn recent_faults(&self, task_name: &str) -> u32 {
        let bucket = TimestampUtc::now().0.timestamp() / self.window.as_secs().max(1) as i64;
        let key = format!("{}@{}", task_name, bucket);
        self.fault_counts
            .lock()
            .map(|counts| counts.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
#[path = "tests/recovery_tests.rs"]
mod tests;
