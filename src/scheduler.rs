//! Deferred background work.
//!
//! Tasks are scheduled for a wall-clock time and run through the recovery
//! layer. Cancellation is cooperative: a watch channel flips once on
//! shutdown and every task still waiting for its deadline stands down.

use crate::event::{Payload, TimestampUtc};
use crate::recovery::RecoveryManager;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Scheduled,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduledTask {
    pub id: u64,
    pub name: String,
    pub due: TimestampUtc,
    pub status: TaskStatus,
}

pub struct Scheduler {
    recovery: Arc<RecoveryManager>,
    tasks: Arc<Mutex<BTreeMap<u64, ScheduledTask>>>,
    next_id: AtomicU64,
    cancel_tx: watch::Sender<bool>,
}

impl Scheduler {
    pub fn new(recovery: Arc<RecoveryManager>) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            recovery,
            tasks: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            cancel_tx,
        }
    }

    /// Schedules `work` to run at `due`. A deadline in the past runs
    /// immediately. Returns the task id.
    pub fn schedule_at<F>(&self, name: &str, due: TimestampUtc, work: F) -> u64
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task = ScheduledTask {
            id,
            name: name.to_string(),
            due,
            status: TaskStatus::Scheduled,
        };
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(id, task);
        }

        let tasks = Arc::clone(&self.tasks);
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut context = Payload::new();
        context.insert(
            "task".to_string(),
            serde_json::Value::String(name.to_string()),
        );

        let _ = self.recovery.spawn_guarded(name, context, async move {
            let delay = (due.0 - TimestampUtc::now().0)
                .to_std()
                .unwrap_or_default();
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    changed = cancel_rx.changed() => {
                        if changed.is_err() || *cancel_rx.borrow() {
                            set_status(&tasks, id, TaskStatus::Cancelled);
                            return Ok(());
                        }
                    }
                }
            }
            if *cancel_rx.borrow() {
                set_status(&tasks, id, TaskStatus::Cancelled);
                return Ok(());
            }

            set_status(&tasks, id, TaskStatus::Running);
            match work.await {
                Ok(()) => {
                    set_status(&tasks, id, TaskStatus::Completed);
                    Ok(())
                }
                Err(err) => {
                    set_status(&tasks, id, TaskStatus::Failed);
                    Err(err)
                }
            }
        });
        id
    }

    /// Cancels every task still waiting for its deadline. Running tasks
    /// finish on their own.
    pub fn cancel_all(&self) {
        let _ = self.cancel_tx.send(true);
    }

    pub fn status(&self, id: u64) -> Option<TaskStatus> {
        self.tasks
            .lock()
            .ok()
            .and_then(|tasks| tasks.get(&id).map(|task| task.status))
    }

    pub fn tasks(&self) -> Vec<ScheduledTask> {
        self.tasks
            .lock()
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn set_status(tasks: &Arc<Mutex<BTreeMap<u64, ScheduledTask>>>, id: u64, status: TaskStatus) {
    if let Ok(mut tasks) = tasks.lock() {
        if let Some(task) = tasks.get_mut(&id) {
            task.status = status;
        }
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
