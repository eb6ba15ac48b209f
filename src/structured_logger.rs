//! Structured JSONL logger for debugging and event reconstruction.
//!
//! This module provides machine-parseable logging with:
//! - Monotonic sequence numbers for ordering
//! - ISO 8601 timestamps with microsecond precision
//! - Session and run IDs for correlation
//! - Structured event data in JSON format

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::event::EventRecord;
use crate::recovery::FaultReport;

/// Structured JSONL logger for debugging and event reconstruction.
pub struct StructuredLogger {
    session_id: String,
    run_id: AtomicU64,
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number (unique across entire session)
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds
    pub ts: String,
    /// Session ID
    pub session_id: String,
    /// Run ID (increments on restart within session)
    pub run_id: u64,
    /// Component that emitted the log
    pub component: String,
    /// Structured event data
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a new structured logger for the given session.
    ///
    /// Logs are written to `<logs_dir>/runtime.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The logs directory cannot be created
    /// - The log file cannot be opened
    pub fn new(session_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("runtime.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            session_id: session_id.to_string(),
            run_id: AtomicU64::new(1),
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    /// Increments the run ID (called when the runtime restarts within a session).
    pub fn increment_run_id(&self) {
        self.run_id.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the next sequence number.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event.
    ///
    /// The event is serialized to JSON and written as a single line.
    /// This method is thread-safe.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            session_id: self.session_id.clone(),
            run_id: self.run_id.load(Ordering::SeqCst),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    /// Logs a command entering the pipeline.
    pub fn log_command(&self, name: &str, payload: &crate::event::Payload) {
        self.log(
            "Dispatch",
            serde_json::json!({
                "type": "Command",
                "command": name,
                "payload": payload
            }),
        );
    }

    /// Logs a persisted event.
    pub fn log_event_record(&self, event: &EventRecord) {
        self.log(
            "Dispatch",
            serde_json::json!({
                "type": "Event",
                "event": event
            }),
        );
    }

    /// Logs a fault captured by the recovery layer.
    pub fn log_fault(&self, fault: &FaultReport) {
        self.log(
            "Recovery",
            serde_json::json!({
                "type": "Fault",
                "fault": fault
            }),
        );
    }

    /// Logs a module lifecycle transition.
    pub fn log_module(&self, module: &str, action: &str, version: u64) {
        self.log(
            "Modules",
            serde_json::json!({
                "type": "ModuleLifecycle",
                "module": module,
                "action": action,
                "version": version
            }),
        );
    }

    /// Returns the path to the log file.
    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Returns the session ID.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
#[path = "tests/structured_logger_tests.rs"]
mod tests;
