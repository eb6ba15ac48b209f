//! JSONL event log.
//!
//! One JSON object per line, appended under an exclusive file lock and
//! fsynced before the append returns. Loading takes a shared lock and is
//! fail-closed: one malformed line refuses the whole log.

use crate::event::EventRecord;
use crate::event_store::{EventStore, StoreError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::PathBuf;
use std::sync::Mutex;

/// File-backed event store. The full history is mirrored in memory so that
/// reads never touch disk after `load`.
pub struct FileEventStore {
    log_path: PathBuf,
    cache: Mutex<Vec<EventRecord>>,
}

impl FileEventStore {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            cache: Mutex::new(Vec::new()),
        }
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    fn read_all(&self) -> Result<Vec<EventRecord>, StoreError> {
        let file = match File::open(&self.log_path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        file.lock_shared().map_err(StoreError::from)?;

        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(StoreError::from)?;
            if line.trim().is_empty() {
                continue;
            }
            let record: EventRecord =
                serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
                    message: format!("line {}: {}", line_no + 1, e),
                })?;
            records.push(record);
        }
        Ok(records)
    }
}

impl EventStore for FileEventStore {
    fn append(&self, events: &[EventRecord]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.lock_exclusive().map_err(StoreError::from)?;

        for event in events {
            let line = serde_json::to_string(event).map_err(|e| StoreError::Corrupt {
                message: e.to_string(),
            })?;
            writeln!(file, "{}", line)?;
        }

        file.flush()?;
        file.sync_all()?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.extend_from_slice(events);
        }
        Ok(())
    }

    fn events(&self) -> Vec<EventRecord> {
        self.cache.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn events_for(&self, aggregate_id: &str) -> Vec<EventRecord> {
        self.cache
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|r| r.aggregate_id == aggregate_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn load(&self) -> Result<(), StoreError> {
        let records = self.read_all()?;
        if let Ok(mut cache) = self.cache.lock() {
            *cache = records;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/file_store_tests.rs"]
mod tests;
