//! Indexed sqlite event store.
//!
//! Same append-only contract as the file log: the full history is mirrored
//! in memory by `load`, which is fail-closed — a row that cannot be decoded
//! or whose type is unregistered refuses the whole store. A migration
//! helper moves an existing JSONL log into sqlite in one transaction.

use crate::event::{EventRecord, EventTypeRegistry, Payload, TimestampUtc};
use crate::event_store::{EventStore, FileEventStore, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Sqlite-backed event store.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
    types: Arc<EventTypeRegistry>,
    cache: Mutex<Vec<EventRecord>>,
}

impl SqliteEventStore {
    /// Opens (or creates) the database and ensures the schema.
    pub fn open(path: &Path, types: Arc<EventTypeRegistry>) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(sql_err)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            types,
            cache: Mutex::new(Vec::new()),
        })
    }

    /// In-memory database, used by tests and the migration helper.
    pub fn open_in_memory(types: Arc<EventTypeRegistry>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            types,
            cache: Mutex::new(Vec::new()),
        })
    }

    fn read_all(&self) -> Result<Vec<EventRecord>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Io {
            message: "event store connection poisoned".to_string(),
        })?;
        let mut stmt = conn
            .prepare(
                "SELECT id, aggregate_id, event_type, data, occurred_at, version
                 FROM events ORDER BY seq",
            )
            .map_err(sql_err)?;
        let rows = stmt.query_map([], row_to_record).map_err(sql_err)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.map_err(|e| StoreError::Corrupt {
                message: e.to_string(),
            })?);
        }
        Ok(records)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            seq          INTEGER PRIMARY KEY AUTOINCREMENT,
            id           TEXT NOT NULL UNIQUE,
            aggregate_id TEXT NOT NULL,
            event_type   TEXT NOT NULL,
            data         TEXT NOT NULL,
            occurred_at  TEXT NOT NULL,
            version      INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_aggregate
            ON events(aggregate_id, seq);",
    )
    .map_err(sql_err)
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Io {
        message: e.to_string(),
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRecord> {
    let data_text: String = row.get(3)?;
    let occurred_text: String = row.get(4)?;
    let data: Payload = serde_json::from_str(&data_text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let occurred: DateTime<Utc> = occurred_text.parse().map_err(
        |e: chrono::ParseError| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        },
    )?;
    Ok(EventRecord {
        id: row.get(0)?,
        aggregate_id: row.get(1)?,
        event_type: row.get(2)?,
        data,
        occurred_at: TimestampUtc(occurred),
        version: row.get(5)?,
    })
}

impl EventStore for SqliteEventStore {
    fn append(&self, events: &[EventRecord]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().map_err(|_| StoreError::Io {
            message: "event store connection poisoned".to_string(),
        })?;
        let tx = conn.transaction().map_err(sql_err)?;
        for event in events {
            let data = serde_json::to_string(&event.data).map_err(|e| StoreError::Corrupt {
                message: e.to_string(),
            })?;
            tx.execute(
                "INSERT INTO events (id, aggregate_id, event_type, data, occurred_at, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id,
                    event.aggregate_id,
                    event.event_type,
                    data,
                    event.occurred_at.0.to_rfc3339(),
                    event.version,
                ],
            )
            .map_err(sql_err)?;
        }
        tx.commit().map_err(sql_err)?;

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

    /// Reads and validates every stored record against the type registry.
    /// Unknown types and undecodable rows refuse the whole store; nothing is
    /// served until a load succeeds.
    fn load(&self) -> Result<(), StoreError> {
        let records = self.read_all()?;
        for record in &records {
            if !self.types.contains(&record.event_type) {
                return Err(StoreError::UnknownEventType {
                    event_type: record.event_type.clone(),
                });
            }
            self.types
                .check(record)
                .map_err(|e| StoreError::Corrupt {
                    message: e.to_string(),
                })?;
        }
        if let Ok(mut cache) = self.cache.lock() {
            *cache = records;
        }
        Ok(())
    }
}

/// Copies a JSONL log into a sqlite store. The source log must load cleanly;
/// records keep their ids and order.
pub fn migrate_file_to_sqlite(
    source: &FileEventStore,
    target: &SqliteEventStore,
) -> Result<usize, StoreError> {
    source.load()?;
    let records = source.events();
    target.append(&records)?;
    Ok(records.len())
}

#[cfg(test)]
#[path = "tests/sqlite_store_tests.rs"]
mod tests;
