use super::*;
use crate::event::Payload;
use serde_json::json;
use tempfile::tempdir;

fn record(aggregate_id: &str, event_type: &str, fields: &[(&str, serde_json::Value)]) -> EventRecord {
    let mut data = Payload::new();
    for (key, value) in fields {
        data.insert((*key).to_string(), value.clone());
    }
    EventRecord::new(aggregate_id, event_type, data)
}

#[test]
fn test_append_then_reload_round_trip() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("events.jsonl");

    let store = FileEventStore::new(path.clone());
    let first = record("groceries", "GroceryItemAdded", &[("item", json!("eggs"))]);
    let second = record("groceries", "GroceryItemAdded", &[("item", json!("bread"))]);
    store.append(&[first.clone(), second.clone()]).unwrap();

    let reopened = FileEventStore::new(path);
    reopened.load().unwrap();
    let events = reopened.events();
    assert_eq!(events, vec![first, second]);
}

#[test]
fn test_missing_file_loads_empty() {
    let dir = tempdir().expect("temp dir");
    let store = FileEventStore::new(dir.path().join("never-written.jsonl"));
    store.load().unwrap();
    assert!(store.events().is_empty());
}

#[test]
fn test_append_only_grows_log() {
    let dir = tempdir().expect("temp dir");
    let store = FileEventStore::new(dir.path().join("events.jsonl"));

    let mut expected = Vec::new();
    for i in 0..5 {
        let event = record("tasks", "TaskCreated", &[("n", json!(i))]);
        expected.push(event.clone());
        store.append(&[event]).unwrap();
        let events = store.events();
        assert_eq!(events.len(), i + 1);
        assert_eq!(events, expected[..=i]);
    }
}

#[test]
fn test_events_for_filters_by_aggregate() {
    let dir = tempdir().expect("temp dir");
    let store = FileEventStore::new(dir.path().join("events.jsonl"));

    store
        .append(&[
            record("groceries", "GroceryItemAdded", &[("item", json!("eggs"))]),
            record("tasks", "TaskCreated", &[("title", json!("laundry"))]),
            record("groceries", "GroceryItemAdded", &[("item", json!("milk"))]),
        ])
        .unwrap();

    let groceries = store.events_for("groceries");
    assert_eq!(groceries.len(), 2);
    assert!(groceries.iter().all(|e| e.aggregate_id == "groceries"));
}

#[test]
fn test_corrupt_line_fails_the_whole_load() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("events.jsonl");

    let store = FileEventStore::new(path.clone());
    store
        .append(&[record("tasks", "TaskCreated", &[("title", json!("ok"))])])
        .unwrap();

    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(&path)
        .unwrap();
    writeln!(file, "{{ not json").unwrap();

    let reopened = FileEventStore::new(path);
    let err = reopened.load().unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
    // Nothing is served from a refused log.
    assert!(reopened.events().is_empty());
}

#[test]
fn test_empty_append_is_a_no_op() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("events.jsonl");
    let store = FileEventStore::new(path.clone());
    store.append(&[]).unwrap();
    assert!(!path.exists());
}
