use super::*;
use serde_json::json;

fn record(event_type: &str, fields: &[(&str, serde_json::Value)]) -> EventRecord {
    let mut data = Payload::new();
    for (key, value) in fields {
        data.insert((*key).to_string(), value.clone());
    }
    EventRecord::new("groceries", event_type, data)
}

#[test]
fn test_generic_aggregate_groups_by_type() {
    let mut agg = GenericAggregate::new(
        "groceries",
        ["GroceryItemAdded".to_string(), "GroceryItemRemoved".to_string()],
    );

    agg.apply(&record("GroceryItemAdded", &[("item", json!("eggs"))]))
        .unwrap();
    agg.apply(&record("GroceryItemAdded", &[("item", json!("milk"))]))
        .unwrap();
    agg.apply(&record("GroceryItemRemoved", &[("item", json!("eggs"))]))
        .unwrap();

    let state = agg.state();
    assert_eq!(
        state["GroceryItemAdded"],
        json!([{ "item": "eggs" }, { "item": "milk" }])
    );
    assert_eq!(agg.latest("GroceryItemAdded"), Some(&json!({ "item": "milk" })));
}

#[test]
fn test_generic_aggregate_ignores_foreign_events() {
    let mut agg = GenericAggregate::new("groceries", ["GroceryItemAdded".to_string()]);
    agg.apply(&record("TaskCreated", &[("title", json!("laundry"))]))
        .unwrap();
    assert!(agg.state().is_empty());
}

#[test]
fn test_replay_is_deterministic() {
    let events = vec![
        record("GroceryItemAdded", &[("item", json!("eggs"))]),
        record("GroceryItemRemoved", &[("item", json!("eggs"))]),
        record("GroceryItemAdded", &[("item", json!("milk"))]),
    ];

    let build = || {
        let mut agg = GenericAggregate::new(
            "groceries",
            [
                "GroceryItemAdded".to_string(),
                "GroceryItemRemoved".to_string(),
            ],
        );
        for event in &events {
            agg.apply(event).unwrap();
        }
        agg.state()
    };

    assert_eq!(build(), build());
}

#[test]
fn test_set_snapshot_keys_by_aggregate_id() {
    let mut set = AggregateSet::default();
    set.register(Box::new(GenericAggregate::new(
        "groceries",
        ["GroceryItemAdded".to_string()],
    )));
    set.register(Box::new(GenericAggregate::new(
        "tasks",
        ["TaskCreated".to_string()],
    )));

    set.apply_all(&record("GroceryItemAdded", &[("item", json!("eggs"))]));

    let snapshot = set.snapshot();
    assert!(snapshot.contains_key("groceries"));
    assert!(snapshot.contains_key("tasks"));
    assert_eq!(
        snapshot["groceries"]["GroceryItemAdded"],
        json!([{ "item": "eggs" }])
    );
    assert_eq!(snapshot["tasks"], json!({}));
}

mod replay_properties {
    use super::*;
    use proptest::prelude::*;

    fn event_strategy() -> impl Strategy<Value = EventRecord> {
        (
            prop_oneof![
                Just("GroceryItemAdded"),
                Just("GroceryItemRemoved"),
                Just("TaskCreated"),
            ],
            "[a-z]{1,8}",
            any::<i64>(),
        )
            .prop_map(|(event_type, item, count)| {
                record(event_type, &[("item", json!(item)), ("count", json!(count))])
            })
    }

    proptest! {
        #[test]
        fn replaying_any_event_sequence_is_deterministic(
            events in prop::collection::vec(event_strategy(), 0..40),
        ) {
            let build = || {
                let mut agg = GenericAggregate::new(
                    "groceries",
                    [
                        "GroceryItemAdded".to_string(),
                        "GroceryItemRemoved".to_string(),
                    ],
                );
                for event in &events {
                    agg.apply(event).unwrap();
                }
                serde_json::to_string(&agg.state()).unwrap()
            };
            prop_assert_eq!(build(), build());
        }

        #[test]
        fn foreign_types_never_leak_into_state(
            events in prop::collection::vec(event_strategy(), 0..40),
        ) {
            let mut agg =
                GenericAggregate::new("groceries", ["GroceryItemAdded".to_string()]);
            for event in &events {
                agg.apply(event).unwrap();
            }
            prop_assert!(agg.state().keys().all(|k| k == "GroceryItemAdded"));
        }
    }
}

#[test]
fn test_registering_same_id_replaces_projection() {
    let mut set = AggregateSet::default();
    set.register(Box::new(GenericAggregate::new(
        "groceries",
        ["GroceryItemAdded".to_string()],
    )));
    set.apply_all(&record("GroceryItemAdded", &[("item", json!("eggs"))]));

    set.register(Box::new(GenericAggregate::new(
        "groceries",
        ["GroceryItemAdded".to_string()],
    )));
    assert_eq!(set.state_of("groceries"), Some(Payload::new()));
}
