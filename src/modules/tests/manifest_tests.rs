use super::*;
use crate::event::Payload;
use serde_json::json;

const GROCERIES: &str = r#"
name: groceries
category: llm
system_prompt: You maintain the household grocery list.
agent_model: qwen3
commands:
  - name: AddGroceryItem
    description: Add an item to the grocery list
    event: GroceryItemAdded
    fields:
      - name: item
        kind: string
        description: What to add
      - name: quantity
        kind: integer
        required: false
"#;

#[test]
fn test_compile_valid_manifest() {
    let module = compile_manifest_str(GROCERIES).unwrap();
    assert_eq!(module.name(), "groceries");
    assert_eq!(module.category(), ModuleCategory::Llm);
    assert_eq!(module.agent_model().as_deref(), Some("qwen3"));
    assert_eq!(module.declared_events(), vec!["GroceryItemAdded"]);

    let commands = module.commands();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].name, "AddGroceryItem");
    assert_eq!(commands[0].shape.fields.len(), 2);
}

#[test]
fn test_compiled_handler_validates_and_emits() {
    let module = compile_manifest_str(GROCERIES).unwrap();
    let command = module.commands().remove(0);

    let mut input = Payload::new();
    input.insert("item".to_string(), json!("eggs"));
    input.insert("quantity".to_string(), json!(12));

    let events = (command.handler)(&input, &Default::default()).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].aggregate_id, "groceries");
    assert_eq!(events[0].event_type, "GroceryItemAdded");
    assert_eq!(events[0].data.get("item"), Some(&json!("eggs")));
}

#[test]
fn test_compiled_handler_rejects_bad_input() {
    let module = compile_manifest_str(GROCERIES).unwrap();
    let command = module.commands().remove(0);

    let mut input = Payload::new();
    input.insert("quantity".to_string(), json!(12));

    let err = (command.handler)(&input, &Default::default()).unwrap_err();
    assert!(err.to_string().contains("item"));
}

#[test]
fn test_malformed_yaml_is_a_parse_error() {
    let err = compile_manifest_str("name: [unclosed").unwrap_err();
    assert!(matches!(err, ManifestError::Parse { .. }));
}

#[test]
fn test_empty_name_is_invalid() {
    let err = compile_manifest_str("name: \"\"\ncommands: []").unwrap_err();
    assert!(matches!(err, ManifestError::Invalid { .. }));
}

#[test]
fn test_duplicate_command_names_rejected() {
    let text = r#"
name: dup
commands:
  - name: DoThing
    event: ThingDone
  - name: DoThing
    event: ThingRedone
"#;
    let err = compile_manifest_str(text).unwrap_err();
    assert!(matches!(err, ManifestError::Invalid { .. }));
}

#[test]
fn test_object_field_requires_nested_shape() {
    let text = r#"
name: shapes
commands:
  - name: Record
    event: Recorded
    fields:
      - name: details
        kind: object
"#;
    let err = compile_manifest_str(text).unwrap_err();
    assert!(matches!(err, ManifestError::Invalid { .. }));
}

#[test]
fn test_command_without_event_is_invalid() {
    let text = r#"
name: silent
commands:
  - name: DoThing
    event: ""
"#;
    let err = compile_manifest_str(text).unwrap_err();
    assert!(matches!(err, ManifestError::Invalid { .. }));
}

#[test]
fn test_reactions_parsed() {
    let text = r#"
name: pantry
category: system
commands:
  - name: SyncPantry
    event: PantrySynced
reactions:
  - on: GroceryItemAdded
    command: SyncPantry
"#;
    let module = compile_manifest_str(text).unwrap();
    assert_eq!(module.category(), ModuleCategory::System);
    let reactions = module.reactions();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].on, "GroceryItemAdded");
    assert_eq!(reactions[0].command, "SyncPantry");
}

#[test]
fn test_aggregate_projects_declared_events() {
    let module = compile_manifest_str(GROCERIES).unwrap();
    let mut aggregate = module.aggregate().unwrap();

    let mut data = Payload::new();
    data.insert("item".to_string(), json!("eggs"));
    aggregate
        .apply(&EventRecord::new("groceries", "GroceryItemAdded", data))
        .unwrap();
    assert_eq!(
        aggregate.state()["GroceryItemAdded"],
        json!([{ "item": "eggs" }])
    );
}
