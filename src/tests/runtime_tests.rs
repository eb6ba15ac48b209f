use super::*;
use crate::orchestration::orchestrator::RECEIVE_REQUEST;
use crate::orchestration::DirectReply;
use serde_json::json;
use std::path::Path;
use tempfile::tempdir;

const GROCERIES: &str = r#"
name: groceries
category: llm
system_prompt: You maintain the household grocery list.
commands:
  - name: AddGroceryItem
    description: Add an item to the grocery list
    event: GroceryItemAdded
    fields:
      - name: item
        kind: string
"#;

fn test_config(data_dir: &Path) -> RuntimeConfig {
    let modules_dir = data_dir.join("modules");
    std::fs::create_dir_all(&modules_dir).unwrap();
    std::fs::write(modules_dir.join("groceries.yaml"), GROCERIES).unwrap();
    RuntimeConfig {
        data_dir: data_dir.to_path_buf(),
        hot_reload: false,
        ..RuntimeConfig::default()
    }
}

fn request(runtime: &Runtime, id: &str, text: &str) {
    let mut payload = Payload::new();
    payload.insert("request_id".to_string(), json!(id));
    payload.insert("text".to_string(), json!(text));
    runtime.execute(RECEIVE_REQUEST, payload).unwrap();
}

async fn wait_for_event(runtime: &Runtime, event_type: &str) {
    for _ in 0..300 {
        if runtime
            .processor()
            .store()
            .events()
            .iter()
            .any(|e| e.event_type == event_type)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("never saw a {} event", event_type);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bootstrap_answers_a_request_offline() {
    let dir = tempdir().unwrap();
    let runtime = Runtime::bootstrap(test_config(dir.path()), Arc::new(DirectReply)).unwrap();

    request(&runtime, "r-1", "hello");
    wait_for_event(&runtime, "RequestCompleted").await;

    let state = runtime.processor().state_snapshot();
    assert_eq!(state["orchestration"]["agents"]["r-1"]["status"], json!("completed"));
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_module_commands_are_live_after_bootstrap() {
    let dir = tempdir().unwrap();
    let runtime = Runtime::bootstrap(test_config(dir.path()), Arc::new(DirectReply)).unwrap();

    let mut payload = Payload::new();
    payload.insert("item".to_string(), json!("eggs"));
    runtime.execute("AddGroceryItem", payload).unwrap();

    let state = runtime.processor().state_snapshot();
    assert_eq!(
        state["groceries"]["GroceryItemAdded"],
        json!([{ "item": "eggs" }])
    );
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_replays_the_log() {
    let dir = tempdir().unwrap();
    {
        let runtime =
            Runtime::bootstrap(test_config(dir.path()), Arc::new(DirectReply)).unwrap();
        let mut payload = Payload::new();
        payload.insert("item".to_string(), json!("milk"));
        runtime.execute("AddGroceryItem", payload).unwrap();
        runtime.shutdown();
    }

    let runtime = Runtime::bootstrap(test_config(dir.path()), Arc::new(DirectReply)).unwrap();
    let state = runtime.processor().state_snapshot();
    assert_eq!(
        state["groceries"]["GroceryItemAdded"],
        json!([{ "item": "milk" }])
    );
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_command_is_rejected() {
    let dir = tempdir().unwrap();
    let runtime = Runtime::bootstrap(test_config(dir.path()), Arc::new(DirectReply)).unwrap();
    assert!(matches!(
        runtime.execute("NoSuchCommand", Payload::new()),
        Err(CommandError::UnknownCommand { .. })
    ));
    runtime.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_corrupt_log_refuses_to_boot() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(config.event_log_path(), "not json\n").unwrap();
    assert!(Runtime::bootstrap(config, Arc::new(DirectReply)).is_err());
}
