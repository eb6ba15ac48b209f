use super::*;
use crate::bus::EventBus;
use crate::event::EventTypeRegistry;
use crate::event_store::{EventStore, FileEventStore};
use crate::modules::manifest::compile_manifest_str;
use crate::orchestration::llm::scripted::ScriptedLlm;
use crate::orchestration::llm::{LlmReply, ToolCallRequest};
use crate::orchestration::OrchestrationAggregate;
use serde_json::json;
use std::time::Duration;
use tempfile::tempdir;

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
"#;

struct Harness {
    _dir: tempfile::TempDir,
    processor: Arc<EventProcessor>,
    llm: Arc<ScriptedLlm>,
    _orchestrator: Arc<RequestOrchestrator>,
}

fn harness(replies: Vec<LlmReply>) -> Harness {
    let dir = tempdir().expect("temp dir");
    let store = Arc::new(FileEventStore::new(dir.path().join("events.jsonl")));
    store.load().unwrap();
    let bus = Arc::new(EventBus::new());
    let processor = Arc::new(EventProcessor::new(store, bus, 16));
    processor.register_aggregate(Box::new(OrchestrationAggregate::new(20)));

    let registry = Arc::new(ModuleRegistry::new(
        Arc::clone(&processor),
        Arc::new(EventTypeRegistry::new()),
    ));
    registry.register(Arc::new(compile_manifest_str(GROCERIES).unwrap()), None);

    let recovery = Arc::new(RecoveryManager::new(Duration::from_secs(60), 5));
    let llm = Arc::new(ScriptedLlm::new(replies));
    let orchestrator = RequestOrchestrator::new(
        Arc::clone(&processor),
        registry,
        recovery,
        Arc::clone(&llm) as Arc<dyn LlmClient>,
        "house-default".to_string(),
    );
    orchestrator.wire();

    Harness {
        _dir: dir,
        processor,
        llm,
        _orchestrator: orchestrator,
    }
}

fn receive(processor: &Arc<EventProcessor>, request_id: &str, text: &str) {
    let mut payload = Payload::new();
    payload.insert("request_id".to_string(), json!(request_id));
    payload.insert("text".to_string(), json!(text));
    processor.execute_command(RECEIVE_REQUEST, payload).unwrap();
}

fn agent_status(processor: &Arc<EventProcessor>, request_id: &str) -> Option<String> {
    let state = processor.state_snapshot();
    state
        .get(ORCHESTRATION)?
        .get("agents")?
        .get(request_id)?
        .get("status")?
        .as_str()
        .map(str::to_string)
}

async fn wait_for_terminal(processor: &Arc<EventProcessor>, request_id: &str) {
    for _ in 0..300 {
        if matches!(
            agent_status(processor, request_id).as_deref(),
            Some("completed") | Some("failed")
        ) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("request {} never reached a terminal state", request_id);
}

fn event_types(processor: &Arc<EventProcessor>) -> Vec<String> {
    processor
        .store()
        .events()
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

fn delegate(query: &str) -> LlmReply {
    let mut arguments = Payload::new();
    arguments.insert("query".to_string(), json!(query));
    LlmReply {
        content: String::new(),
        tool_calls: vec![ToolCallRequest {
            function: "groceries".to_string(),
            arguments,
        }],
    }
}

fn tool_calls(items: &[&str]) -> LlmReply {
    LlmReply {
        content: String::new(),
        tool_calls: items
            .iter()
            .map(|item| {
                let mut arguments = Payload::new();
                arguments.insert("item".to_string(), json!(item));
                ToolCallRequest {
                    function: "AddGroceryItem".to_string(),
                    arguments,
                }
            })
            .collect(),
    }
}

fn answer(text: &str) -> LlmReply {
    LlmReply {
        content: text.to_string(),
        tool_calls: Vec::new(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_direct_answer_round_trip() {
    let h = harness(vec![answer("Hello there!")]);
    receive(&h.processor, "r-1", "hi");
    wait_for_terminal(&h.processor, "r-1").await;

    let types = event_types(&h.processor);
    assert_eq!(
        types,
        vec![
            "UserRequestReceived",
            "ToolCallsConfigured",
            "RequestCompleted"
        ]
    );
    assert_eq!(agent_status(&h.processor, "r-1").as_deref(), Some("completed"));

    let state = h.processor.state_snapshot();
    let chat = state[ORCHESTRATION]["chat_context"].as_array().unwrap();
    let last = chat.last().unwrap();
    assert_eq!(last["role"], json!("assistant"));
    assert_eq!(last["content"], json!("Hello there!"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_tool_call_fan_out_and_summary() {
    let h = harness(vec![
        delegate("add eggs and milk"),
        tool_calls(&["eggs", "milk"]),
        answer("Added eggs and milk."),
    ]);
    receive(&h.processor, "r-1", "add eggs and milk to the list");
    wait_for_terminal(&h.processor, "r-1").await;

    let types = event_types(&h.processor);
    let count = |t: &str| types.iter().filter(|x| x.as_str() == t).count();
    assert_eq!(count("ToolCallRequestPlaced"), 2);
    assert_eq!(count("ToolCallStarted"), 2);
    assert_eq!(count("ToolCallCompleted"), 2);
    assert_eq!(count("GroceryItemAdded"), 2);
    assert_eq!(count("AgentSummarizing"), 1);
    assert_eq!(count("RequestCompleted"), 1);

    let state = h.processor.state_snapshot();
    assert_eq!(
        state["groceries"]["GroceryItemAdded"],
        json!([{ "item": "eggs" }, { "item": "milk" }])
    );
    // Every tool call resolved.
    assert_eq!(state[ORCHESTRATION]["pending"], json!({}));
    assert_eq!(agent_status(&h.processor, "r-1").as_deref(), Some("completed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_decision_error_fails_the_request() {
    // No scripted replies: the first chat call errors out.
    let h = harness(Vec::new());
    receive(&h.processor, "r-1", "hi");
    wait_for_terminal(&h.processor, "r-1").await;

    assert_eq!(agent_status(&h.processor, "r-1").as_deref(), Some("failed"));
    let types = event_types(&h.processor);
    assert!(types.iter().any(|t| t == "AgentExecutionFailed"));
    assert!(!types.iter().any(|t| t == "RequestCompleted"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_agent_module_fails_the_request() {
    let mut arguments = Payload::new();
    arguments.insert("query".to_string(), json!("do something"));
    let h = harness(vec![LlmReply {
        content: String::new(),
        tool_calls: vec![ToolCallRequest {
            function: "no-such-module".to_string(),
            arguments,
        }],
    }]);
    receive(&h.processor, "r-1", "hi");
    wait_for_terminal(&h.processor, "r-1").await;

    assert_eq!(agent_status(&h.processor, "r-1").as_deref(), Some("failed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_tool_call_still_completes_request() {
    // Second reply asks for a tool call with a missing required field.
    let h = harness(vec![
        delegate("add something"),
        LlmReply {
            content: String::new(),
            tool_calls: vec![ToolCallRequest {
                function: "AddGroceryItem".to_string(),
                arguments: Payload::new(),
            }],
        },
        answer("I could not add that item."),
    ]);
    receive(&h.processor, "r-1", "add ???");
    wait_for_terminal(&h.processor, "r-1").await;

    let types = event_types(&h.processor);
    assert!(types.iter().any(|t| t == "ToolCallFailed"));
    assert!(!types.iter().any(|t| t == "GroceryItemAdded"));
    assert_eq!(
        types.iter().filter(|t| t.as_str() == "RequestCompleted").count(),
        1
    );
    assert_eq!(agent_status(&h.processor, "r-1").as_deref(), Some("completed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_model_selection_per_round_trip() {
    let h = harness(vec![
        delegate("add eggs"),
        tool_calls(&["eggs"]),
        answer("Added eggs."),
    ]);
    receive(&h.processor, "r-1", "add eggs to the list");
    wait_for_terminal(&h.processor, "r-1").await;

    let calls = h.llm.calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    // Delegation uses the configured default; the module round trips use
    // the model its manifest declares.
    assert_eq!(calls[0].2.as_deref(), Some("house-default"));
    assert_eq!(calls[1].2.as_deref(), Some("qwen3"));
    assert_eq!(calls[2].2.as_deref(), Some("qwen3"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_answers_without_tools() {
    // The module agent replies with content instead of tool calls; the
    // request finalizes directly, no summarizing pass.
    let h = harness(vec![
        delegate("what's on the list?"),
        answer("The list is empty."),
    ]);
    receive(&h.processor, "r-1", "what's on the list?");
    wait_for_terminal(&h.processor, "r-1").await;

    let types = event_types(&h.processor);
    assert!(!types.iter().any(|t| t == "AgentSummarizing"));
    assert_eq!(
        types.iter().filter(|t| t.as_str() == "RequestCompleted").count(),
        1
    );
}
