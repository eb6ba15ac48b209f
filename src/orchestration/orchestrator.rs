//! Command handlers and subscriptions for the request lifecycle.
//!
//! Handlers stay synchronous; the two model round trips (agent decision,
//! final summary) run as guarded background tasks that come back through
//! `ResolveAgentDecision` / `FinalizeRequest`. Tool execution itself is
//! synchronous module code and runs inside the dispatch batch.

use crate::aggregate::StateSnapshot;
use crate::bus::Dispatch;
use crate::chat::Role;
use crate::event::{Payload, TimestampUtc};
use crate::modules::{Module, ModuleRegistry};
use crate::orchestration::events::{OrchestrationEvent, ORCHESTRATION};
use crate::orchestration::llm::{ChatTurn, LlmClient, ToolSpec};
use crate::processor::EventProcessor;
use crate::recovery::RecoveryManager;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

pub const RECEIVE_REQUEST: &str = "ReceiveRequest";
pub const RESOLVE_AGENT_DECISION: &str = "ResolveAgentDecision";
pub const PLACE_TOOL_CALLS: &str = "PlaceToolCalls";
pub const EXECUTE_TOOL_CALL: &str = "ExecuteToolCall";
pub const COMPLETE_REQUEST: &str = "CompleteRequest";
pub const FINALIZE_REQUEST: &str = "FinalizeRequest";
pub const FAIL_AGENT: &str = "FailAgent";

pub struct RequestOrchestrator {
    processor: Arc<EventProcessor>,
    registry: Arc<ModuleRegistry>,
    recovery: Arc<RecoveryManager>,
    llm: Arc<dyn LlmClient>,
    /// Model used when the chosen module does not declare one; also drives
    /// the delegation and summary round trips.
    default_model: String,
}

impl RequestOrchestrator {
    pub fn new(
        processor: Arc<EventProcessor>,
        registry: Arc<ModuleRegistry>,
        recovery: Arc<RecoveryManager>,
        llm: Arc<dyn LlmClient>,
        default_model: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            processor,
            registry,
            recovery,
            llm,
            default_model,
        })
    }

    /// Installs every orchestration command and subscription.
    pub fn wire(self: &Arc<Self>) {
        self.wire_receive_request();
        self.wire_resolve_agent_decision();
        self.wire_place_tool_calls();
        self.wire_execute_tool_call();
        self.wire_complete_request();
        self.wire_finalize_request();
        self.wire_fail_agent();
        self.wire_decision_trigger();
        self.wire_agent_call_trigger();
        self.wire_tool_execution_trigger();
        self.wire_completion_triggers();
    }

    fn wire_receive_request(self: &Arc<Self>) {
        let registry = Arc::clone(&self.registry);
        self.processor.register_command(
            RECEIVE_REQUEST,
            Arc::new(move |payload, _| {
                let text = require_str(payload, "text")?;
                let request_id = payload
                    .get("request_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                let tools: Vec<String> = registry
                    .llm_modules()
                    .iter()
                    .map(|m| m.name().to_string())
                    .collect();
                Ok(vec![
                    OrchestrationEvent::UserRequestReceived {
                        request_id: request_id.clone(),
                        text: text.to_string(),
                        occurred_at: TimestampUtc::now(),
                    }
                    .into_record()?,
                    OrchestrationEvent::ToolCallsConfigured {
                        request_id,
                        tools,
                        occurred_at: TimestampUtc::now(),
                    }
                    .into_record()?,
                ])
            }),
        );
    }

    /// Background decision result re-enters here. The payload carries either
    /// a direct `response_text` or the chosen `agent_name` and `query`.
    fn wire_resolve_agent_decision(self: &Arc<Self>) {
        let registry = Arc::clone(&self.registry);
        let default_model = self.default_model.clone();
        self.processor.register_command(
            RESOLVE_AGENT_DECISION,
            Arc::new(move |payload, state| {
                let request_id = require_str(payload, "request_id")?;
                if agent_is_terminal(state, request_id) {
                    return Ok(Vec::new());
                }
                if let Some(response) = payload.get("response_text").and_then(Value::as_str) {
                    return Ok(vec![OrchestrationEvent::RequestCompleted {
                        request_id: request_id.to_string(),
                        response_text: response.to_string(),
                        occurred_at: TimestampUtc::now(),
                    }
                    .into_record()?]);
                }

                let agent_name = require_str(payload, "agent_name")?;
                let query = payload
                    .get("query")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                match registry.module(agent_name) {
                    Some(module) => Ok(vec![OrchestrationEvent::AgentCallDecided {
                        request_id: request_id.to_string(),
                        agent_name: agent_name.to_string(),
                        model: module
                            .agent_model()
                            .or_else(|| Some(default_model.clone())),
                        query: query.to_string(),
                        occurred_at: TimestampUtc::now(),
                    }
                    .into_record()?]),
                    None => Ok(vec![OrchestrationEvent::AgentExecutionFailed {
                        request_id: request_id.to_string(),
                        agent_name: agent_name.to_string(),
                        error: format!("module {} is not available", agent_name),
                        occurred_at: TimestampUtc::now(),
                    }
                    .into_record()?]),
                }
            }),
        );
    }

    fn wire_place_tool_calls(self: &Arc<Self>) {
        self.processor.register_command(
            PLACE_TOOL_CALLS,
            Arc::new(move |payload, state| {
                let request_id = require_str(payload, "request_id")?;
                if agent_is_terminal(state, request_id) {
                    return Ok(Vec::new());
                }
                let calls = payload
                    .get("tool_calls")
                    .and_then(Value::as_array)
                    .ok_or_else(|| anyhow::anyhow!("tool_calls list missing"))?;

                let mut events = Vec::new();
                for call in calls {
                    let function = call
                        .get("function")
                        .and_then(Value::as_str)
                        .ok_or_else(|| anyhow::anyhow!("tool call without function"))?;
                    let arguments = call
                        .get("arguments")
                        .and_then(Value::as_object)
                        .cloned()
                        .unwrap_or_default();
                    events.push(
                        OrchestrationEvent::ToolCallRequestPlaced {
                            request_id: request_id.to_string(),
                            tool_call_id: Uuid::new_v4().to_string(),
                            function: function.to_string(),
                            arguments,
                            occurred_at: TimestampUtc::now(),
                        }
                        .into_record()?,
                    );
                }
                Ok(events)
            }),
        );
    }

    /// Runs the module command behind a tool call, synchronously. Emits
    /// Started, then the module's own events, then Completed or Failed.
    fn wire_execute_tool_call(self: &Arc<Self>) {
        let registry = Arc::clone(&self.registry);
        self.processor.register_command(
            EXECUTE_TOOL_CALL,
            Arc::new(move |payload, state| {
                let request_id = require_str(payload, "request_id")?;
                let tool_call_id = require_str(payload, "tool_call_id")?;
                let function = require_str(payload, "function")?;
                let arguments = payload
                    .get("arguments")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();

                let mut events = vec![OrchestrationEvent::ToolCallStarted {
                    request_id: request_id.to_string(),
                    tool_call_id: tool_call_id.to_string(),
                    function: function.to_string(),
                    occurred_at: TimestampUtc::now(),
                }
                .into_record()?];

                match invoke_module_command(&registry, function, &arguments, state) {
                    Ok(module_events) => {
                        let mut results = Payload::new();
                        results.insert(
                            "emitted".to_string(),
                            Value::Array(
                                module_events
                                    .iter()
                                    .map(|e| Value::String(e.event_type.clone()))
                                    .collect(),
                            ),
                        );
                        events.extend(module_events);
                        events.push(
                            OrchestrationEvent::ToolCallCompleted {
                                request_id: request_id.to_string(),
                                tool_call_id: tool_call_id.to_string(),
                                function: function.to_string(),
                                results,
                                occurred_at: TimestampUtc::now(),
                            }
                            .into_record()?,
                        );
                    }
                    Err(err) => {
                        events.push(
                            OrchestrationEvent::ToolCallFailed {
                                request_id: request_id.to_string(),
                                tool_call_id: tool_call_id.to_string(),
                                function: function.to_string(),
                                error: format!("{:#}", err),
                                occurred_at: TimestampUtc::now(),
                            }
                            .into_record()?,
                        );
                    }
                }
                Ok(events)
            }),
        );
    }

    /// No-op while tool calls are pending. Once the pending set drains,
    /// emits AgentSummarizing and launches the summary round trip.
    fn wire_complete_request(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        self.processor.register_command(
            COMPLETE_REQUEST,
            Arc::new(move |payload, state| {
                let request_id = require_str(payload, "request_id")?;
                if pending_count(state, request_id) > 0 {
                    return Ok(Vec::new());
                }
                if agent_is_terminal(state, request_id) || agent_is_summarizing(state, request_id) {
                    return Ok(Vec::new());
                }
                orchestrator.spawn_summary(request_id);
                Ok(vec![OrchestrationEvent::AgentSummarizing {
                    request_id: request_id.to_string(),
                    occurred_at: TimestampUtc::now(),
                }
                .into_record()?])
            }),
        );
    }

    fn wire_finalize_request(self: &Arc<Self>) {
        self.processor.register_command(
            FINALIZE_REQUEST,
            Arc::new(move |payload, state| {
                let request_id = require_str(payload, "request_id")?;
                if agent_is_terminal(state, request_id) {
                    return Ok(Vec::new());
                }
                let response = require_str(payload, "response_text")?;
                Ok(vec![OrchestrationEvent::RequestCompleted {
                    request_id: request_id.to_string(),
                    response_text: response.to_string(),
                    occurred_at: TimestampUtc::now(),
                }
                .into_record()?])
            }),
        );
    }

    fn wire_fail_agent(self: &Arc<Self>) {
        self.processor.register_command(
            FAIL_AGENT,
            Arc::new(move |payload, state| {
                let request_id = require_str(payload, "request_id")?;
                if agent_is_terminal(state, request_id) {
                    return Ok(Vec::new());
                }
                let agent_name = payload
                    .get("agent_name")
                    .and_then(Value::as_str)
                    .unwrap_or("assistant");
                let error = require_str(payload, "error")?;
                Ok(vec![OrchestrationEvent::AgentExecutionFailed {
                    request_id: request_id.to_string(),
                    agent_name: agent_name.to_string(),
                    error: error.to_string(),
                    occurred_at: TimestampUtc::now(),
                }
                .into_record()?])
            }),
        );
    }

    /// UserRequestReceived kicks off the background decision round trip.
    fn wire_decision_trigger(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        self.processor.subscribe(
            "UserRequestReceived",
            Arc::new(move |event, state, _| {
                let Some(request_id) = event.field_str("request_id") else {
                    anyhow::bail!("UserRequestReceived without request_id");
                };
                orchestrator.spawn_decision(request_id, chat_turns(state));
                Ok(Vec::new())
            }),
        );
    }

    /// AgentCallDecided kicks off the agent's own round trip against the
    /// chosen module's tools.
    fn wire_agent_call_trigger(self: &Arc<Self>) {
        let orchestrator = Arc::clone(self);
        self.processor.subscribe(
            "AgentCallDecided",
            Arc::new(move |event, _, _| {
                let Some(request_id) = event.field_str("request_id") else {
                    anyhow::bail!("AgentCallDecided without request_id");
                };
                let Some(agent_name) = event.field_str("agent_name") else {
                    anyhow::bail!("AgentCallDecided without agent_name");
                };
                let query = event.field_str("query").unwrap_or_default();
                orchestrator.spawn_agent_call(request_id, agent_name, query);
                Ok(Vec::new())
            }),
        );
    }

    /// Each placed tool call executes in the same dispatch batch. The event
    /// payload already carries everything ExecuteToolCall needs.
    fn wire_tool_execution_trigger(self: &Arc<Self>) {
        self.processor.subscribe(
            "ToolCallRequestPlaced",
            Arc::new(move |event, _, _| {
                Ok(vec![Dispatch::Command {
                    name: EXECUTE_TOOL_CALL.to_string(),
                    payload: event.data.clone(),
                }])
            }),
        );
    }

    /// Every resolved tool call re-checks whether the request can complete.
    fn wire_completion_triggers(self: &Arc<Self>) {
        for event_type in ["ToolCallCompleted", "ToolCallFailed"] {
            self.processor.subscribe(
                event_type,
                Arc::new(move |event, _, _| {
                    let Some(request_id) = event.field_str("request_id") else {
                        anyhow::bail!("tool call event without request_id");
                    };
                    let mut payload = Payload::new();
                    payload.insert(
                        "request_id".to_string(),
                        Value::String(request_id.to_string()),
                    );
                    Ok(vec![Dispatch::Command {
                        name: COMPLETE_REQUEST.to_string(),
                        payload,
                    }])
                }),
            );
        }
    }

    fn spawn_decision(self: &Arc<Self>, request_id: &str, turns: Vec<ChatTurn>) {
        let orchestrator = Arc::clone(self);
        let request_id = request_id.to_string();
        let context = request_context(&request_id);
        let _ = self.recovery
            .spawn_guarded("agent_decision", context, async move {
                orchestrator.stream_status(&request_id, "deciding");
                let tools = orchestrator.delegation_tools();
                let reply = orchestrator
                    .llm
                    .chat(&turns, &tools, Some(&orchestrator.default_model))
                    .await;

                let mut payload = Payload::new();
                payload.insert(
                    "request_id".to_string(),
                    Value::String(request_id.clone()),
                );
                match reply {
                    Ok(reply) => {
                        if let Some(call) = reply.tool_calls.first() {
                            payload.insert(
                                "agent_name".to_string(),
                                Value::String(call.function.clone()),
                            );
                            let query = call
                                .arguments
                                .get("query")
                                .and_then(Value::as_str)
                                .unwrap_or(&reply.content);
                            payload
                                .insert("query".to_string(), Value::String(query.to_string()));
                        } else {
                            payload.insert(
                                "response_text".to_string(),
                                Value::String(reply.content),
                            );
                        }
                        orchestrator
                            .processor
                            .execute_command(RESOLVE_AGENT_DECISION, payload)?;
                    }
                    Err(err) => {
                        orchestrator.fail_request(&request_id, "assistant", &format!("{:#}", err))?;
                    }
                }
                Ok(())
            });
    }

    fn spawn_agent_call(self: &Arc<Self>, request_id: &str, agent_name: &str, query: &str) {
        let orchestrator = Arc::clone(self);
        let request_id = request_id.to_string();
        let agent_name = agent_name.to_string();
        let query = query.to_string();
        let context = request_context(&request_id);
        let _ = self.recovery
            .spawn_guarded("agent_call", context, async move {
                orchestrator.stream_status(&request_id, "executing");
                let Some(module) = orchestrator.registry.module(&agent_name) else {
                    return orchestrator.fail_request(
                        &request_id,
                        &agent_name,
                        "module disappeared before the agent ran",
                    );
                };

                let turns = orchestrator.agent_turns(&module, &query);
                let tools = module_tools(&module);
                let model = module
                    .agent_model()
                    .unwrap_or_else(|| orchestrator.default_model.clone());
                let reply = orchestrator
                    .llm
                    .chat(&turns, &tools, Some(&model))
                    .await;

                match reply {
                    Ok(reply) if !reply.tool_calls.is_empty() => {
                        let calls: Vec<Value> = reply
                            .tool_calls
                            .iter()
                            .map(|call| {
                                let mut entry = serde_json::Map::new();
                                entry.insert(
                                    "function".to_string(),
                                    Value::String(call.function.clone()),
                                );
                                entry.insert(
                                    "arguments".to_string(),
                                    Value::Object(call.arguments.clone()),
                                );
                                Value::Object(entry)
                            })
                            .collect();
                        let mut payload = Payload::new();
                        payload.insert(
                            "request_id".to_string(),
                            Value::String(request_id.clone()),
                        );
                        payload.insert("tool_calls".to_string(), Value::Array(calls));
                        orchestrator
                            .processor
                            .execute_command(PLACE_TOOL_CALLS, payload)?;
                    }
                    Ok(reply) => {
                        let mut payload = Payload::new();
                        payload.insert(
                            "request_id".to_string(),
                            Value::String(request_id.clone()),
                        );
                        payload.insert(
                            "response_text".to_string(),
                            Value::String(reply.content),
                        );
                        orchestrator
                            .processor
                            .execute_command(FINALIZE_REQUEST, payload)?;
                    }
                    Err(err) => {
                        orchestrator.fail_request(
                            &request_id,
                            &agent_name,
                            &format!("{:#}", err),
                        )?;
                    }
                }
                Ok(())
            });
    }

    fn spawn_summary(self: &Arc<Self>, request_id: &str) {
        let orchestrator = Arc::clone(self);
        let request_id = request_id.to_string();
        let context = request_context(&request_id);
        let _ = self.recovery
            .spawn_guarded("agent_summary", context, async move {
                orchestrator.stream_status(&request_id, "summarizing");
                // Fresh state: the tool results landed in the chat before
                // AgentSummarizing committed.
                let state = orchestrator.processor.state_snapshot();
                let mut turns = vec![ChatTurn {
                    role: "system".to_string(),
                    content: "Summarize the outcome of the completed tool calls for the user."
                        .to_string(),
                }];
                turns.extend(chat_turns(&state));
                let model = agent_model(&state, &request_id)
                    .unwrap_or_else(|| orchestrator.default_model.clone());
                let reply = orchestrator
                    .llm
                    .chat(&turns, &[], Some(&model))
                    .await;

                match reply {
                    Ok(reply) => {
                        let mut payload = Payload::new();
                        payload.insert(
                            "request_id".to_string(),
                            Value::String(request_id.clone()),
                        );
                        payload.insert(
                            "response_text".to_string(),
                            Value::String(reply.content),
                        );
                        orchestrator
                            .processor
                            .execute_command(FINALIZE_REQUEST, payload)?;
                    }
                    Err(err) => {
                        orchestrator.fail_request(
                            &request_id,
                            "assistant",
                            &format!("{:#}", err),
                        )?;
                    }
                }
                Ok(())
            });
    }

    fn fail_request(&self, request_id: &str, agent_name: &str, error: &str) -> anyhow::Result<()> {
        let mut payload = Payload::new();
        payload.insert(
            "request_id".to_string(),
            Value::String(request_id.to_string()),
        );
        payload.insert(
            "agent_name".to_string(),
            Value::String(agent_name.to_string()),
        );
        payload.insert("error".to_string(), Value::String(error.to_string()));
        self.processor.execute_command(FAIL_AGENT, payload)?;
        Ok(())
    }

    fn stream_status(&self, request_id: &str, phase: &str) {
        let mut data = Payload::new();
        data.insert(
            "request_id".to_string(),
            Value::String(request_id.to_string()),
        );
        data.insert("phase".to_string(), Value::String(phase.to_string()));
        self.processor.bus().publish_streaming("agent_status", data);
    }

    /// One delegation tool per active LLM module.
    fn delegation_tools(&self) -> Vec<ToolSpec> {
        self.registry
            .llm_modules()
            .iter()
            .map(|module| ToolSpec {
                name: module.name().to_string(),
                description: module
                    .system_prompt()
                    .unwrap_or_else(|| format!("Delegate to the {} module", module.name())),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What this module should do"
                        }
                    },
                    "required": ["query"]
                }),
            })
            .collect()
    }

    fn agent_turns(&self, module: &Arc<dyn Module>, query: &str) -> Vec<ChatTurn> {
        let mut turns = Vec::new();
        let mut system = module
            .system_prompt()
            .unwrap_or_else(|| format!("You are the {} module.", module.name()));
        if let Some(state) = self.processor.aggregate_state(module.name()) {
            let rendered = serde_json::to_string(&state).unwrap_or_default();
            system.push_str("\n\nCurrent module state:\n");
            system.push_str(&rendered);
        }
        turns.push(ChatTurn {
            role: "system".to_string(),
            content: system,
        });
        turns.push(ChatTurn {
            role: "user".to_string(),
            content: query.to_string(),
        });
        turns
    }
}

fn require_str<'a>(payload: &'a Payload, field: &str) -> anyhow::Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing field: {}", field))
}

fn request_context(request_id: &str) -> Payload {
    let mut context = Payload::new();
    context.insert(
        "request_id".to_string(),
        Value::String(request_id.to_string()),
    );
    context
}

fn orchestration_state(state: &StateSnapshot) -> Option<&Value> {
    state.get(ORCHESTRATION)
}

fn pending_count(state: &StateSnapshot, request_id: &str) -> usize {
    orchestration_state(state)
        .and_then(|s| s.get("pending"))
        .and_then(|p| p.get(request_id))
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0)
}

fn agent_field<'a>(state: &'a StateSnapshot, request_id: &str, field: &str) -> Option<&'a Value> {
    orchestration_state(state)
        .and_then(|s| s.get("agents"))
        .and_then(|agents| agents.get(request_id))
        .and_then(|agent| agent.get(field))
}

fn agent_is_terminal(state: &StateSnapshot, request_id: &str) -> bool {
    matches!(
        agent_field(state, request_id, "status").and_then(Value::as_str),
        Some("completed") | Some("failed")
    )
}

fn agent_is_summarizing(state: &StateSnapshot, request_id: &str) -> bool {
    matches!(
        agent_field(state, request_id, "status").and_then(Value::as_str),
        Some("summarizing")
    )
}

fn agent_model(state: &StateSnapshot, request_id: &str) -> Option<String> {
    agent_field(state, request_id, "model")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Rebuilds model-facing turns from the snapshot's visible chat window.
fn chat_turns(state: &StateSnapshot) -> Vec<ChatTurn> {
    orchestration_state(state)
        .and_then(|s| s.get("chat_context"))
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter_map(|message| {
                    let role = message.get("role").and_then(Value::as_str)?;
                    let content = message.get("content").and_then(Value::as_str)?;
                    if role == Role::Hidden.as_str() {
                        return None;
                    }
                    Some(ChatTurn {
                        role: role.to_string(),
                        content: content.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn module_tools(module: &Arc<dyn Module>) -> Vec<ToolSpec> {
    module
        .commands()
        .iter()
        .map(|command| ToolSpec::from_shape(&command.name, &command.description, &command.shape))
        .collect()
}

/// Looks the function up among active LLM modules and runs it directly;
/// tool execution happens inside the dispatch batch, so it cannot go back
/// through `execute_command`.
fn invoke_module_command(
    registry: &Arc<ModuleRegistry>,
    function: &str,
    arguments: &Payload,
    state: &StateSnapshot,
) -> anyhow::Result<Vec<crate::event::EventRecord>> {
    for module in registry.llm_modules() {
        for command in module.commands() {
            if command.name == function {
                return (command.handler)(arguments, state);
            }
        }
    }
    anyhow::bail!("no active module provides tool {}", function)
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
