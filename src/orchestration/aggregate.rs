//! Orchestration state machine.
//!
//! One aggregate projects every request's agent state, tool-call states,
//! pending-set bookkeeping, and the chat log. Statuses only move forward;
//! a late or duplicate event can never regress a terminal request.

use crate::aggregate::Aggregate;
use crate::chat::{split_think_blocks, ChatLog, Role};
use crate::event::{EventRecord, Payload};
use crate::orchestration::events::{OrchestrationEvent, ORCHESTRATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Deciding,
    Called,
    Executing,
    Summarizing,
    Completed,
    Failed,
}

impl AgentStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Deciding => 0,
            Self::Called => 1,
            Self::Executing => 2,
            Self::Summarizing => 3,
            Self::Completed => 4,
            Self::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Requested,
    Started,
    Success,
    Failed,
}

impl ToolCallStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Requested => 0,
            Self::Started => 1,
            Self::Success => 2,
            Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub request_id: String,
    pub agent_name: String,
    pub status: AgentStatus,
    pub model: Option<String>,
    pub tool_call_ids: Vec<String>,
    /// Results keyed by tool call id.
    pub execution_results: Payload,
    pub summary: Option<String>,
}

impl AgentState {
    fn advance(&mut self, to: AgentStatus) {
        if self.status.is_terminal() {
            return;
        }
        if to.rank() > self.status.rank() {
            self.status = to;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallState {
    pub request_id: String,
    pub tool_call_id: String,
    pub function: String,
    pub status: ToolCallStatus,
    pub results: Option<Payload>,
}

impl ToolCallState {
    fn advance(&mut self, to: ToolCallStatus) {
        if self.status.is_terminal() {
            return;
        }
        if to.rank() > self.status.rank() {
            self.status = to;
        }
    }
}

pub struct OrchestrationAggregate {
    chat: ChatLog,
    agents: BTreeMap<String, AgentState>,
    tool_calls: BTreeMap<String, ToolCallState>,
    /// Unresolved tool call ids per request. A request cannot complete
    /// while its entry is non-empty.
    pending: BTreeMap<String, BTreeSet<String>>,
}

impl OrchestrationAggregate {
    pub fn new(max_chat_context: usize) -> Self {
        Self {
            chat: ChatLog::new(max_chat_context),
            agents: BTreeMap::new(),
            tool_calls: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn agent(&self, request_id: &str) -> Option<&AgentState> {
        self.agents.get(request_id)
    }

    pub fn pending_count(&self, request_id: &str) -> usize {
        self.pending.get(request_id).map(BTreeSet::len).unwrap_or(0)
    }

    /// A request stays pending while tool calls are unresolved or its agent
    /// has not reached a terminal status.
    pub fn is_request_pending(&self, request_id: &str) -> bool {
        if self.pending_count(request_id) > 0 {
            return true;
        }
        self.agents
            .get(request_id)
            .map(|agent| !agent.status.is_terminal())
            .unwrap_or(false)
    }

    fn agent_mut(&mut self, request_id: &str) -> &mut AgentState {
        self.agents
            .entry(request_id.to_string())
            .or_insert_with(|| AgentState {
                request_id: request_id.to_string(),
                agent_name: "assistant".to_string(),
                status: AgentStatus::Deciding,
                model: None,
                tool_call_ids: Vec::new(),
                execution_results: Payload::new(),
                summary: None,
            })
    }

    fn resolve_pending(&mut self, request_id: &str, tool_call_id: &str) {
        if let Some(set) = self.pending.get_mut(request_id) {
            set.remove(tool_call_id);
            if set.is_empty() {
                self.pending.remove(request_id);
            }
        }
    }

    fn apply_typed(&mut self, event: OrchestrationEvent) {
        match event {
            OrchestrationEvent::UserRequestReceived {
                request_id, text, ..
            } => {
                self.chat.push(Role::User, &text, &request_id);
                self.agent_mut(&request_id);
            }
            OrchestrationEvent::ToolCallsConfigured { request_id, .. } => {
                self.agent_mut(&request_id);
            }
            OrchestrationEvent::AgentCallDecided {
                request_id,
                agent_name,
                model,
                ..
            } => {
                let agent = self.agent_mut(&request_id);
                agent.agent_name = agent_name;
                agent.model = model;
                agent.advance(AgentStatus::Called);
            }
            OrchestrationEvent::ToolCallRequestPlaced {
                request_id,
                tool_call_id,
                function,
                ..
            } => {
                self.tool_calls.insert(
                    tool_call_id.clone(),
                    ToolCallState {
                        request_id: request_id.clone(),
                        tool_call_id: tool_call_id.clone(),
                        function,
                        status: ToolCallStatus::Requested,
                        results: None,
                    },
                );
                self.pending
                    .entry(request_id.clone())
                    .or_default()
                    .insert(tool_call_id.clone());
                let agent = self.agent_mut(&request_id);
                agent.tool_call_ids.push(tool_call_id);
                agent.advance(AgentStatus::Executing);
            }
            OrchestrationEvent::ToolCallStarted { tool_call_id, .. } => {
                if let Some(call) = self.tool_calls.get_mut(&tool_call_id) {
                    call.advance(ToolCallStatus::Started);
                }
            }
            OrchestrationEvent::ToolCallCompleted {
                request_id,
                tool_call_id,
                function,
                results,
                ..
            } => {
                if let Some(call) = self.tool_calls.get_mut(&tool_call_id) {
                    call.advance(ToolCallStatus::Success);
                    call.results = Some(results.clone());
                }
                self.resolve_pending(&request_id, &tool_call_id);
                let agent = self.agent_mut(&request_id);
                agent
                    .execution_results
                    .insert(tool_call_id, Value::Object(results.clone()));
                let rendered = serde_json::to_string(&results).unwrap_or_default();
                self.chat
                    .push_from(Role::Tool, &rendered, &request_id, &function);
            }
            OrchestrationEvent::ToolCallFailed {
                request_id,
                tool_call_id,
                function,
                error,
                ..
            } => {
                if let Some(call) = self.tool_calls.get_mut(&tool_call_id) {
                    call.advance(ToolCallStatus::Failed);
                }
                self.resolve_pending(&request_id, &tool_call_id);
                let mut failure = Payload::new();
                failure.insert("error".to_string(), Value::String(error.clone()));
                self.agent_mut(&request_id)
                    .execution_results
                    .insert(tool_call_id, Value::Object(failure));
                self.chat.push(
                    Role::System,
                    &format!("tool {} failed: {}", function, error),
                    &request_id,
                );
            }
            OrchestrationEvent::AgentSummarizing { request_id, .. } => {
                self.agent_mut(&request_id).advance(AgentStatus::Summarizing);
            }
            OrchestrationEvent::AgentExecutionFailed {
                request_id,
                agent_name,
                error,
                ..
            } => {
                let agent = self.agent_mut(&request_id);
                // A late failure cannot regress an already-resolved request.
                if agent.status.is_terminal() {
                    return;
                }
                let message = format!("agent {} failed: {}", agent_name, error);
                agent.advance(AgentStatus::Failed);
                agent.summary = Some(message.clone());
                self.chat.push(Role::Assistant, &message, &request_id);
            }
            OrchestrationEvent::RequestCompleted {
                request_id,
                response_text,
                ..
            } => {
                if self.agent_mut(&request_id).status.is_terminal() {
                    return;
                }
                let (thoughts, visible) = split_think_blocks(&response_text);
                for thought in &thoughts {
                    self.chat.push(Role::Hidden, thought, &request_id);
                }
                self.chat.push(Role::Assistant, &visible, &request_id);
                let agent = self.agent_mut(&request_id);
                agent.advance(AgentStatus::Completed);
                agent.summary = Some(visible);
            }
        }
    }
}

impl Aggregate for OrchestrationAggregate {
    fn id(&self) -> &str {
        ORCHESTRATION
    }

    fn apply(&mut self, event: &EventRecord) -> anyhow::Result<()> {
        if event.aggregate_id != ORCHESTRATION {
            return Ok(());
        }
        match OrchestrationEvent::from_record(event) {
            Ok(typed) => {
                self.apply_typed(typed);
                Ok(())
            }
            Err(err) => Err(anyhow::anyhow!(
                "undecodable orchestration event {}: {}",
                event.event_type,
                err
            )),
        }
    }

    /// Deterministic state view: BTree-backed maps keep key order stable
    /// across replays. Includes the visible chat window so handlers can
    /// build model context from the snapshot alone.
    fn state(&self) -> Payload {
        let mut state = Payload::new();
        state.insert(
            "agents".to_string(),
            serde_json::to_value(&self.agents).unwrap_or(Value::Null),
        );
        state.insert(
            "tool_calls".to_string(),
            serde_json::to_value(&self.tool_calls).unwrap_or(Value::Null),
        );
        state.insert(
            "pending".to_string(),
            serde_json::to_value(&self.pending).unwrap_or(Value::Null),
        );
        let context: Vec<Value> = self
            .chat
            .context()
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();
        state.insert("chat_context".to_string(), Value::Array(context));
        state
    }
}

#[cfg(test)]
#[path = "tests/aggregate_tests.rs"]
mod tests;
