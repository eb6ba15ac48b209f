//! Typed orchestration events.
//!
//! These are the runtime's own events; they round-trip through
//! [`EventRecord`]s via the internally-tagged codec, so the log stays
//! self-describing while this module works with real types.

use crate::event::{
    record_from_tagged, tagged_from_record, EventCodecError, EventRecord, EventTypeRegistry,
    Payload, TimestampUtc,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Aggregate id for all orchestration state.
pub const ORCHESTRATION: &str = "orchestration";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum OrchestrationEvent {
    /// A user request entered the system.
    UserRequestReceived {
        request_id: String,
        text: String,
        occurred_at: TimestampUtc,
    },
    /// The tools available for this request were fixed.
    ToolCallsConfigured {
        request_id: String,
        tools: Vec<String>,
        occurred_at: TimestampUtc,
    },
    /// The top-level model picked an agent module for the request.
    AgentCallDecided {
        request_id: String,
        agent_name: String,
        model: Option<String>,
        query: String,
        occurred_at: TimestampUtc,
    },
    /// The agent asked for a tool invocation.
    ToolCallRequestPlaced {
        request_id: String,
        tool_call_id: String,
        function: String,
        arguments: Payload,
        occurred_at: TimestampUtc,
    },
    ToolCallStarted {
        request_id: String,
        tool_call_id: String,
        function: String,
        occurred_at: TimestampUtc,
    },
    ToolCallCompleted {
        request_id: String,
        tool_call_id: String,
        function: String,
        results: Payload,
        occurred_at: TimestampUtc,
    },
    ToolCallFailed {
        request_id: String,
        tool_call_id: String,
        function: String,
        error: String,
        occurred_at: TimestampUtc,
    },
    /// All tool calls resolved; a summary pass is running.
    AgentSummarizing {
        request_id: String,
        occurred_at: TimestampUtc,
    },
    /// Terminal failure, surfaced to the user.
    AgentExecutionFailed {
        request_id: String,
        agent_name: String,
        error: String,
        occurred_at: TimestampUtc,
    },
    /// Terminal success with the user-visible response.
    RequestCompleted {
        request_id: String,
        response_text: String,
        occurred_at: TimestampUtc,
    },
}

impl OrchestrationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::UserRequestReceived { .. } => "UserRequestReceived",
            Self::ToolCallsConfigured { .. } => "ToolCallsConfigured",
            Self::AgentCallDecided { .. } => "AgentCallDecided",
            Self::ToolCallRequestPlaced { .. } => "ToolCallRequestPlaced",
            Self::ToolCallStarted { .. } => "ToolCallStarted",
            Self::ToolCallCompleted { .. } => "ToolCallCompleted",
            Self::ToolCallFailed { .. } => "ToolCallFailed",
            Self::AgentSummarizing { .. } => "AgentSummarizing",
            Self::AgentExecutionFailed { .. } => "AgentExecutionFailed",
            Self::RequestCompleted { .. } => "RequestCompleted",
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            Self::UserRequestReceived { request_id, .. }
            | Self::ToolCallsConfigured { request_id, .. }
            | Self::AgentCallDecided { request_id, .. }
            | Self::ToolCallRequestPlaced { request_id, .. }
            | Self::ToolCallStarted { request_id, .. }
            | Self::ToolCallCompleted { request_id, .. }
            | Self::ToolCallFailed { request_id, .. }
            | Self::AgentSummarizing { request_id, .. }
            | Self::AgentExecutionFailed { request_id, .. }
            | Self::RequestCompleted { request_id, .. } => request_id,
        }
    }

    pub fn into_record(self) -> Result<EventRecord, EventCodecError> {
        record_from_tagged(ORCHESTRATION, &self)
    }

    pub fn from_record(record: &EventRecord) -> Result<Self, EventCodecError> {
        tagged_from_record(record)
    }

    /// All variant names, used for registration and store validation.
    pub fn all_types() -> &'static [&'static str] {
        &[
            "UserRequestReceived",
            "ToolCallsConfigured",
            "AgentCallDecided",
            "ToolCallRequestPlaced",
            "ToolCallStarted",
            "ToolCallCompleted",
            "ToolCallFailed",
            "AgentSummarizing",
            "AgentExecutionFailed",
            "RequestCompleted",
        ]
    }

    /// Registers a typed decode check for every variant.
    pub fn register_types(registry: &EventTypeRegistry) {
        for event_type in Self::all_types() {
            registry.register(
                event_type,
                Arc::new(|record| Self::from_record(record).map(|_| ())),
            );
        }
    }
}
