//! LLM boundary.
//!
//! Everything the orchestrator knows about the model lives behind
//! [`LlmClient`]: messages and tool specs in, content and tool-call
//! requests out. The runtime ships an offline client; tests script one.

use crate::command::{tool_parameters, CommandShape};
use crate::event::Payload;
use async_trait::async_trait;
use serde_json::Value;

/// One turn of model-facing conversation.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// A tool offered to the model.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSpec {
    pub fn from_shape(name: &str, description: &str, shape: &CommandShape) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters: tool_parameters(shape),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub function: String,
    pub arguments: Payload,
}

#[derive(Debug, Clone, Default)]
pub struct LlmReply {
    pub content: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatTurn],
        tools: &[ToolSpec],
        model: Option<&str>,
    ) -> anyhow::Result<LlmReply>;
}

/// Offline client: answers directly, never calls tools. Keeps the runtime
/// usable without a model endpoint.
pub struct DirectReply;

#[async_trait]
impl LlmClient for DirectReply {
    async fn chat(
        &self,
        messages: &[ChatTurn],
        _tools: &[ToolSpec],
        _model: Option<&str>,
    ) -> anyhow::Result<LlmReply> {
        let last_user = messages
            .iter()
            .rev()
            .find(|turn| turn.role == "user")
            .map(|turn| turn.content.as_str())
            .unwrap_or("");
        Ok(LlmReply {
            content: format!("No model is configured. You said: {}", last_user),
            tool_calls: Vec::new(),
        })
    }
}
