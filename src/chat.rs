//! Chat log projection.
//!
//! The conversation is itself a projection of orchestration events. Hidden
//! messages (model thinking) are kept for the record but excluded from the
//! context window handed back to the model.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
    Hidden,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
            Self::Hidden => "hidden",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub request_id: String,
    #[serde(default)]
    pub agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatLog {
    messages: Vec<ChatMessage>,
    /// How many recent visible messages `context` returns.
    max_context: usize,
}

impl ChatLog {
    pub fn new(max_context: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_context,
        }
    }

    pub fn push(&mut self, role: Role, content: &str, request_id: &str) {
        self.messages.push(ChatMessage {
            role,
            content: content.to_string(),
            request_id: request_id.to_string(),
            agent: None,
        });
    }

    pub fn push_from(&mut self, role: Role, content: &str, request_id: &str, agent: &str) {
        self.messages.push(ChatMessage {
            role,
            content: content.to_string(),
            request_id: request_id.to_string(),
            agent: Some(agent.to_string()),
        });
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The model-facing window: the most recent non-hidden messages, oldest
    /// first, capped at `max_context`.
    pub fn context(&self) -> Vec<&ChatMessage> {
        let mut recent: Vec<&ChatMessage> = self
            .messages
            .iter()
            .rev()
            .filter(|m| m.role != Role::Hidden)
            .take(self.max_context)
            .collect();
        recent.reverse();
        recent
    }
}

fn think_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<think>(.*?)</think>").unwrap())
}

/// Splits model output into thinking blocks and the visible remainder.
pub fn split_think_blocks(text: &str) -> (Vec<String>, String) {
    let re = think_regex();
    let mut thoughts = Vec::new();
    for capture in re.captures_iter(text) {
        if let Some(block) = capture.get(1) {
            let trimmed = block.as_str().trim();
            if !trimmed.is_empty() {
                thoughts.push(trimmed.to_string());
            }
        }
    }
    let visible = re.replace_all(text, "").trim().to_string();
    (thoughts, visible)
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
