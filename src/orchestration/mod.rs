//! Request orchestration.
//!
//! Wires the agent state machine into the pipeline: commands and
//! subscriptions move a request from `ReceiveRequest` through decision,
//! tool execution, and summarization to exactly one terminal event, with
//! all LLM I/O pushed to guarded background tasks that re-enter through
//! follow-up commands.

pub mod aggregate;
pub mod events;
pub mod llm;
pub mod orchestrator;

pub use aggregate::{AgentState, AgentStatus, OrchestrationAggregate, ToolCallState, ToolCallStatus};
pub use events::{OrchestrationEvent, ORCHESTRATION};
pub use llm::{ChatTurn, DirectReply, LlmClient, LlmReply, ToolCallRequest, ToolSpec};
pub use orchestrator::RequestOrchestrator;
