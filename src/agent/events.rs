//! Stream events emitted during a turn.
//!
//! The SSE surface serializes these one per frame; `kind()` doubles as the
//! SSE event name.

use serde::Serialize;
use serde_json::Value;

/// One event in a `chat_stream` turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    UserInput {
        text: String,
    },
    ReasoningToken {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: Value,
    },
    ToolResult {
        id: String,
        content: String,
    },
    ResponseToken {
        text: String,
    },
    Done,
    Error {
        kind: String,
        message: String,
    },
}

impl AgentEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::UserInput { .. } => "user_input",
            AgentEvent::ReasoningToken { .. } => "reasoning_token",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::ToolResult { .. } => "tool_result",
            AgentEvent::ResponseToken { .. } => "response_token",
            AgentEvent::Done => "done",
            AgentEvent::Error { .. } => "error",
        }
    }
}
