//! Agent event types

use jay_ai::Usage;
use serde::{Deserialize, Serialize};

/// Events emitted while the dispatcher works through a user turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A user turn was accepted
    TurnStart { turn_number: u32 },

    /// A generation round started (one per tool hop)
    GenerationStart { round: u32 },

    /// Streamed text from the current generation
    TextDelta { delta: String },

    /// A generation attempt failed and will be retried
    GenerationRetry { attempt: u32, error: String },

    /// Text the model wrote before a tool call; shown before dispatch
    Preamble { text: String },

    /// Tool execution started
    ToolExecutionStart {
        tool_name: String,
        raw_arguments: String,
        arguments: serde_json::Value,
    },

    /// Tool execution completed
    ToolExecutionEnd {
        tool_name: String,
        result: String,
        succeeded: bool,
    },

    /// The final reply for the user turn
    AssistantReply { text: String, degraded: bool },

    /// The user turn finished
    TurnEnd {
        turn_number: u32,
        tool_calls: u32,
        usage: Usage,
    },

    /// Error occurred
    Error { message: String },
}

impl AgentEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::TurnEnd { .. })
    }
}
