//! Conversation state: the append-only transcript and the turn phase.

use jay_ai::Usage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::{BEGIN_OF_TEXT, END_OF_TURN, role_header};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// One role-tagged segment of the transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Assistant turn that ended in a tool call; its result follows directly
    #[serde(default)]
    pub invokes_tool: bool,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>, invokes_tool: bool) -> Self {
        Self {
            role,
            text: text.into(),
            invokes_tool,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Where a session is within its current user turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    AwaitingUser,
    GeneratingAssistant,
    AwaitingToolDispatch,
    ToolExecuting,
    ResumingAfterTool,
}

impl Phase {
    /// Whether the state machine permits moving from `self` to `to`
    pub fn can_transition(self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (AwaitingUser, GeneratingAssistant)
                | (GeneratingAssistant, AwaitingUser)
                | (GeneratingAssistant, AwaitingToolDispatch)
                | (AwaitingToolDispatch, ToolExecuting)
                | (ToolExecuting, ResumingAfterTool)
                | (ResumingAfterTool, GeneratingAssistant)
        )
    }
}

/// Durable record of the transcript, written after every turn.
///
/// Used for crash recovery and debugging only; nothing reads it back
/// during a session.
pub trait TranscriptSink: Send + Sync {
    fn record(&self, turn: &Turn, transcript: &str) -> std::io::Result<()>;
}

/// Transcript plus the current phase.
///
/// Turns are only ever appended. The whole transcript is replayed to the
/// model on every generation.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    phase: Phase,
    /// Total usage across all generations
    pub total_usage: Usage,
}

impl Default for Conversation {
    fn default() -> Self {
        Self {
            turns: Vec::new(),
            phase: Phase::AwaitingUser,
            total_usage: Usage::default(),
        }
    }
}

impl Conversation {
    /// Start a session, optionally with a system prompt
    pub fn new(system_prompt: Option<&str>) -> Self {
        let mut conversation = Self::default();
        if let Some(prompt) = system_prompt {
            conversation.turns.push(Turn::new(Role::System, prompt, false));
        }
        conversation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transition(&mut self, to: Phase) -> Result<()> {
        if !self.phase.can_transition(to) {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        Ok(())
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    pub fn push_user(&mut self, text: impl Into<String>) -> &Turn {
        self.push(Turn::new(Role::User, text, false))
    }

    pub fn push_assistant(&mut self, text: impl Into<String>, invokes_tool: bool) -> &Turn {
        self.push(Turn::new(Role::Assistant, text, invokes_tool))
    }

    /// Append an already rendered (`to-Jay: ...`) tool result
    pub fn push_tool_result(&mut self, rendered: impl Into<String>) -> &Turn {
        self.push(Turn::new(Role::ToolResult, rendered, false))
    }

    fn push(&mut self, turn: Turn) -> &Turn {
        self.turns.push(turn);
        // just pushed
        &self.turns[self.turns.len() - 1]
    }

    pub fn add_usage(&mut self, usage: &Usage) {
        self.total_usage.add(usage);
    }

    /// The transcript in Llama 3 format, as persisted
    pub fn render_transcript(&self) -> String {
        let mut out = String::from(BEGIN_OF_TEXT);
        for turn in &self.turns {
            match turn.role {
                Role::System => {
                    out.push_str(&role_header("system"));
                    out.push_str(&turn.text);
                    out.push_str(END_OF_TURN);
                    out.push('\n');
                }
                Role::User => {
                    out.push_str(&role_header("user"));
                    out.push('\t');
                    out.push_str(&turn.text);
                    out.push_str(END_OF_TURN);
                    out.push('\n');
                }
                Role::Assistant => {
                    out.push_str(&role_header("assistant"));
                    out.push('\t');
                    out.push_str(&turn.text);
                    if !turn.invokes_tool {
                        out.push_str(END_OF_TURN);
                        out.push('\n');
                    }
                }
                Role::ToolResult => {
                    out.push('(');
                    out.push_str(&turn.text);
                    out.push_str("). ");
                    out.push_str(END_OF_TURN);
                    out.push('\n');
                }
            }
        }
        out
    }

    /// The prompt for the next generation: the transcript followed by an
    /// open assistant header
    pub fn render_prompt(&self) -> String {
        let mut out = self.render_transcript();
        out.push_str(&role_header("assistant"));
        out.push('\t');
        out
    }
}
