//! Error types for jay-agent

use thiserror::Error;

use crate::conversation::Phase;

/// Result type alias using jay-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during agent operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the completion provider layer
    #[error(transparent)]
    Ai(#[from] jay_ai::Error),

    /// The generation collaborator produced nothing usable
    #[error("Generation failed: {0}")]
    Generation(String),

    /// A conversation phase change that the state machine does not allow
    #[error("Invalid phase transition from {from:?} to {to:?}")]
    InvalidTransition { from: Phase, to: Phase },

    /// The turn was cancelled between steps
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Whether a failed generation is worth one more attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Ai(e) => e.is_retryable(),
            Error::Generation(_) => true,
            _ => false,
        }
    }
}

/// Failures that occur while dispatching a single tool call.
///
/// None of these cross the dispatch boundary as control flow: each one is
/// rendered into an error result and folded back into the transcript.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    /// Call syntax was recognized but the name is not registered
    #[error("\"{0}\" is not a recognized tool")]
    UnknownTool(String),

    /// Arguments could not be parsed or did not match the parameter schema
    #[error("invalid arguments for {tool}: {message}")]
    ArgumentCoercion { tool: String, message: String },

    /// The handler did not finish in time
    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },
}

impl ToolError {
    pub fn coercion(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ArgumentCoercion {
            tool: tool.into(),
            message: message.into(),
        }
    }
}
