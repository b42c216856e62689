//! jay-agent: text-protocol tool dispatch
//!
//! Tool calls are written inline by the model as
//! `to-system: _name(ARGS) END_FUNC`. This crate recognizes them, resolves
//! them against a registry, executes them and folds the results back into
//! the conversation until the model answers without a call. It also hosts
//! the self-correcting code synthesizer behind the calculator tool.

pub mod agent;
pub mod arguments;
pub mod conversation;
pub mod error;
pub mod events;
pub mod parser;
pub mod protocol;
pub mod registry;
pub mod sandbox;
pub mod synthesizer;
pub mod tool;
pub mod transport;

#[cfg(test)]
mod testing;

pub use agent::{Agent, AgentConfig, TurnOutcome};
pub use conversation::{Conversation, Phase, Role, TranscriptSink, Turn};
pub use error::{Error, Result, ToolError};
pub use events::AgentEvent;
pub use parser::{ParseOutcome, RawCall};
pub use registry::{AliasRule, ToolRegistry};
pub use sandbox::{CodeRunner, ExecutionOutcome, PythonRunner};
pub use synthesizer::{CalculatorTool, SynthesisConfig, Synthesizer};
pub use tool::{BoxedTool, ParamType, ParameterSchema, ResolvedArguments, Tool, ToolResult};
pub use transport::{ProviderTransport, RetryConfig, Transport};
