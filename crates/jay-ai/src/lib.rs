//! jay-ai: text-completion provider layer
//!
//! This crate talks to completion endpoints that take a fully rendered
//! prompt string (Llama 3 style chat templates) rather than structured
//! chat messages. It covers request/response types, token accounting,
//! stop-marker truncation and streaming.

pub mod error;
pub mod models;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::CompletionEventStream;
pub use types::*;
