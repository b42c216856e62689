//! Completion provider implementations

pub mod completions;

pub use completions::CompletionsProvider;

use crate::{CompletionEventStream, CompletionRequest, Error, Model, Result};
use async_trait::async_trait;

/// Trait for text-completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Stream a completion for a fully rendered prompt.
    ///
    /// Implementations must truncate output at the first stop marker even
    /// when the backend ignores the `stop` parameter.
    async fn complete(
        &self,
        model: &Model,
        request: &CompletionRequest,
    ) -> Result<CompletionEventStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: Option<&str>) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    match env_var {
        Some(var) => std::env::var(var).map_err(|_| Error::InvalidApiKey),
        None => Err(Error::InvalidApiKey),
    }
}
