//! Core types for completion requests

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Known completion backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Together,
    OpenAI,
    LlamaCpp,
    Ollama,
    Custom,
}

impl Provider {
    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::Together => "Together",
            Provider::OpenAI => "OpenAI",
            Provider::LlamaCpp => "llama.cpp",
            Provider::Ollama => "Ollama",
            Provider::Custom => "Custom",
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> Option<&'static str> {
        match self {
            Provider::Together => Some("TOGETHER_API_KEY"),
            Provider::OpenAI => Some("OPENAI_API_KEY"),
            Provider::LlamaCpp | Provider::Ollama | Provider::Custom => None,
        }
    }

    /// Default base URL for the provider's OpenAI-compatible API
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Provider::Together => "https://api.together.xyz/v1",
            Provider::OpenAI => "https://api.openai.com/v1",
            Provider::LlamaCpp => "http://127.0.0.1:8080/v1",
            Provider::Ollama => "http://127.0.0.1:11434/v1",
            Provider::Custom => "http://127.0.0.1:8000/v1",
        }
    }
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier sent to the backend
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Provider
    pub provider: Provider,
    /// Base URL for API calls (including the `/v1` prefix)
    pub base_url: String,
    /// Context window size in tokens
    pub context_window: u32,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    /// A model served from an arbitrary OpenAI-compatible endpoint
    pub fn custom(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            provider: Provider::Custom,
            base_url: base_url.into(),
            context_window: 8192,
            max_tokens: 4096,
            headers: HashMap::new(),
        }
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

impl Usage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }

    /// Accumulate another usage record into this one
    pub fn add(&mut self, other: &Usage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.total += other.total;
    }
}

/// Reason why generation stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    Stop,
    /// Output hit one of the requested stop markers
    StopMarker { marker: String },
    /// Maximum tokens reached
    Length,
    /// Request was aborted
    Aborted,
}

/// A single completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Fully rendered prompt text
    pub prompt: String,
    /// Stop markers; output is truncated at the first occurrence of any
    #[serde(default)]
    pub stop: Vec<String>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    /// Wall-clock limit for the whole request
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            stop: Vec::new(),
            max_tokens,
            temperature: None,
            stream: false,
            timeout: None,
        }
    }

    pub fn with_stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A finished completion
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
    pub stop_reason: Option<StopReason>,
    /// Milliseconds spent generating
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Completion tokens per second, when timing is known
    pub fn tokens_per_second(&self) -> Option<f64> {
        if self.elapsed_ms == 0 {
            return None;
        }
        Some(self.usage.completion as f64 / (self.elapsed_ms as f64 / 1000.0))
    }
}

/// Truncate `text` at the earliest occurrence of any stop marker.
///
/// Backends are not trusted to honor stop sequences, so every completion
/// passes through here before it leaves this crate.
pub fn truncate_at_stop(text: &str, stop: &[String]) -> (String, Option<StopReason>) {
    let earliest = stop
        .iter()
        .filter(|marker| !marker.is_empty())
        .filter_map(|marker| text.find(marker.as_str()).map(|idx| (idx, marker)))
        .min_by_key(|(idx, _)| *idx);

    match earliest {
        Some((idx, marker)) => (
            text[..idx].to_string(),
            Some(StopReason::StopMarker {
                marker: marker.clone(),
            }),
        ),
        None => (text.to_string(), None),
    }
}
