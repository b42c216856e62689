//! OpenAI-compatible `/completions` provider
//!
//! Works against together.ai, OpenAI, llama.cpp's server, vLLM and Ollama.
//! The prompt is sent as raw text so chat templates stay under our control.

use std::time::Instant;

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::CompletionProvider;
use crate::{
    error::{Error, Result},
    stream::{CompletionBuilder, CompletionEvent, CompletionEventStream},
    types::{CompletionRequest, Model, StopReason, Usage},
};

/// Most OpenAI-compatible servers reject more stop sequences than this
const MAX_API_STOP_SEQUENCES: usize = 4;

/// Client for an OpenAI-compatible completions endpoint
pub struct CompletionsProvider {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl CompletionsProvider {
    /// Create a provider with an optional bearer token
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn request_builder(&self, model: &Model, body: &ApiRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/completions", model.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(url).json(body);

        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        for (key, value) in &model.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder
    }

    async fn complete_blocking(
        &self,
        model: &Model,
        request: &CompletionRequest,
    ) -> Result<CompletionEventStream> {
        let body = ApiRequest::from_request(model, request, false);
        let mut builder = self.request_builder(model, &body);
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| match request.timeout {
            Some(t) if e.is_timeout() => Error::Timeout(t),
            _ => Error::Http(e),
        })?;
        let response = check_status(response).await?;
        let parsed: ApiResponse = response.json().await?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::UnexpectedResponse("no choices in completion".into()))?;
        let usage = parsed
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();
        debug!(
            model = %model.id,
            prompt_tokens = usage.prompt,
            completion_tokens = usage.completion,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion finished"
        );

        let mut builder = CompletionBuilder::new(request.stop.clone());
        let text = builder.push_delta(&choice.text).unwrap_or_default();
        let tail = builder.pending().to_string();
        let stop_reason = if builder.is_stopped() {
            builder.build().stop_reason
        } else {
            finish_reason(choice.finish_reason.as_deref())
        };

        let events = vec![
            CompletionEvent::Delta { text: text + &tail },
            CompletionEvent::Done { usage, stop_reason },
        ];
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn complete_streaming(
        &self,
        model: &Model,
        request: &CompletionRequest,
    ) -> Result<CompletionEventStream> {
        let body = ApiRequest::from_request(model, request, true);
        let event_source = EventSource::new(self.request_builder(model, &body))
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, request.stop.clone())))
    }
}

#[async_trait]
impl CompletionProvider for CompletionsProvider {
    async fn complete(
        &self,
        model: &Model,
        request: &CompletionRequest,
    ) -> Result<CompletionEventStream> {
        if model.base_url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "model {} has no base URL",
                model.id
            )));
        }
        if request.stream {
            self.complete_streaming(model, request)
        } else {
            self.complete_blocking(model, request).await
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let text = response.text().await.unwrap_or_default();

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::InvalidApiKey,
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited { retry_after },
        s => {
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            Error::api(s.as_u16(), message)
        }
    })
}

fn finish_reason(reason: Option<&str>) -> Option<StopReason> {
    match reason {
        Some("stop") | Some("eos") => Some(StopReason::Stop),
        Some("length") => Some(StopReason::Length),
        _ => None,
    }
}

fn create_stream(
    mut event_source: EventSource,
    stop: Vec<String>,
) -> impl futures::Stream<Item = CompletionEvent> {
    stream! {
        let mut builder = CompletionBuilder::new(stop);
        let mut usage = Usage::default();
        let mut reason: Option<String> = None;

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            for choice in &chunk.choices {
                                if let Some(delta) = builder.push_delta(&choice.text) {
                                    yield CompletionEvent::Delta { text: delta };
                                }
                                if let Some(ref r) = choice.finish_reason {
                                    reason = Some(r.clone());
                                }
                            }
                            if let Some(u) = chunk.usage {
                                usage = Usage::new(u.prompt_tokens, u.completion_tokens);
                            }
                            if builder.is_stopped() {
                                break;
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            yield CompletionEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                            };
                            return;
                        }
                    }
                }
                Err(e) => {
                    event_source.close();
                    yield CompletionEvent::Error {
                        message: format!("SSE error: {}", e),
                    };
                    return;
                }
            }
        }
        event_source.close();

        // Held-back text that never turned into a marker
        let tail = builder.pending().to_string();
        if !tail.is_empty() && !builder.is_stopped() {
            yield CompletionEvent::Delta { text: tail };
        }

        let stopped = builder.is_stopped();
        let completion = builder.build();
        let stop_reason = if stopped {
            completion.stop_reason
        } else {
            finish_reason(reason.as_deref())
        };
        yield CompletionEvent::Done { usage, stop_reason };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    prompt: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

impl ApiRequest {
    fn from_request(model: &Model, request: &CompletionRequest, stream: bool) -> Self {
        Self {
            model: model.id.clone(),
            prompt: request.prompt.clone(),
            max_tokens: request.max_tokens.min(model.max_tokens),
            stop: request
                .stop
                .iter()
                .take(MAX_API_STOP_SEQUENCES)
                .cloned()
                .collect(),
            temperature: request.temperature,
            stream,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    text: String,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}
