//! Transport abstraction over the generation collaborator

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use jay_ai::{
    Completion, CompletionEventStream, CompletionRequest, Model, Result as AiResult,
    providers::CompletionProvider,
    stream::{CompletionBuilder, CompletionEvent},
};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Anything that can turn a rendered prompt into generated text
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a generation, streaming completion events
    async fn generate(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> AiResult<CompletionEventStream>;
}

/// Direct provider transport: calls a completion endpoint for one model
pub struct ProviderTransport {
    provider: Arc<dyn CompletionProvider>,
    model: Model,
}

impl ProviderTransport {
    pub fn new(provider: Arc<dyn CompletionProvider>, model: Model) -> Self {
        Self { provider, model }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn generate(
        &self,
        request: CompletionRequest,
        cancel: CancellationToken,
    ) -> AiResult<CompletionEventStream> {
        if cancel.is_cancelled() {
            return Err(jay_ai::Error::Aborted);
        }
        self.provider.complete(&self.model, &request).await
    }
}

/// Fold a completion stream into a [`Completion`].
///
/// Stop markers are applied again here so a transport that ignores them
/// still yields exactly truncated text. `on_delta` sees only text that is
/// safe to display.
pub async fn collect_completion(
    mut stream: CompletionEventStream,
    stop: &[String],
    cancel: &CancellationToken,
    mut on_delta: impl FnMut(&str),
) -> Result<Completion> {
    let started = Instant::now();
    let mut builder = CompletionBuilder::new(stop.to_vec());
    let mut finished = false;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            event = stream.next() => event,
        };
        let Some(event) = event else { break };

        match event {
            CompletionEvent::Error { message } => return Err(Error::Generation(message)),
            CompletionEvent::Done { .. } => {
                builder.process_event(&event);
                finished = true;
                break;
            }
            CompletionEvent::Delta { .. } => {
                if let Some(visible) = builder.process_event(&event) {
                    on_delta(&visible);
                }
            }
        }
    }

    if !finished {
        return Err(Error::Generation(
            "stream ended before the completion finished".into(),
        ));
    }

    let tail = builder.pending().to_string();
    if !tail.is_empty() && !builder.is_stopped() {
        on_delta(&tail);
    }
    let mut completion = builder.build();
    completion.elapsed_ms = started.elapsed().as_millis() as u64;
    Ok(completion)
}

/// Run one generation to completion, bounded by `timeout`
pub async fn generate_text(
    transport: &dyn Transport,
    request: CompletionRequest,
    timeout: Duration,
    cancel: &CancellationToken,
    on_delta: impl FnMut(&str),
) -> Result<Completion> {
    let stop = request.stop.clone();
    let run = async {
        let stream = transport.generate(request, cancel.clone()).await?;
        collect_completion(stream, &stop, cancel, on_delta).await
    };
    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(Error::Ai(jay_ai::Error::Timeout(timeout))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jay_ai::{StopReason, Usage};

    fn events(items: Vec<CompletionEvent>) -> CompletionEventStream {
        Box::pin(futures::stream::iter(items))
    }

    #[test]
    fn test_delay_for_attempt() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_collect_truncates_at_stop() {
        let stream = events(vec![
            CompletionEvent::Delta {
                text: "Hi there.<|eot".into(),
            },
            CompletionEvent::Delta {
                text: "_id|>\n<|start_header_id|>user".into(),
            },
            CompletionEvent::Done {
                usage: Usage::new(50, 9),
                stop_reason: Some(StopReason::Stop),
            },
        ]);
        let mut shown = String::new();
        let completion = collect_completion(
            stream,
            &["<|eot_id|>".to_string()],
            &CancellationToken::new(),
            |d| shown.push_str(d),
        )
        .await
        .unwrap();

        assert_eq!(completion.text, "Hi there.");
        assert_eq!(shown, "Hi there.");
        assert_eq!(completion.usage.total, 59);
    }

    #[tokio::test]
    async fn test_collect_stream_error() {
        let stream = events(vec![
            CompletionEvent::Delta { text: "par".into() },
            CompletionEvent::Error {
                message: "SSE error: connection reset".into(),
            },
        ]);
        let err = collect_completion(stream, &[], &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generation(m) if m.contains("connection reset")));
    }

    #[tokio::test]
    async fn test_collect_truncated_stream() {
        let stream = events(vec![CompletionEvent::Delta { text: "par".into() }]);
        let err = collect_completion(stream, &[], &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
    }

    #[tokio::test]
    async fn test_collect_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let stream: CompletionEventStream = Box::pin(futures::stream::pending());
        let err = collect_completion(stream, &[], &cancel, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    struct SlowTransport;

    #[async_trait]
    impl Transport for SlowTransport {
        async fn generate(
            &self,
            _request: CompletionRequest,
            _cancel: CancellationToken,
        ) -> AiResult<CompletionEventStream> {
            Ok(Box::pin(futures::stream::pending()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_text_times_out() {
        let err = generate_text(
            &SlowTransport,
            CompletionRequest::new("prompt", 16),
            Duration::from_secs(5),
            &CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Ai(jay_ai::Error::Timeout(_))));
        assert!(err.is_retryable());
    }
}
