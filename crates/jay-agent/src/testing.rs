//! Scripted collaborators shared by the unit tests

use async_trait::async_trait;
use jay_ai::{
    CompletionEventStream, CompletionRequest, StopReason, Usage, stream::CompletionEvent,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::sandbox::{CodeRunner, ExecutionOutcome};
use crate::transport::Transport;

/// One scripted generation
pub enum MockResponse {
    Text(String),
    /// The stream reports an error after a partial delta
    Fail(String),
}

/// A transport that replays canned generations in order and records
/// every prompt it was given
pub struct MockTransport {
    responses: Mutex<Vec<MockResponse>>,
    pub prompts: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn texts<S: Into<String>>(texts: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            texts
                .into_iter()
                .map(|t| MockResponse::Text(t.into()))
                .collect(),
        )
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn generate(
        &self,
        request: CompletionRequest,
        _cancel: CancellationToken,
    ) -> jay_ai::Result<CompletionEventStream> {
        self.prompts.lock().push(request.prompt.clone());
        let response = {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                MockResponse::Text("done".into())
            } else {
                responses.remove(0)
            }
        };

        let stream: CompletionEventStream = Box::pin(async_stream::stream! {
            match response {
                MockResponse::Text(text) => {
                    let completion = text.split_whitespace().count() as u32;
                    yield CompletionEvent::Delta { text };
                    yield CompletionEvent::Done {
                        usage: Usage::new(10, completion),
                        stop_reason: Some(StopReason::Stop),
                    };
                }
                MockResponse::Fail(message) => {
                    yield CompletionEvent::Delta { text: "Let me".into() };
                    yield CompletionEvent::Error { message };
                }
            }
        });
        Ok(stream)
    }
}

/// A code runner that replays canned outcomes and records the code it ran
pub struct MockRunner {
    outcomes: Mutex<Vec<ExecutionOutcome>>,
    pub ran: Mutex<Vec<String>>,
}

impl MockRunner {
    pub fn new(outcomes: Vec<ExecutionOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes),
            ran: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CodeRunner for MockRunner {
    async fn run(&self, code: &str) -> ExecutionOutcome {
        self.ran.lock().push(code.to_string());
        let mut outcomes = self.outcomes.lock();
        if outcomes.is_empty() {
            ExecutionOutcome::Failure("no scripted outcome".into())
        } else {
            outcomes.remove(0)
        }
    }
}
