//! The dispatch loop that drives a session through its phases

use jay_ai::{Completion, CompletionRequest, Usage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conversation::{Conversation, Phase, TranscriptSink};
use crate::error::{Error, Result, ToolError};
use crate::events::AgentEvent;
use crate::parser::{ParseOutcome, RawCall, parse};
use crate::protocol::{default_stop_markers, internal_reasoning, normalize_generation, strip_internal};
use crate::registry::ToolRegistry;
use crate::tool::ToolResult;
use crate::transport::{RetryConfig, Transport, generate_text};

/// Reply used when generation keeps failing
pub const APOLOGY: &str =
    "Sorry, I wasn't able to put a response together just now. Could you say that again?";

/// Agent configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Maximum tokens per generation
    pub max_tokens: u32,
    pub stop_markers: Vec<String>,
    /// Stream generations and forward deltas
    pub stream: bool,
    pub temperature: Option<f32>,
    /// Wall-clock limit for a single generation
    pub generation_timeout: Duration,
    /// Execution limit for tools that don't declare their own
    pub tool_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            max_tokens: 1024,
            stop_markers: default_stop_markers(),
            stream: true,
            temperature: None,
            generation_timeout: Duration::from_secs(120),
            tool_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
        }
    }
}

/// What one user turn produced
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// The final, user-visible assistant text
    pub reply: String,
    pub tool_calls: u32,
    pub usage: Usage,
    /// Generation failed and `reply` is the apology
    pub degraded: bool,
}

/// Drives one session. Owns its conversation exclusively; the registry and
/// transport may be shared between sessions.
pub struct Agent {
    config: AgentConfig,
    conversation: Conversation,
    transport: Arc<dyn Transport>,
    registry: Arc<ToolRegistry>,
    sink: Option<Arc<dyn TranscriptSink>>,
    event_tx: broadcast::Sender<AgentEvent>,
    cancel: CancellationToken,
    turn_number: u32,
}

impl Agent {
    /// Create a new agent
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        let conversation = Conversation::new(config.system_prompt.as_deref());
        Self {
            config,
            conversation,
            transport,
            registry,
            sink: None,
            event_tx,
            cancel: CancellationToken::new(),
            turn_number: 0,
        }
    }

    /// Persist the transcript after every appended turn
    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Subscribe to agent events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn phase(&self) -> Phase {
        self.conversation.phase()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Token that aborts the current turn between steps. A cancelled
    /// turn installs a fresh token, so fetch it again after one.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the current turn
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Run one user turn to completion: generate, dispatch tool calls one
    /// at a time until a generation has none, and return the final reply.
    pub async fn prompt(&mut self, input: &str) -> Result<TurnOutcome> {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        let cancel = self.cancel.clone();

        self.turn_number += 1;
        let turn_number = self.turn_number;
        let _ = self.event_tx.send(AgentEvent::TurnStart { turn_number });

        self.conversation.push_user(input);
        self.persist();
        self.conversation.transition(Phase::GeneratingAssistant)?;

        let mut usage = Usage::default();
        let mut tool_calls = 0u32;
        let mut round = 0u32;

        let outcome = loop {
            round += 1;
            if cancel.is_cancelled() {
                self.conversation.transition(Phase::AwaitingUser)?;
                self.cancel = CancellationToken::new();
                let _ = self.event_tx.send(AgentEvent::Error {
                    message: "Turn cancelled".into(),
                });
                return Err(Error::Cancelled);
            }
            let _ = self.event_tx.send(AgentEvent::GenerationStart { round });

            let completion = match self.generate_with_retry(&cancel).await {
                Ok(completion) => completion,
                Err(Error::Cancelled) => {
                    self.conversation.transition(Phase::AwaitingUser)?;
                    self.cancel = CancellationToken::new();
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    warn!(error = %e, "generation failed, replying with an apology");
                    let _ = self.event_tx.send(AgentEvent::Error {
                        message: e.to_string(),
                    });
                    break self.finish_reply(APOLOGY.to_string(), tool_calls, usage, true)?;
                }
            };
            usage.add(&completion.usage);
            self.conversation.add_usage(&completion.usage);

            let normalized = normalize_generation(&completion.text);
            if normalized.completed_terminator {
                debug!("completed a truncated terminator");
            }
            if let Some(thought) = internal_reasoning(&normalized.text) {
                debug!(thought, "internal reasoning");
            }

            match parse(&normalized.text) {
                ParseOutcome::NoCall { text } => {
                    break self.finish_reply(text.trim().to_string(), tool_calls, usage, false)?;
                }
                ParseOutcome::Call {
                    preamble,
                    call,
                    transcript,
                    force_closed,
                } => {
                    self.conversation.transition(Phase::AwaitingToolDispatch)?;
                    if force_closed {
                        debug!(tool = %call.name, "tool call was force-closed");
                    }
                    let visible = strip_internal(&preamble);
                    if !visible.is_empty() {
                        let _ = self.event_tx.send(AgentEvent::Preamble { text: visible });
                    }
                    self.conversation.push_assistant(transcript, true);
                    self.persist();

                    self.conversation.transition(Phase::ToolExecuting)?;
                    tool_calls += 1;
                    let result = self.dispatch(&call, &cancel).await;
                    self.conversation.push_tool_result(result.render());
                    self.persist();

                    self.conversation.transition(Phase::ResumingAfterTool)?;
                    self.conversation.transition(Phase::GeneratingAssistant)?;
                }
            }
        };

        let _ = self.event_tx.send(AgentEvent::TurnEnd {
            turn_number,
            tool_calls,
            usage,
        });
        Ok(outcome)
    }

    /// Append the final assistant turn and return to awaiting the user
    fn finish_reply(
        &mut self,
        reply: String,
        tool_calls: u32,
        usage: Usage,
        degraded: bool,
    ) -> Result<TurnOutcome> {
        self.conversation.push_assistant(reply.clone(), false);
        self.persist();
        self.conversation.transition(Phase::AwaitingUser)?;
        let _ = self.event_tx.send(AgentEvent::AssistantReply {
            text: reply.clone(),
            degraded,
        });
        Ok(TurnOutcome {
            reply,
            tool_calls,
            usage,
            degraded,
        })
    }

    fn request(&self) -> CompletionRequest {
        let mut request =
            CompletionRequest::new(self.conversation.render_prompt(), self.config.max_tokens)
                .with_stop(self.config.stop_markers.clone())
                .with_stream(self.config.stream)
                .with_timeout(self.config.generation_timeout);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }

    /// One generation over the whole transcript, retried per
    /// [`RetryConfig`]. An empty response counts as a failure.
    async fn generate_with_retry(&self, cancel: &CancellationToken) -> Result<Completion> {
        let mut attempt = 0u32;
        loop {
            let tx = self.event_tx.clone();
            let result = generate_text(
                self.transport.as_ref(),
                self.request(),
                self.config.generation_timeout,
                cancel,
                |delta| {
                    let _ = tx.send(AgentEvent::TextDelta {
                        delta: delta.to_string(),
                    });
                },
            )
            .await
            .and_then(|completion| {
                if completion.text.trim().is_empty() {
                    Err(Error::Generation("empty response".into()))
                } else {
                    Ok(completion)
                }
            });

            match result {
                Ok(completion) => return Ok(completion),
                Err(e) if e.is_retryable() && attempt < self.config.retry.max_retries => {
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.config.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "generation failed, retrying"
                    );
                    let _ = self.event_tx.send(AgentEvent::GenerationRetry {
                        attempt,
                        error: e.to_string(),
                    });
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve and execute one call. Every failure becomes an error result
    /// so the conversation can continue.
    async fn dispatch(&self, call: &RawCall, cancel: &CancellationToken) -> ToolResult {
        let (tool, invocation) = match self.registry.prepare(call) {
            Ok(prepared) => prepared,
            Err(err) => {
                warn!(tool = %call.name, error = %err, "tool call rejected");
                let _ = self.event_tx.send(AgentEvent::ToolExecutionStart {
                    tool_name: call.name.clone(),
                    raw_arguments: call.raw_arguments.clone(),
                    arguments: serde_json::Value::Null,
                });
                let result = ToolResult::from(err);
                let _ = self.event_tx.send(AgentEvent::ToolExecutionEnd {
                    tool_name: call.name.clone(),
                    result: result.payload.clone(),
                    succeeded: false,
                });
                return result;
            }
        };

        let _ = self.event_tx.send(AgentEvent::ToolExecutionStart {
            tool_name: invocation.name.clone(),
            raw_arguments: invocation.raw_arguments.clone(),
            arguments: invocation.resolved_arguments.as_value(),
        });

        let limit = tool.timeout().unwrap_or(self.config.tool_timeout);
        let execution = tool.execute(invocation.resolved_arguments.clone(), cancel.child_token());
        // Cancellation is observed after the tool returns; the child token lets it stop early
        let result = match tokio::time::timeout(limit, execution).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool = %invocation.name, seconds = limit.as_secs(), "tool timed out");
                ToolError::Timeout {
                    tool: invocation.name.clone(),
                    seconds: limit.as_secs(),
                }
                .into()
            }
        };

        info!(tool = %invocation.name, succeeded = result.succeeded, "tool finished");
        let _ = self.event_tx.send(AgentEvent::ToolExecutionEnd {
            tool_name: invocation.name.clone(),
            result: result.payload.clone(),
            succeeded: result.succeeded,
        });
        result
    }

    fn persist(&self) {
        let (Some(sink), Some(turn)) = (&self.sink, self.conversation.last()) else {
            return;
        };
        if let Err(e) = sink.record(turn, &self.conversation.render_transcript()) {
            warn!(error = %e, "failed to persist transcript");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Role, Turn};
    use crate::testing::{MockResponse, MockTransport};
    use crate::tool::{ParamType, ParameterSchema, ResolvedArguments, Tool};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// Returns a fixed payload and counts its executions
    struct CannedTool {
        name: &'static str,
        schema: ParameterSchema,
        payload: &'static str,
        calls: AtomicU32,
        seen: Mutex<Vec<serde_json::Value>>,
    }

    impl CannedTool {
        fn new(name: &'static str, schema: ParameterSchema, payload: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                schema,
                payload,
                calls: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Tool for CannedTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "canned"
        }
        fn parameters(&self) -> ParameterSchema {
            self.schema.clone()
        }
        async fn execute(
            &self,
            arguments: ResolvedArguments,
            _cancel: CancellationToken,
        ) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(arguments.as_value());
            ToolResult::text(self.payload)
        }
    }

    struct SleepyTool;

    #[async_trait]
    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "_sleepy"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::new()
        }
        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_secs(2))
        }
        async fn execute(&self, _: ResolvedArguments, _: CancellationToken) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(600)).await;
            ToolResult::text("late")
        }
    }

    /// Takes a second, then records that its work landed
    #[derive(Default)]
    struct SlowWriteTool {
        written: AtomicBool,
    }

    #[async_trait]
    impl Tool for SlowWriteTool {
        fn name(&self) -> &str {
            "_slow_write"
        }
        fn description(&self) -> &str {
            "writes after a second"
        }
        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::new()
        }
        async fn execute(&self, _: ResolvedArguments, _: CancellationToken) -> ToolResult {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.written.store(true, Ordering::SeqCst);
            ToolResult::text("Written.")
        }
    }

    #[derive(Default)]
    struct MemorySink {
        records: Mutex<Vec<(Turn, String)>>,
    }

    impl TranscriptSink for MemorySink {
        fn record(&self, turn: &Turn, transcript: &str) -> std::io::Result<()> {
            self.records.lock().push((turn.clone(), transcript.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        time: Arc<CannedTool>,
        search: Arc<CannedTool>,
        registry: Arc<ToolRegistry>,
    }

    fn fixture() -> Fixture {
        let time = CannedTool::new(
            "_time",
            ParameterSchema::new(),
            "Time and Date is [Mon Jun 10 09:00:00 2024]",
        );
        let search = CannedTool::new(
            "_search_the_internet",
            ParameterSchema::new().required("QUESTION", ParamType::String),
            "['Sunny, 24C']",
        );
        let registry = ToolRegistry::with_default_aliases()
            .with_tool(time.clone())
            .with_tool(search.clone())
            .with_tool(Arc::new(SleepyTool));
        Fixture {
            time,
            search,
            registry: Arc::new(registry),
        }
    }

    fn config() -> AgentConfig {
        AgentConfig {
            system_prompt: Some("You are Jay.".into()),
            retry: RetryConfig {
                initial_delay: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn agent(transport: Arc<MockTransport>, registry: Arc<ToolRegistry>) -> Agent {
        Agent::new(config(), transport, registry)
    }

    fn roles(agent: &Agent) -> Vec<Role> {
        agent.conversation().turns().iter().map(|t| t.role).collect()
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts(["  Hello! How can I help?"]));
        let mut agent = agent(transport.clone(), f.registry.clone());

        let outcome = agent.prompt("Hi Jay").await.unwrap();

        assert_eq!(outcome.reply, "Hello! How can I help?");
        assert_eq!(outcome.tool_calls, 0);
        assert!(!outcome.degraded);
        assert_eq!(agent.phase(), Phase::AwaitingUser);
        assert_eq!(roles(&agent), vec![Role::System, Role::User, Role::Assistant]);
        assert!(transport.prompts.lock()[0].ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n\t"));
    }

    #[tokio::test]
    async fn test_chained_calls_in_order() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts([
            "Let me check the time. to-system: _time() END_FUNC",
            "to-system: _search_the_internet(QUESTION = \"weather Sydney\") END_FU",
            "It's 9am and sunny, 24C.",
        ]));
        let mut agent = agent(transport.clone(), f.registry.clone());

        let outcome = agent.prompt("What time is it, and is it sunny?").await.unwrap();

        assert_eq!(outcome.reply, "It's 9am and sunny, 24C.");
        assert_eq!(outcome.tool_calls, 2);
        assert_eq!(
            roles(&agent),
            vec![
                Role::System,
                Role::User,
                Role::Assistant,
                Role::ToolResult,
                Role::Assistant,
                Role::ToolResult,
                Role::Assistant,
            ]
        );
        let turns = agent.conversation().turns();
        assert_eq!(
            turns[3].text,
            "to-Jay: Time and Date is [Mon Jun 10 09:00:00 2024]"
        );
        assert_eq!(turns[4].text, "to-system: _search_the_internet(QUESTION = \"weather Sydney\") END_FUNC");
        assert_eq!(turns[5].text, "to-Jay: ['Sunny, 24C']");
        assert_eq!(f.time.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.search.calls.load(Ordering::SeqCst), 1);

        // each later generation sees the previous result
        let prompts = transport.prompts.lock();
        assert_eq!(prompts.len(), 3);
        assert!(prompts[1].contains(
            "_time() END_FUNC(to-Jay: Time and Date is [Mon Jun 10 09:00:00 2024]). <|eot_id|>\n"
        ));
        assert!(prompts[2].contains("(to-Jay: ['Sunny, 24C']). "));
        assert_eq!(agent.phase(), Phase::AwaitingUser);
    }

    #[tokio::test]
    async fn test_unknown_tool_continues() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts([
            "to-system: _fly_to_the_moon(SPEED = 3) END_FUNC",
            "I can't do that, sorry.",
        ]));
        let mut agent = agent(transport, f.registry.clone());
        let mut events = agent.subscribe();

        let outcome = agent.prompt("Fly me to the moon").await.unwrap();

        assert_eq!(outcome.reply, "I can't do that, sorry.");
        let result = &agent.conversation().turns()[3];
        assert_eq!(result.role, Role::ToolResult);
        assert_eq!(
            result.text,
            "to-Jay: ERROR returned: \"_fly_to_the_moon\" is not a recognized tool"
        );

        let mut saw_failed_end = false;
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::ToolExecutionEnd { succeeded, .. } = event {
                saw_failed_end = !succeeded;
            }
        }
        assert!(saw_failed_end);
    }

    #[tokio::test]
    async fn test_weather_alias_dispatches_search() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts([
            "to-system: _get_weather(\"Sydney\") END_FUNC",
            "It's sunny in Sydney.",
        ]));
        let mut agent = agent(transport, f.registry.clone());

        agent.prompt("Weather in Sydney?").await.unwrap();

        assert_eq!(f.search.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            f.search.seen.lock()[0],
            serde_json::json!({ "QUESTION": "weather Sydney" })
        );
        assert_eq!(agent.conversation().turns()[3].text, "to-Jay: ['Sunny, 24C']");
    }

    #[tokio::test]
    async fn test_bad_arguments_become_error_result() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts([
            "to-system: _search_the_internet() END_FUNC",
            "Which question?",
        ]));
        let mut agent = agent(transport, f.registry.clone());

        agent.prompt("search").await.unwrap();

        let result = &agent.conversation().turns()[3].text;
        assert!(result.starts_with("to-Jay: ERROR returned: invalid arguments for _search_the_internet"));
        assert_eq!(f.search.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let f = fixture();
        let transport = Arc::new(MockTransport::new(vec![
            MockResponse::Fail("server_error".into()),
            MockResponse::Text("Hello again.".into()),
        ]));
        let mut agent = agent(transport.clone(), f.registry.clone());
        let mut events = agent.subscribe();

        let outcome = agent.prompt("Hi").await.unwrap();

        assert_eq!(outcome.reply, "Hello again.");
        assert!(!outcome.degraded);
        assert_eq!(transport.calls(), 2);
        let mut retries = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, AgentEvent::GenerationRetry { attempt: 1, .. }) {
                retries += 1;
            }
        }
        assert_eq!(retries, 1);
    }

    #[tokio::test]
    async fn test_persistent_failure_apologizes() {
        let f = fixture();
        let transport = Arc::new(MockTransport::new(vec![
            MockResponse::Fail("server_error".into()),
            MockResponse::Text("   ".into()),
            MockResponse::Text("never reached".into()),
        ]));
        let mut agent = agent(transport.clone(), f.registry.clone());

        let outcome = agent.prompt("Hi").await.unwrap();

        assert!(outcome.degraded);
        assert_eq!(outcome.reply, APOLOGY);
        assert_eq!(transport.calls(), 2);
        assert_eq!(agent.phase(), Phase::AwaitingUser);
        assert_eq!(agent.conversation().last().unwrap().text, APOLOGY);

        // the session stays usable
        let outcome = agent.prompt("Hi?").await.unwrap();
        assert_eq!(outcome.reply, "never reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_fails_closed() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts([
            "to-system: _sleepy() END_FUNC",
            "That took too long.",
        ]));
        let mut agent = agent(transport, f.registry.clone());

        let outcome = agent.prompt("Go slow").await.unwrap();

        assert_eq!(outcome.reply, "That took too long.");
        assert_eq!(
            agent.conversation().turns()[3].text,
            "to-Jay: ERROR returned: _sleepy timed out after 2s"
        );
    }

    #[tokio::test]
    async fn test_preamble_event_before_dispatch() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts([
            "<jay_internal>User wants the time.</jay_internal> One moment. to-system: _time() END_FUNC",
            "It is 9am.",
        ]));
        let mut agent = agent(transport, f.registry.clone());
        let mut events = agent.subscribe();

        agent.prompt("Time?").await.unwrap();

        let mut order = Vec::new();
        while let Ok(event) = events.try_recv() {
            match event {
                AgentEvent::Preamble { text } => order.push(format!("preamble:{}", text)),
                AgentEvent::ToolExecutionStart { tool_name, .. } => order.push(format!("start:{}", tool_name)),
                AgentEvent::AssistantReply { text, .. } => order.push(format!("reply:{}", text)),
                AgentEvent::TurnEnd { tool_calls, .. } => order.push(format!("end:{}", tool_calls)),
                _ => {}
            }
        }
        assert_eq!(
            order,
            vec!["preamble:One moment.", "start:_time", "reply:It is 9am.", "end:1"]
        );
    }

    #[tokio::test]
    async fn test_marker_in_prose_is_not_a_call() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts([
            "I write to-system: when I need a tool.",
        ]));
        let mut agent = agent(transport.clone(), f.registry.clone());

        let outcome = agent.prompt("How do you use tools?").await.unwrap();

        assert_eq!(outcome.tool_calls, 0);
        assert_eq!(outcome.reply, "I write to-system: when I need a tool.");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_sink_records_every_turn() {
        let f = fixture();
        let sink = Arc::new(MemorySink::default());
        let transport = Arc::new(MockTransport::texts([
            "to-system: _time() END_FUNC",
            "It is 9am.",
        ]));
        let mut agent = agent(transport, f.registry.clone()).with_sink(sink.clone());

        agent.prompt("Time?").await.unwrap();

        let records = sink.records.lock();
        let recorded: Vec<Role> = records.iter().map(|(t, _)| t.role).collect();
        assert_eq!(
            recorded,
            vec![Role::User, Role::Assistant, Role::ToolResult, Role::Assistant]
        );
        let (_, last_transcript) = records.last().unwrap();
        assert_eq!(*last_transcript, agent.conversation().render_transcript());
    }

    #[tokio::test]
    async fn test_cancelled_turn() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts(["unused"]));
        let mut agent = agent(transport.clone(), f.registry.clone());

        // a stale cancellation does not leak into the next turn
        agent.abort();
        let outcome = agent.prompt("Hi").await.unwrap();
        assert_eq!(outcome.reply, "unused");
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_tool() {
        let writer = Arc::new(SlowWriteTool::default());
        let registry = Arc::new(ToolRegistry::new().with_tool(writer.clone()));
        let transport = Arc::new(MockTransport::texts([
            "to-system: _slow_write() END_FUNC",
            "never generated",
        ]));
        let mut agent = agent(transport.clone(), registry);

        let token = agent.cancel_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let err = agent.prompt("Write it").await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(writer.written.load(Ordering::SeqCst));
        assert_eq!(agent.phase(), Phase::AwaitingUser);
        assert_eq!(agent.conversation().last().unwrap().text, "to-Jay: Written.");
        assert!(!agent.cancel_token().is_cancelled());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_usage_accumulates_across_rounds() {
        let f = fixture();
        let transport = Arc::new(MockTransport::texts([
            "to-system: _time() END_FUNC",
            "It is nine.",
        ]));
        let mut agent = agent(transport, f.registry.clone());

        let outcome = agent.prompt("Time?").await.unwrap();

        // 10 prompt tokens per round in the mock
        assert_eq!(outcome.usage.prompt, 20);
        assert_eq!(agent.conversation().total_usage, outcome.usage);
    }
}
