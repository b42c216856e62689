//! Self-correcting code synthesis for math questions.
//!
//! A problem is optionally restated, then a generation writes a Python
//! fragment that is inspected and run. A failed run is handed back to the
//! model together with the exact error so it can rewrite the code. The
//! number of executions is bounded; when they are used up the caller gets
//! [`SENTINEL`] instead of an answer.

use async_trait::async_trait;
use jay_ai::CompletionRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::protocol::{BEGIN_OF_TEXT, END_OF_TURN, role_header};
use crate::sandbox::{CodeRunner, ExecutionOutcome, extract_code, inspect};
use crate::tool::{ParamType, ParameterSchema, ResolvedArguments, Tool, ToolResult};
use crate::transport::{Transport, generate_text};

/// Returned in place of a value when every attempt failed
pub const SENTINEL: &str = "Code run unsuccessfully";

const PLAN_SYSTEM: &str = "You are a helpful mathematical assistant who rewrites difficult math \
problems so they are simple and easy to understand.
If it is clearer, split the problem into a set of smaller problems.
Keep the exact case of any strings in the question.
Do not answer the question. Only rewrite it.";

const CODE_RULES: &str = "Write the solution as Python 3.11 code starting with \"```python\".
Put everything, including helper functions, inside a function called \"main()\".
\"main()\" returns the answer. Never print anything and never call \"input\".
Do all arithmetic in the code, not in your reasoning. Prefer sympy or numpy where they help.
Dates are written day/month/year.
When there are several answers, return all of them.
Comment the code so a reader can follow each step. Do not repeat yourself.";

const CODER_SYSTEM: &str = "You are an LLM that solves math problems with Python.
First write out, in plain language, the steps needed to solve the problem.
Then write the code, using that reasoning.";

const REFINER_SYSTEM: &str = "You are an LLM that fixes Python code written to solve a math problem.
You are given the question, the previous response with its code, and the error the code raised.
Rewrite the code so it runs without error and answers the question correctly.";

/// Synthesis limits
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Total executions, including the first
    pub max_attempts: u32,
    /// Restate the problem before writing code
    pub plan: bool,
    pub max_tokens: u32,
    pub generation_timeout: Duration,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            plan: true,
            max_tokens: 2048,
            generation_timeout: Duration::from_secs(120),
        }
    }
}

/// One generate-and-execute round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisAttempt {
    pub attempt_number: u32,
    pub generated_code: String,
    pub outcome: ExecutionOutcome,
    /// Error fed into this attempt's prompt
    pub prior_error: Option<String>,
}

/// Final result of [`Synthesizer::solve`]
#[derive(Debug, Clone)]
pub struct Synthesis {
    /// The answer, or [`SENTINEL`]
    pub value: String,
    /// Code of the last attempt
    pub code: String,
    pub attempts: Vec<SynthesisAttempt>,
    pub succeeded: bool,
}

pub struct Synthesizer {
    transport: Arc<dyn Transport>,
    runner: Arc<dyn CodeRunner>,
    config: SynthesisConfig,
}

impl Synthesizer {
    pub fn new(
        transport: Arc<dyn Transport>,
        runner: Arc<dyn CodeRunner>,
        config: SynthesisConfig,
    ) -> Self {
        Self {
            transport,
            runner,
            config,
        }
    }

    pub fn config(&self) -> &SynthesisConfig {
        &self.config
    }

    /// Solve `problem`. Never fails; exhaustion yields [`SENTINEL`].
    pub async fn solve(&self, problem: &str, cancel: &CancellationToken) -> Synthesis {
        let restated = if self.config.plan {
            self.restate(problem, cancel).await
        } else {
            None
        };
        let question = match restated {
            Some(restated) => format!("{}\n{}", problem, restated),
            None => problem.to_string(),
        };

        let mut attempts: Vec<SynthesisAttempt> = Vec::new();
        // (previous response, its error)
        let mut previous: Option<(String, String)> = None;

        for attempt_number in 1..=self.config.max_attempts {
            if cancel.is_cancelled() {
                break;
            }

            let prompt = match &previous {
                None => coder_prompt(&question),
                Some((response, error)) => refiner_prompt(problem, response, error),
            };
            let prior_error = previous.as_ref().map(|(_, error)| error.clone());

            let (response, code, outcome) = match self.generate(prompt, cancel).await {
                Ok(response) => {
                    let code = extract_code(&response);
                    match inspect(&code) {
                        Ok(cleaned) => {
                            // a started run finishes or hits the runner's own limit
                            let outcome = self.runner.run(&cleaned).await;
                            (response, cleaned, outcome)
                        }
                        Err(error) => (response, code, ExecutionOutcome::Failure(error)),
                    }
                }
                Err(e) => {
                    let response = previous.as_ref().map(|(r, _)| r.clone()).unwrap_or_default();
                    let code = attempts
                        .last()
                        .map(|a| a.generated_code.clone())
                        .unwrap_or_default();
                    (
                        response,
                        code,
                        ExecutionOutcome::Failure(format!("The response could not be generated: {}", e)),
                    )
                }
            };

            tracing::debug!(
                attempt = attempt_number,
                success = outcome.is_success(),
                outcome = outcome.text(),
                "synthesis attempt finished"
            );

            attempts.push(SynthesisAttempt {
                attempt_number,
                generated_code: code.clone(),
                outcome: outcome.clone(),
                prior_error,
            });

            match outcome {
                ExecutionOutcome::Success(value) => {
                    tracing::info!(attempts = attempts.len(), "synthesis succeeded");
                    return Synthesis {
                        value,
                        code,
                        attempts,
                        succeeded: true,
                    };
                }
                ExecutionOutcome::Failure(error) => previous = Some((response, error)),
            }
        }

        tracing::warn!(attempts = attempts.len(), "synthesis gave up");
        Synthesis {
            value: SENTINEL.to_string(),
            code: attempts
                .last()
                .map(|a| a.generated_code.clone())
                .unwrap_or_default(),
            attempts,
            succeeded: false,
        }
    }

    /// Best effort; a failed restatement falls back to the raw problem
    async fn restate(&self, problem: &str, cancel: &CancellationToken) -> Option<String> {
        match self.generate(plan_prompt(problem), cancel).await {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "problem restatement failed");
                None
            }
        }
    }

    async fn generate(&self, prompt: String, cancel: &CancellationToken) -> crate::Result<String> {
        let request = CompletionRequest::new(prompt, self.config.max_tokens)
            .with_stop([END_OF_TURN])
            .with_timeout(self.config.generation_timeout);
        let completion = generate_text(
            self.transport.as_ref(),
            request,
            self.config.generation_timeout,
            cancel,
            |_| {},
        )
        .await?;
        Ok(completion.text)
    }
}

fn chat(system: &str, user: &str, assistant_prefill: &str) -> String {
    format!(
        "{}{}{}{}\n{}\t{}{}\n{}\t{}",
        BEGIN_OF_TEXT,
        role_header("system"),
        system,
        END_OF_TURN,
        role_header("user"),
        user,
        END_OF_TURN,
        role_header("assistant"),
        assistant_prefill,
    )
}

fn plan_prompt(problem: &str) -> String {
    chat(PLAN_SYSTEM, &format!("Question: [{}].", problem), "")
}

fn coder_prompt(question: &str) -> String {
    chat(
        &format!("{}\n{}", CODER_SYSTEM, CODE_RULES),
        &format!("Question: [{}].", question),
        "",
    )
}

fn refiner_prompt(problem: &str, previous: &str, error: &str) -> String {
    chat(
        &format!("{}\n{}", REFINER_SYSTEM, CODE_RULES),
        &format!(
            "Question: [{}].\nPrevious Code: [{}]. Error Message: [{}].",
            problem, previous, error
        ),
        "",
    )
}

/// `_calculator(MATH)`: answers a math question with synthesized code
pub struct CalculatorTool {
    synthesizer: Synthesizer,
    timeout: Duration,
}

impl CalculatorTool {
    pub fn new(synthesizer: Synthesizer) -> Self {
        // every attempt may need a full generation plus a run
        let per_attempt = synthesizer.config().generation_timeout + Duration::from_secs(30);
        let timeout = per_attempt * (synthesizer.config().max_attempts + 1);
        Self {
            synthesizer,
            timeout,
        }
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "_calculator"
    }

    fn description(&self) -> &str {
        "Solves a math question written in plain language by writing and running Python code. Use it for any arithmetic."
    }

    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::new()
            .required("MATH", ParamType::String)
            .describe("The math question, in plain language")
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }

    async fn execute(&self, arguments: ResolvedArguments, cancel: CancellationToken) -> ToolResult {
        let Some(problem) = arguments.str("MATH") else {
            return ToolResult::error("MATH is required");
        };
        let synthesis = self.synthesizer.solve(problem, &cancel).await;
        if synthesis.succeeded {
            ToolResult::text(format!("['{}']", synthesis.value))
        } else {
            ToolResult::error(SENTINEL)
        }
    }
}
