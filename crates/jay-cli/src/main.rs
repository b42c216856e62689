//! jay - a conversational assistant that calls tools through a text protocol

mod config;
mod prompt;
mod session;
mod tools;
mod utils;

use clap::Parser;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use jay_agent::protocol::strip_internal;
use jay_agent::{
    Agent, AgentConfig, AgentEvent, CalculatorTool, Error, PythonRunner, RetryConfig,
    SynthesisConfig, Synthesizer, ToolRegistry, Transport,
};
use jay_ai::Model;
use jay_ai::providers::CompletionsProvider;

/// What the user's last word is answered with
const FAREWELL: &str = "That will be all, thank you.";

/// jay - a conversational assistant
#[derive(Parser, Debug)]
#[command(name = "jay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Model to use (default: meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo)
    #[arg(short, long)]
    model: Option<String>,

    /// OpenAI-compatible endpoint, e.g. http://127.0.0.1:8080/v1
    #[arg(long)]
    base_url: Option<String>,

    /// Run in non-interactive mode with a single prompt
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Print the whole reply at once instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::new("jay=debug,jay_agent=debug,jay_ai=debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();

    // CLI takes precedence over the config file
    let model_id = args
        .model
        .or(cfg.model.clone())
        .unwrap_or_else(|| config::DEFAULT_MODEL.to_string());
    let base_url = args.base_url.or(cfg.base_url.clone());
    let model = jay_ai::models::resolve_model(&model_id, base_url.as_deref());
    let stream = !args.no_stream && cfg.stream;

    let api_key_var = model.provider.api_key_env_var();
    let api_key = cfg.get_api_key(api_key_var);
    if let (Some(var), None) = (api_key_var, &api_key) {
        eprintln!("Error: No API key found for {}", model.provider.name());
        eprintln!();
        eprintln!("Set your API key with: export {}=your-key", var);
        eprintln!("Or add it to config file: jay --init-config");
        std::process::exit(1);
    }

    let provider = Arc::new(CompletionsProvider::new(api_key));
    let transport: Arc<dyn Transport> =
        Arc::new(jay_agent::ProviderTransport::new(provider, model.clone()));

    let registry = Arc::new(build_registry(&cfg, transport.clone()));

    let retry = RetryConfig {
        max_retries: cfg.generation.max_retries,
        initial_delay: cfg.generation.retry_delay(),
        ..Default::default()
    };
    let agent_config = AgentConfig {
        system_prompt: Some(prompt::build_system_prompt(&registry)),
        max_tokens: cfg.max_tokens,
        stream,
        generation_timeout: cfg.generation.timeout(),
        tool_timeout: cfg.tool_timeout(),
        retry,
        ..Default::default()
    };
    let mut agent = Agent::new(agent_config, transport, registry);

    match session::TranscriptWriter::create(&cfg.transcripts_dir(), &model.id) {
        Ok(writer) => {
            tracing::debug!(
                transcript = %writer.snapshot_path().display(),
                log = %writer.log_path().display(),
                "writing transcript"
            );
            agent = agent.with_sink(Arc::new(writer));
        }
        Err(e) => {
            tracing::warn!(error = %e, "transcripts disabled");
        }
    }

    if let Some(command) = args.command {
        return run_command(&mut agent, &command, stream).await;
    }

    run_interactive(&mut agent, &model, stream).await
}

/// Every built-in tool plus the calculator
fn build_registry(cfg: &config::Config, transport: Arc<dyn Transport>) -> ToolRegistry {
    let todo = tools::TodoList::new(cfg.todo_file());

    let runner = Arc::new(PythonRunner::new(
        cfg.sandbox.interpreter.clone(),
        Duration::from_secs(cfg.sandbox.timeout_secs),
        cfg.sandbox.memory_limit_mb,
    ));
    let synthesizer = Synthesizer::new(
        transport,
        runner,
        SynthesisConfig {
            max_attempts: cfg.sandbox.max_attempts,
            generation_timeout: cfg.generation.timeout(),
            ..Default::default()
        },
    );

    ToolRegistry::with_default_aliases()
        .with_tool(Arc::new(tools::TimeTool::new()))
        .with_tool(Arc::new(tools::TimerTool::new(Arc::new(tools::TerminalNotifier))))
        .with_tool(Arc::new(tools::SaveNoteTool::new(cfg.notes_dir())))
        .with_tool(Arc::new(tools::TodoAddTool::new(todo.clone())))
        .with_tool(Arc::new(tools::TodoDeleteTool::new(todo.clone())))
        .with_tool(Arc::new(tools::TodoReadTool::new(todo)))
        .with_tool(Arc::new(tools::ReadFileTool::new(cfg.files_dir())))
        .with_tool(Arc::new(CalculatorTool::new(synthesizer)))
}

/// Print agent events for one turn
fn spawn_printer(agent: &Agent, stream: bool) -> JoinHandle<()> {
    let mut receiver = agent.subscribe();
    tokio::spawn(async move {
        let mut visible = utils::VisibleText::new();
        while let Ok(event) = receiver.recv().await {
            match event {
                AgentEvent::TextDelta { delta } if stream => {
                    print!("{}", visible.push(&delta));
                    io::stdout().flush().ok();
                }
                AgentEvent::GenerationStart { round } if stream => {
                    visible = utils::VisibleText::new();
                    if round > 1 {
                        println!();
                    }
                }
                AgentEvent::GenerationRetry { attempt, error } => {
                    eprintln!("\n[retrying generation ({}): {}]", attempt, error);
                }
                AgentEvent::Preamble { text } if !stream => {
                    println!("{}", text);
                }
                AgentEvent::ToolExecutionStart { tool_name, .. } => {
                    print!("\n[{}...", tool_name);
                    io::stdout().flush().ok();
                }
                AgentEvent::ToolExecutionEnd {
                    result, succeeded, ..
                } => {
                    let preview = utils::truncate_chars(&result, 80).replace('\n', " ");
                    if succeeded {
                        println!(" {}]", preview);
                    } else {
                        println!(" error]");
                        println!("  {}", preview);
                    }
                }
                AgentEvent::AssistantReply { text, degraded } => {
                    if stream && !degraded {
                        println!("{}", visible.finish());
                    } else {
                        println!("{}", strip_internal(&text));
                    }
                }
                AgentEvent::TurnEnd { usage, .. } => {
                    if std::io::IsTerminal::is_terminal(&io::stderr()) {
                        eprintln!("[{} in, {} out]", usage.prompt, usage.completion);
                    }
                }
                AgentEvent::Error { message } => {
                    eprintln!("\nError: {}", message);
                }
                _ => {}
            }
        }
    })
}

/// Run one turn; Ctrl-C aborts it
async fn run_turn(agent: &mut Agent, input: &str, stream: bool) -> Result<(), Error> {
    let printer = spawn_printer(agent, stream);

    let token = agent.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let result = agent.prompt(input).await;
    interrupt.abort();

    // Wait a bit for final events
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();

    result.map(|_| ())
}

async fn run_command(agent: &mut Agent, command: &str, stream: bool) -> anyhow::Result<()> {
    println!("jay> {}", command);
    println!();

    run_turn(agent, command, stream).await?;
    Ok(())
}

async fn run_interactive(agent: &mut Agent, model: &Model, stream: bool) -> anyhow::Result<()> {
    if std::io::IsTerminal::is_terminal(&io::stderr()) {
        let model_short = model.id.split('/').next_back().unwrap_or(&model.id);
        eprintln!("jay ({})", model_short);
        eprintln!("Type exit, stop or cls to leave.");
        eprintln!();
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if utils::is_exit_word(input) {
            println!();
            if let Err(e) = run_turn(agent, FAREWELL, stream).await {
                tracing::debug!(error = %e, "farewell turn failed");
            }
            break;
        }

        println!();
        match run_turn(agent, input, stream).await {
            Ok(()) => {}
            Err(Error::Cancelled) => eprintln!("[cancelled]"),
            Err(e) => eprintln!("Error: {}", e),
        }
        println!();
    }

    Ok(())
}
