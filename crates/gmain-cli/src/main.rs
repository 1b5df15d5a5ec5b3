//! gmain — interactive coding agent.
//!
//! Thin shell over `gmain-core`: argument parsing, config loading,
//! logging setup and a line-oriented REPL. All loop logic lives in the
//! core.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use gmain_core::agent::{Agent, AgentConfig, AgentEvent, AgentServices, SubAgentExecutor};
use gmain_core::agents::{register_builtin_agents, AgentRegistry};
use gmain_core::ai::{AuthType, Client, Transport};
use gmain_core::compaction::ModelLimits;
use gmain_core::permission::{AskRequest, AskResponse, Evaluator, PermissionPrompt, RepeatCallDetector};
use gmain_core::tools::{SwitchAgentTool, TaskTool, ToolRegistry};
use gmain_core::Config;

/// gmain — AI coding agent
#[derive(Parser)]
#[command(name = "gmain", about = "Interactive coding agent", version)]
struct Cli {
    /// Model id override
    #[arg(long)]
    model: Option<String>,

    /// API base URL override
    #[arg(long)]
    base_url: Option<String>,

    /// Persona to start with
    #[arg(long, default_value = "build")]
    agent: String,

    /// Working directory (defaults to the current directory)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// One-shot prompt; omit to enter the REPL
    prompt: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = config_file_path()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .map(|data| Config::from_json(&data))
        .transpose()
        .context("failed to parse config file")?
        .unwrap_or_default();

    // ANTHROPIC_AUTH_TOKEN takes precedence (Bearer token for proxies).
    if let Ok(token) = std::env::var("ANTHROPIC_AUTH_TOKEN") {
        if !token.is_empty() {
            config.credential = token;
            config.auth_type = AuthType::Bearer;
        }
    } else if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
        if !key.is_empty() {
            config.credential = key;
            config.auth_type = AuthType::ApiKey;
        }
    }

    if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
        if !url.is_empty() {
            config.base_url = Some(url);
        }
    }
    if let Ok(model) = std::env::var("GMAIN_MODEL") {
        if !model.is_empty() {
            config.model = model;
        }
    }

    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(url) = &cli.base_url {
        config.base_url = Some(url.clone());
    }

    config.validate()?;
    Ok(config)
}

fn config_file_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".gmain-agent").join("config.json"))
}

fn init_logging(config: &Config) -> Result<()> {
    let Some(path) = &config.log_file else {
        return Ok(());
    };

    if let Some(parent) = PathBuf::from(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create log file {path}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

async fn read_stdin_line() -> Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        let mut buffer = String::new();
        match std::io::stdin().read_line(&mut buffer) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(buffer)),
            Err(err) => Err(err),
        }
    })
    .await??;
    Ok(line)
}

/// Terminal y/n/always prompt for ask-action permissions.
struct TerminalPrompt;

#[async_trait]
impl PermissionPrompt for TerminalPrompt {
    async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        println!("\n[permission] {} → {}", request.permission, request.pattern);
        if !request.message.is_empty() {
            println!("{}", request.message);
        }
        print!("Allow? [y]es / [n]o / [a]lways: ");
        std::io::stdout().flush()?;

        let answer = read_stdin_line().await?.unwrap_or_default();
        let answer = answer.trim().to_ascii_lowercase();

        Ok(match answer.as_str() {
            "y" | "yes" => AskResponse {
                approved: true,
                rejected: false,
                always: false,
            },
            "a" | "always" => AskResponse {
                approved: true,
                rejected: false,
                always: true,
            },
            _ => AskResponse {
                approved: false,
                rejected: true,
                always: false,
            },
        })
    }
}

fn print_event(event: AgentEvent) {
    match event {
        AgentEvent::Text { text } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        AgentEvent::ToolUseStart { name, .. } => {
            println!("\n[tool] {name} ...");
        }
        AgentEvent::ToolUseEnd { name, is_error, .. } => {
            if is_error {
                println!("[tool] {name} failed");
            } else {
                println!("[tool] {name} done");
            }
        }
        AgentEvent::AgentSwitch { name } => {
            println!("\n[agent] switched to {name}");
        }
        AgentEvent::Compaction { info } => {
            println!("\n[compaction] {info}");
        }
        AgentEvent::TokenUsage { .. } => {}
        AgentEvent::Error { message } => {
            eprintln!("\n[error] {message}");
        }
        AgentEvent::ConversationEnd { note } => {
            if let Some(note) = note {
                println!("\n[{note}]");
            }
            println!();
        }
    }
}

async fn build_agent(config: &Config, cli: &Cli) -> Result<Agent> {
    let work_dir = cli
        .work_dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut client = Client::new(config.credential.clone())
        .with_auth_type(config.auth_type)
        .with_model(config.model.clone())
        .with_max_tokens(config.max_tokens)
        .with_timeout(Duration::from_secs(config.request_timeout_secs));
    if let Some(base_url) = &config.base_url {
        client = client.with_base_url(base_url.clone());
    }
    let transport: Arc<dyn Transport> = Arc::new(client);

    let agents = Arc::new(AgentRegistry::new());
    register_builtin_agents(&agents)?;

    let evaluator = Arc::new(Evaluator::new());
    let repeat = Arc::new(RepeatCallDetector::new());
    let limits = ModelLimits::default();

    let executor = Arc::new(SubAgentExecutor::new(
        transport.clone(),
        agents.clone(),
        evaluator.clone(),
        repeat.clone(),
        work_dir.clone(),
        limits,
    ));

    let tools = Arc::new(ToolRegistry::new());
    executor.bind_tools(&tools);

    tools
        .register(Arc::new(TaskTool::new(agents.clone(), executor)))
        .await;
    tools.register(Arc::new(SwitchAgentTool)).await;

    let agent = Agent::new(
        AgentServices {
            transport,
            tools,
            agents,
            evaluator,
            repeat,
            prompt: Some(Arc::new(TerminalPrompt)),
        },
        AgentConfig {
            session_id: String::new(),
            work_dir,
            initial_agent: cli.agent.clone(),
            limits,
        },
    )?;

    agent.set_event_handler(Box::new(print_event));
    Ok(agent)
}

/// Run one turn, cancellable with ctrl-c.
async fn run_turn(agent: &Agent, line: &str) {
    let cancel = CancellationToken::new();
    let chat = agent.chat(&cancel, line);
    tokio::pin!(chat);

    let result = loop {
        tokio::select! {
            result = &mut chat => break result,
            _ = tokio::signal::ctrl_c() => {
                println!("\n[cancelling...]");
                cancel.cancel();
            }
        }
    };

    if let Err(err) = result {
        if err.is::<gmain_core::Cancelled>() {
            println!("[turn cancelled]");
        } else {
            eprintln!("[error] {err:#}");
        }
    }
}

async fn repl(agent: Agent) -> Result<()> {
    println!("gmain — type a request, /agent <name>, /clear, /usage or /quit");

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = read_stdin_line().await? else {
            break;
        };
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(a, b)| (a, b)) {
            ("/quit", _) | ("/exit", _) => break,
            ("/clear", _) => {
                agent.clear();
                println!("[conversation cleared]");
            }
            ("/usage", _) => {
                let totals = agent.token_usage();
                println!(
                    "input: {}  output: {}  cache read: {}  cache write: {}",
                    totals.input, totals.output, totals.cache_read, totals.cache_write
                );
            }
            ("/agent", name) if !name.is_empty() => {
                if let Err(err) = agent.switch_agent(name.trim()) {
                    eprintln!("[error] {err}");
                }
            }
            _ => run_turn(&agent, line).await,
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    init_logging(&config)?;

    let agent = build_agent(&config, &cli).await?;

    match &cli.prompt {
        Some(prompt) => {
            run_turn(&agent, prompt).await;
            Ok(())
        }
        None => repl(agent).await,
    }
}
