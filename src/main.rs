//! # Main Entry Point
//!
//! Loads the configuration, wires the production ports into the agent loop and runs one
//! prompt to completion. Ctrl-C cancels the run; MCP servers are always disconnected on exit.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use warden::application::engine::{AgentLoop, AgentPorts};
use warden::application::logging::init_logging;
use warden::domain::config::AppConfig;
use warden::domain::types::{ApprovalPolicy, InputContent, RunOutcome};
use warden::infrastructure::llm::Client as LlmClient;
use warden::infrastructure::mcp::McpClientFactory;
use warden::infrastructure::tools::SandboxedExecutor;
use warden::interface::terminal::{TerminalConfirm, TerminalSink};

#[derive(Debug, Parser)]
#[command(name = "warden", version, about = "Run a coding agent against a working directory")]
struct Cli {
    /// Path to the YAML configuration
    #[arg(long, default_value = "data/config.yaml")]
    config: PathBuf,

    /// suggest, auto-edit or full-auto
    #[arg(long, value_parser = parse_policy)]
    approval_mode: Option<ApprovalPolicy>,

    /// Shorthand for --approval-mode full-auto
    #[arg(long, conflicts_with = "approval_mode")]
    full_auto: bool,

    /// Overrides model.model
    #[arg(long)]
    model: Option<String>,

    /// Working directory for native commands (defaults to the current directory)
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Image to attach to the prompt (URL or local path); repeatable
    #[arg(long = "image")]
    images: Vec<String>,

    /// The task for the agent
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,
}

fn parse_policy(value: &str) -> Result<ApprovalPolicy, String> {
    ApprovalPolicy::from_str(value)
        .ok_or_else(|| format!("unknown approval mode '{value}' (expected suggest, auto-edit or full-auto)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration
    let mut config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if cli.full_auto {
        config.approval_mode = ApprovalPolicy::FullAuto;
    } else if let Some(policy) = cli.approval_mode {
        config.approval_mode = policy;
    }
    if let Some(model) = cli.model {
        config.model.model = model;
    }
    config.validate().context("Invalid configuration after CLI overrides")?;

    // 2. Logging
    let _guard = init_logging(&config.logging)?;
    tracing::info!(
        model = %config.model.model,
        approval_mode = %config.approval_mode,
        servers = config.enabled_servers().count(),
        "Starting Warden..."
    );

    let workdir = match cli.workdir {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let workdir = workdir
        .canonicalize()
        .with_context(|| format!("Working directory {} does not exist", workdir.display()))?;

    // 3. Ports
    let model = LlmClient::new(&config.model).context("Failed to create model client")?;
    let executor = SandboxedExecutor::from_config(&config.exec, &config.sandbox);
    if config.approval_mode == ApprovalPolicy::FullAuto {
        tracing::info!(sandbox = ?executor.sandbox_kind(), "full-auto commands run sandboxed");
    }
    let sink = Arc::new(TerminalSink::default());
    let ports = AgentPorts {
        model: Arc::new(model),
        confirm: Arc::new(TerminalConfirm),
        items: sink.clone(),
        progress: sink,
        factory: Arc::new(McpClientFactory),
        executor: Arc::new(executor),
    };

    // 4. Agent loop
    let mut agent = AgentLoop::connect(&config, workdir, ports).await;
    for (server, state) in agent.server_states() {
        if !state.is_connected() {
            eprintln!("MCP server '{server}' unavailable: {state}");
        }
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let mut inputs = vec![InputContent::text(cli.prompt.join(" "))];
    inputs.extend(cli.images.into_iter().map(InputContent::image));

    let outcome = agent.run(inputs, &cancel).await;
    agent.terminate().await;

    match outcome.context("Agent run failed")? {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Cancelled => {
            eprintln!("Run cancelled.");
            Ok(())
        }
        RunOutcome::Aborted => {
            eprintln!("Run aborted.");
            Ok(())
        }
        RunOutcome::TurnLimit => bail!(
            "Stopped after {} model turns without a final answer",
            config.agent.max_turns
        ),
    }
}
