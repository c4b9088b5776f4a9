#![forbid(unsafe_code)]

//! `acp-relay` — console front-end for the relay engine.
//!
//! Loads configuration, starts the engine with a stdout delivery, and reads
//! chat input and slash commands from stdin.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use acp_relay::driver::console::ConsoleDelivery;
use acp_relay::driver::TargetId;
use acp_relay::models::content::PromptInput;
use acp_relay::models::session::SessionId;
use acp_relay::orchestrator::dispatcher::Dispatcher;
use acp_relay::orchestrator::registry::AgentStatus;
use acp_relay::{AppError, RelayConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "acp-relay", about = "Relay chat input to ACP agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Agent to start and make active.
    #[arg(long, default_value = "default")]
    agent: String,
}

/// One parsed line of console input.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Prompt(PromptInput),
    Agent(String),
    Load(String),
    Cancel,
    Restart,
    Mode(String),
    Model(String),
    Agents,
    Delete(String),
    Status,
    Quit,
    Empty,
    Invalid(String),
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("acp-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match &args.config {
        Some(path) => RelayConfig::load_from_path(path)?,
        None => {
            let config = RelayConfig::default();
            config.validate()?;
            config
        }
    };
    let config = Arc::new(config);
    info!(command = config.agent.command, "configuration loaded");

    // ── Start the engine ────────────────────────────────
    let (dispatcher, runtime) = Dispatcher::start(config, Arc::new(ConsoleDelivery::new()));

    let mut current = args.agent.clone();
    match dispatcher.switch_agent(&current, target_for(&current)).await {
        Ok(session_id) => info!(agent = current, %session_id, "agent ready"),
        Err(err) => error!(agent = current, %err, "agent failed to start; use /restart or /agent"),
    }

    // ── Console loop ────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("stdin closed");
                break;
            }
            Err(err) => {
                error!(%err, "failed to read stdin");
                break;
            }
        };

        match parse_input(&line) {
            Input::Quit => break,
            Input::Empty => {}
            Input::Invalid(reason) => println!("{reason}"),
            Input::Prompt(input) => {
                // Runs off the console loop so /cancel stays responsive.
                let dispatcher = dispatcher.clone();
                let agent = current.clone();
                tokio::spawn(async move {
                    if let Err(err) = dispatcher.prompt(Some(&agent), input).await {
                        warn!(agent, %err, "prompt failed");
                    }
                });
            }
            Input::Agent(name) => match dispatcher.switch_agent(&name, target_for(&name)).await {
                Ok(session_id) => {
                    println!("active agent: {name} (session {session_id})");
                    current = name;
                }
                Err(err) => println!("cannot switch to {name}: {err}"),
            },
            Input::Load(session_id) => report(load_into(&dispatcher, &current, session_id).await),
            Input::Cancel => report(dispatcher.cancel(Some(&current)).await),
            Input::Restart => match dispatcher.restart(Some(&current)).await {
                Ok(session_id) => println!("restarted {current} (session {session_id})"),
                Err(err) => println!("restart failed: {err}"),
            },
            Input::Mode(mode) => report(dispatcher.set_mode(Some(&current), &mode).await),
            Input::Model(model) => report(dispatcher.set_model(Some(&current), &model).await),
            Input::Agents => match dispatcher.list_agents().await {
                Ok(agents) if agents.is_empty() => println!("no agents"),
                Ok(agents) => agents.iter().for_each(|status| println!("{}", status_line(status))),
                Err(err) => println!("{err}"),
            },
            Input::Delete(name) => report(dispatcher.delete_agent(&name).await),
            Input::Status => match dispatcher.describe(Some(&current)).await {
                Ok(status) => println!("{}", status_line(&status)),
                Err(err) => println!("{err}"),
            },
        }
    }

    // ── Graceful shutdown ───────────────────────────────
    dispatcher.settle().await;
    if let Err(err) = dispatcher.shutdown().await {
        warn!(%err, "shutdown did not complete cleanly");
    }
    drop(dispatcher);
    let _ = tokio::join!(runtime.worker, runtime.delivery);
    info!("acp-relay shut down");

    Ok(())
}

/// Replace the current agent's session with a persisted one.
async fn load_into(dispatcher: &Dispatcher, agent: &str, session_id: String) -> Result<()> {
    match dispatcher.delete_agent(agent).await {
        Ok(()) | Err(AppError::NotFound(_)) => {}
        Err(err) => return Err(err),
    }
    let target = target_for(agent);
    let loaded = dispatcher
        .load_session(agent, SessionId::from(session_id.as_str()), target.clone())
        .await?;
    dispatcher.switch_agent(agent, target).await?;
    println!("loaded session {loaded} into {agent}");
    Ok(())
}

fn target_for(agent: &str) -> TargetId {
    TargetId::from(agent)
}

fn report(result: Result<()>) {
    match result {
        Ok(()) => println!("ok"),
        Err(err) => println!("{err}"),
    }
}

fn status_line(status: &AgentStatus) -> String {
    let marker = if status.active { "*" } else { " " };
    let state = match (&status.session_id, &status.fault) {
        (_, Some(fault)) => format!("unavailable: {fault}"),
        (Some(session_id), None) if status.turn_active => format!("session {session_id}, working"),
        (Some(session_id), None) => format!("session {session_id}, idle"),
        (None, None) => "starting".to_owned(),
    };
    let mode = status
        .modes
        .as_ref()
        .map(|modes| format!(", mode {}", modes.current_mode_id))
        .unwrap_or_default();
    let model = status
        .models
        .as_ref()
        .map(|models| format!(", model {}", models.current_model_id))
        .unwrap_or_default();
    format!(
        "{marker} {} [{}] {state}{mode}{model}",
        status.name,
        status.working_directory.display()
    )
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Prompt(PromptInput::text(line));
    };

    let (verb, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(verb, rest)| (verb, rest.trim()));
    let required = |usage: &str, build: fn(String) -> Input| {
        if rest.is_empty() {
            Input::Invalid(format!("usage: {usage}"))
        } else {
            build(rest.to_owned())
        }
    };

    match verb {
        "agent" => required("/agent <name>", Input::Agent),
        "load" => required("/load <session-id>", Input::Load),
        "mode" => required("/mode <id>", Input::Mode),
        "model" => required("/model <id>", Input::Model),
        "delete" => required("/delete <name>", Input::Delete),
        "cancel" => Input::Cancel,
        "restart" => Input::Restart,
        "agents" => Input::Agents,
        "status" => Input::Status,
        "quit" | "exit" => Input::Quit,
        "attach" => {
            let (path, caption) = rest
                .split_once(char::is_whitespace)
                .map_or((rest, ""), |(path, caption)| (path, caption.trim()));
            if path.is_empty() {
                Input::Invalid("usage: /attach <path> [caption]".into())
            } else {
                Input::Prompt(PromptInput::text(caption).with_attachment(path))
            }
        }
        other => Input::Invalid(format!("unknown command: /{other}")),
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Stdout carries agent output; logs go to stderr.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
