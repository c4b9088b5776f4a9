//! ACP agent process spawner.
//!
//! Spawns agent processes with:
//! - `kill_on_drop(true)` so processes are cleaned up automatically.
//! - `env_clear()` + a safe variable allowlist (plus any names the
//!   configuration opts into) so relay secrets never reach the child.
//! - stdin/stdout piped for the JSON-RPC stream and stderr piped into a
//!   drain task that logs each line at `DEBUG`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::AgentLaunchConfig;
use crate::{AppError, Result};

// ── Environment allowlist ────────────────────────────────────────────────────

/// Environment variables inherited by the spawned agent process.
///
/// Every other variable from the relay's environment is stripped via
/// `env_clear()` unless named in `inherit_env`.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

// ── Configuration ────────────────────────────────────────────────────────────

/// Everything needed to launch one agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Agent executable.
    pub command: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
    /// Directory the child process starts in.
    pub working_directory: PathBuf,
    /// Variables injected explicitly.
    pub env: HashMap<String, String>,
    /// Extra parent variables passed through.
    pub inherit_env: Vec<String>,
}

impl SpawnConfig {
    /// Combine the shared launch settings with one agent's working directory.
    #[must_use]
    pub fn from_launch(launch: &AgentLaunchConfig, working_directory: PathBuf) -> Self {
        Self {
            command: launch.command.clone(),
            args: launch.args.clone(),
            working_directory,
            env: launch.env.clone(),
            inherit_env: launch.inherit_env.clone(),
        }
    }
}

// ── Process handle ───────────────────────────────────────────────────────────

/// A freshly spawned agent with its stdio captured.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child handle; kept alive so `kill_on_drop` works.
    pub child: Child,
    /// Agent stdin (requests and replies).
    pub stdin: ChildStdin,
    /// Agent stdout (responses and notifications).
    pub stdout: ChildStdout,
    /// Agent stderr (diagnostics).
    pub stderr: ChildStderr,
}

// ── Spawner ──────────────────────────────────────────────────────────────────

/// Spawn an agent process.
///
/// # Errors
///
/// - `AppError::Spawn("failed to spawn …")` — OS spawn failure (missing
///   executable, bad working directory, permissions).
/// - `AppError::Spawn("failed to capture …")` — a stdio pipe was not created.
pub fn spawn_agent(config: &SpawnConfig, agent: &str) -> Result<AgentProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args);

    // Strip inherited environment, then inject only the safe allowlist.
    cmd.env_clear();
    let inherited = ALLOWED_ENV_VARS
        .iter()
        .copied()
        .chain(config.inherit_env.iter().map(String::as_str));
    for key in inherited {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }
    cmd.envs(&config.env);

    cmd.current_dir(&config.working_directory)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!(
            "failed to spawn `{}` in {}: {err}",
            config.command,
            config.working_directory.display()
        ))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

    info!(
        agent,
        command = config.command,
        pid = child.id(),
        cwd = %config.working_directory.display(),
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

// ── Stderr drain ─────────────────────────────────────────────────────────────

/// Spawn a task that logs each stderr line at `DEBUG` until EOF.
///
/// Draining keeps a chatty agent from blocking on a full stderr pipe.
#[must_use]
pub fn drain_stderr(agent: String, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(agent, line, "agent stderr"),
                Ok(None) => break,
                Err(err) => {
                    debug!(agent, %err, "agent stderr read failed");
                    break;
                }
            }
        }
    })
}
