//! Relay configuration parsing and validation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Front-end typing indicators expire after roughly this long without a refresh.
const ACTIVITY_EXPIRY: Duration = Duration::from_secs(5);

/// Launch specification for the agent subprocess.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentLaunchConfig {
    /// Agent executable (e.g., `kiro-cli`).
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default = "default_agent_args")]
    pub args: Vec<String>,
    /// Variables injected into the child environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Extra parent variables passed through on top of the built-in allowlist.
    #[serde(default)]
    pub inherit_env: Vec<String>,
}

impl Default for AgentLaunchConfig {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            args: default_agent_args(),
            env: HashMap::new(),
            inherit_env: Vec::new(),
        }
    }
}

fn default_agent_command() -> String {
    "kiro-cli".into()
}

fn default_agent_args() -> Vec<String> {
    vec!["acp".into()]
}

/// Per-agent overrides keyed by agent name.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentProfile {
    /// Working directory the agent process starts in.
    pub working_directory: Option<PathBuf>,
}

/// Request and shutdown deadlines (seconds).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Deadline for control requests (`initialize`, `session/new`, `set_mode`, ...).
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Deadline for a whole prompt turn.
    #[serde(default = "default_prompt_seconds")]
    pub prompt_seconds: u64,
    /// Grace period between the terminate signal and a forced kill.
    #[serde(default = "default_close_grace_seconds")]
    pub close_grace_seconds: u64,
    /// Bound on joining the reader task during shutdown.
    #[serde(default = "default_reader_join_seconds")]
    pub reader_join_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: default_request_seconds(),
            prompt_seconds: default_prompt_seconds(),
            close_grace_seconds: default_close_grace_seconds(),
            reader_join_seconds: default_reader_join_seconds(),
        }
    }
}

impl TimeoutConfig {
    /// Control-request deadline.
    #[must_use]
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_seconds)
    }

    /// Prompt-turn deadline.
    #[must_use]
    pub fn prompt(&self) -> Duration {
        Duration::from_secs(self.prompt_seconds)
    }

    /// Terminate-to-kill grace period.
    #[must_use]
    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_seconds)
    }

    /// Reader join bound.
    #[must_use]
    pub fn reader_join(&self) -> Duration {
        Duration::from_secs(self.reader_join_seconds)
    }
}

fn default_request_seconds() -> u64 {
    60
}

fn default_prompt_seconds() -> u64 {
    300
}

fn default_close_grace_seconds() -> u64 {
    5
}

fn default_reader_join_seconds() -> u64 {
    5
}

/// Output coalescing and heartbeat settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OutputConfig {
    /// Inactivity window before buffered text is flushed.
    #[serde(default = "default_flush_delay_ms")]
    pub flush_delay_ms: u64,
    /// Interval between "still working" signals while a turn is open.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Maximum characters per delivery unit.
    #[serde(default = "default_message_limit")]
    pub message_limit: usize,
    /// Characters kept from each end of long tool output.
    #[serde(default = "default_tool_output_excerpt")]
    pub tool_output_excerpt: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            flush_delay_ms: default_flush_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            message_limit: default_message_limit(),
            tool_output_excerpt: default_tool_output_excerpt(),
        }
    }
}

impl OutputConfig {
    /// Coalescing window.
    #[must_use]
    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }

    /// Heartbeat period.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

fn default_flush_delay_ms() -> u64 {
    2000
}

fn default_heartbeat_interval_ms() -> u64 {
    4000
}

fn default_message_limit() -> usize {
    4000
}

fn default_tool_output_excerpt() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    64
}

fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

/// Relay configuration parsed from `relay.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Agent subprocess launch specification.
    #[serde(default)]
    pub agent: AgentLaunchConfig,
    /// Working directory for agents without an override.
    #[serde(default = "default_working_directory")]
    pub default_working_directory: PathBuf,
    /// Named agent profiles.
    #[serde(default)]
    pub agents: HashMap<String, AgentProfile>,
    /// Request and shutdown deadlines.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Coalescing and heartbeat settings.
    #[serde(default)]
    pub output: OutputConfig,
    /// Capacity of the dispatcher command queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            agent: AgentLaunchConfig::default(),
            default_working_directory: default_working_directory(),
            agents: HashMap::new(),
            timeouts: TimeoutConfig::default(),
            output: OutputConfig::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Working directory for `agent`: profile override, else the default.
    #[must_use]
    pub fn working_directory_for(&self, agent: &str) -> PathBuf {
        self.agents
            .get(agent)
            .and_then(|profile| profile.working_directory.clone())
            .unwrap_or_else(|| self.default_working_directory.clone())
    }

    /// Validate interval and capacity settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::Config(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        if self.output.flush_delay_ms == 0 {
            return Err(AppError::Config(
                "output.flush_delay_ms must be greater than zero".into(),
            ));
        }
        if self.output.heartbeat_interval_ms == 0 {
            return Err(AppError::Config(
                "output.heartbeat_interval_ms must be greater than zero".into(),
            ));
        }
        if self.output.heartbeat_interval() >= ACTIVITY_EXPIRY {
            return Err(AppError::Config(format!(
                "output.heartbeat_interval_ms must be shorter than {}ms",
                ACTIVITY_EXPIRY.as_millis()
            )));
        }
        if self.output.message_limit == 0 {
            return Err(AppError::Config(
                "output.message_limit must be greater than zero".into(),
            ));
        }
        if self.timeouts.request_seconds == 0 || self.timeouts.prompt_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.request_seconds and timeouts.prompt_seconds must be greater than zero"
                    .into(),
            ));
        }
        Ok(())
    }
}
