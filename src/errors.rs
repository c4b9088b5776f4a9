//! Error types shared across the relay.

use std::fmt::{Display, Formatter};

/// Shared relay result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Relay error enumeration covering transport, protocol, and lifecycle failures.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The agent executable could not be launched.
    Spawn(String),
    /// Framing or protocol violation on the agent stream.
    Acp(String),
    /// JSON-RPC `error` object returned by the agent.
    Remote {
        /// JSON-RPC error code.
        code: i64,
        /// Human-readable error message supplied by the agent.
        message: String,
    },
    /// The agent stream closed while a request was outstanding.
    ConnectionClosed(String),
    /// A request did not receive a response within its deadline.
    Timeout(String),
    /// A prompt is already in flight for the session.
    TurnInProgress(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// The agent entry is faulted and must be restarted before use.
    Unavailable(String),
    /// The dispatcher queue has shut down.
    QueueClosed(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the error leaves the owning agent entry unusable until restart.
    ///
    /// Protocol-level (`Remote`) errors and timeouts keep the session usable;
    /// a dead stream or failed launch does not.
    #[must_use]
    pub fn is_fatal_for_agent(&self) -> bool {
        matches!(self, Self::ConnectionClosed(_) | Self::Spawn(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::Remote { code, message } => write!(f, "remote error {code}: {message}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::TurnInProgress(msg) => write!(f, "turn in progress: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::QueueClosed(msg) => write!(f, "queue closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Acp(format!("json: {err}"))
    }
}
