//! Session setup results, capabilities, and turn outcomes.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque session identifier issued by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Content kinds the agent accepts inside a prompt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PromptCapabilities {
    /// Structured image blocks.
    pub image: bool,
    /// Audio blocks.
    pub audio: bool,
    /// Embedded resource blocks.
    pub embedded_context: bool,
}

/// Capabilities advertised in the `initialize` response.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentCapabilities {
    /// Whether `session/load` is supported.
    pub load_session: bool,
    /// Accepted prompt content kinds.
    pub prompt_capabilities: PromptCapabilities,
}

/// Name and version reported by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentInfo {
    /// Agent name.
    pub name: String,
    /// Agent version string.
    pub version: String,
}

/// `initialize` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InitializeResult {
    /// Negotiated protocol version.
    pub protocol_version: Value,
    /// Advertised capabilities.
    pub agent_capabilities: AgentCapabilities,
    /// Optional agent identification.
    pub agent_info: Option<AgentInfo>,
}

/// One selectable agent mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMode {
    /// Mode identifier passed to `session/set_mode`.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Current and available modes of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionModeState {
    /// Active mode identifier.
    pub current_mode_id: String,
    /// Modes the agent offers.
    pub available_modes: Vec<SessionMode>,
}

/// One selectable model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model identifier passed to `session/set_model`.
    pub model_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
}

/// Current and available models of a session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionModelState {
    /// Active model identifier.
    pub current_model_id: String,
    /// Models the agent offers.
    pub available_models: Vec<ModelInfo>,
}

/// `session/new` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    /// Issued session identifier.
    pub session_id: SessionId,
    /// Mode state, when the agent supports modes.
    #[serde(default)]
    pub modes: Option<SessionModeState>,
    /// Model state, when the agent supports model selection.
    #[serde(default)]
    pub models: Option<SessionModelState>,
}

/// `session/load` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadSessionResult {
    /// Mode state after restore.
    pub modes: Option<SessionModeState>,
    /// Model state after restore.
    pub models: Option<SessionModelState>,
}

/// Why a prompt turn ended, as carried in the `session/prompt` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The agent finished its reply.
    EndTurn,
    /// Token budget exhausted.
    MaxTokens,
    /// Too many model requests in one turn.
    MaxTurnRequests,
    /// The agent declined to continue.
    Refusal,
    /// The turn was cancelled by `session/cancel`.
    Cancelled,
    /// The response carried no stop reason.
    Unspecified,
    /// A stop reason this relay does not know.
    Other(String),
}

impl StopReason {
    /// Map the wire string to a stop reason.
    #[must_use]
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "end_turn" => Self::EndTurn,
            "max_tokens" => Self::MaxTokens,
            "max_turn_requests" => Self::MaxTurnRequests,
            "refusal" => Self::Refusal,
            "cancelled" => Self::Cancelled,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Read the stop reason from a `session/prompt` result object.
    #[must_use]
    pub fn from_prompt_result(result: &Value) -> Self {
        result
            .get("stopReason")
            .and_then(Value::as_str)
            .map_or(Self::Unspecified, Self::from_wire)
    }
}

impl Display for StopReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndTurn => f.write_str("end_turn"),
            Self::MaxTokens => f.write_str("max_tokens"),
            Self::MaxTurnRequests => f.write_str("max_turn_requests"),
            Self::Refusal => f.write_str("refusal"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Unspecified => f.write_str("unspecified"),
            Self::Other(raw) => f.write_str(raw),
        }
    }
}
