//! Streamed notifications from the agent.
//!
//! Notifications are decoded once, on the reader task, into
//! [`AgentNotification`]. `session/update` payloads are multiplexed by the
//! `sessionUpdate` discriminator (older agents use `type`); vendor extension
//! methods start with `_` and are keyed by their path suffix.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::content::content_text;
use crate::models::session::SessionId;
use crate::{AppError, Result};

/// Method name of the multiplexed update notification.
pub const SESSION_UPDATE: &str = "session/update";

/// A tool invocation announced by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCall {
    /// Identifier correlating later updates.
    pub tool_call_id: String,
    /// Human-readable title.
    pub title: String,
    /// Tool category (`execute`, `read`, `edit`, ...).
    pub kind: Option<String>,
    /// Initial status.
    pub status: Option<String>,
    /// Raw tool input as sent by the agent.
    pub raw_input: Option<Value>,
}

impl ToolCall {
    /// Shell command from `rawInput.command`, if present.
    #[must_use]
    pub fn command(&self) -> Option<&str> {
        self.raw_input
            .as_ref()
            .and_then(|input| input.get("command"))
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
    }

    /// Stated purpose from `rawInput.__tool_use_purpose`, if present.
    #[must_use]
    pub fn purpose(&self) -> Option<&str> {
        self.raw_input
            .as_ref()
            .and_then(|input| input.get("__tool_use_purpose"))
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
    }
}

/// Progress or completion of an earlier tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolCallUpdate {
    /// Identifier of the tool call being updated.
    pub tool_call_id: String,
    /// New status (`in_progress`, `completed`, `failed`).
    pub status: Option<String>,
    /// Updated title.
    pub title: Option<String>,
    /// Raw tool output.
    pub raw_output: Option<Value>,
}

/// Captured process output of a finished shell tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Trimmed standard output.
    pub stdout: String,
    /// Trimmed standard error.
    pub stderr: String,
}

impl ToolCallUpdate {
    /// Whether the tool finished successfully.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }

    /// Output from `rawOutput.items[0].Json.{stdout,stderr}`, if any is non-empty.
    #[must_use]
    pub fn output(&self) -> Option<ToolOutput> {
        let data = self
            .raw_output
            .as_ref()?
            .get("items")?
            .as_array()?
            .first()?
            .get("Json")?;
        let field = |name: &str| {
            data.get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_owned()
        };
        let output = ToolOutput {
            stdout: field("stdout"),
            stderr: field("stderr"),
        };
        if output.stdout.is_empty() && output.stderr.is_empty() {
            None
        } else {
            Some(output)
        }
    }
}

/// Variants of the `session/update` notification.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// Incremental reply text.
    AgentMessageChunk {
        /// Text fragment.
        text: String,
    },
    /// Incremental reasoning text; never shown to the user.
    AgentThoughtChunk {
        /// Text fragment.
        text: String,
    },
    /// A tool invocation started.
    ToolCall(ToolCall),
    /// A tool invocation progressed or finished.
    ToolCallUpdate(ToolCallUpdate),
    /// Any update kind this relay does not interpret.
    Other {
        /// Discriminator value.
        kind: String,
        /// Full update payload.
        raw: Value,
    },
}

impl SessionUpdate {
    /// Decode the `update` object of a `session/update` notification.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Acp` if a known update kind has a malformed body.
    pub fn from_value(update: Value) -> Result<Self> {
        let kind = update
            .get("sessionUpdate")
            .or_else(|| update.get("type"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        match kind.as_str() {
            "agent_message_chunk" => Ok(Self::AgentMessageChunk {
                text: update.get("content").map(content_text).unwrap_or_default(),
            }),
            "agent_thought_chunk" => Ok(Self::AgentThoughtChunk {
                text: update.get("content").map(content_text).unwrap_or_default(),
            }),
            "tool_call" | "ToolCall" => serde_json::from_value(update)
                .map(Self::ToolCall)
                .map_err(|e| AppError::Acp(format!("malformed tool_call update: {e}"))),
            "tool_call_update" | "ToolCallUpdate" => serde_json::from_value(update)
                .map(Self::ToolCallUpdate)
                .map_err(|e| AppError::Acp(format!("malformed tool_call_update: {e}"))),
            _ => Ok(Self::Other { kind, raw: update }),
        }
    }
}

/// Vendor extension notifications (methods beginning with `_`).
#[derive(Debug, Clone, PartialEq)]
pub enum ExtensionEvent {
    /// Slash commands the agent accepts.
    CommandsAvailable {
        /// Raw command descriptors.
        commands: Vec<Value>,
    },
    /// Context compaction progress.
    CompactionStatus(Value),
    /// MCP server lifecycle events (OAuth request, server initialised).
    McpEvent {
        /// Full method name.
        method: String,
        /// Raw parameters.
        params: Value,
    },
    /// Session metadata such as context usage.
    Metadata(Value),
    /// Any other extension method.
    Unknown {
        /// Full method name.
        method: String,
        /// Raw parameters.
        params: Value,
    },
}

impl ExtensionEvent {
    fn from_method(method: &str, params: Value) -> Self {
        // Strip the vendor namespace (`_vendor.dev/`) and key on the remainder.
        let suffix = method
            .split_once('/')
            .map_or(method, |(_, rest)| rest);
        match suffix {
            "commands/available" => Self::CommandsAvailable {
                commands: params
                    .get("commands")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            },
            "compaction/status" => Self::CompactionStatus(params),
            "mcp/oauth_request" | "mcp/server_initialized" => Self::McpEvent {
                method: method.to_owned(),
                params,
            },
            "metadata" => Self::Metadata(params),
            _ => Self::Unknown {
                method: method.to_owned(),
                params,
            },
        }
    }
}

/// A decoded agent notification.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentNotification {
    /// `session/update` for one session.
    SessionUpdate {
        /// Target session.
        session_id: SessionId,
        /// Decoded update.
        update: SessionUpdate,
    },
    /// Vendor extension event.
    Extension {
        /// Target session, when the payload names one.
        session_id: Option<SessionId>,
        /// Decoded event.
        event: ExtensionEvent,
    },
    /// A standard method this relay does not handle.
    Unknown {
        /// Method name.
        method: String,
        /// Raw parameters.
        params: Value,
    },
}

impl AgentNotification {
    /// Decode a notification by method name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Acp` if a `session/update` lacks `sessionId` or
    /// `update`, or carries a malformed known update.
    pub fn parse(method: &str, params: Value) -> Result<Self> {
        if method == SESSION_UPDATE {
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .map(SessionId::from)
                .ok_or_else(|| AppError::Acp("session/update missing sessionId".into()))?;
            let update = params
                .get("update")
                .cloned()
                .ok_or_else(|| AppError::Acp("session/update missing update".into()))?;
            return Ok(Self::SessionUpdate {
                session_id,
                update: SessionUpdate::from_value(update)?,
            });
        }

        if method.starts_with('_') {
            let session_id = params
                .get("sessionId")
                .and_then(Value::as_str)
                .map(SessionId::from);
            return Ok(Self::Extension {
                session_id,
                event: ExtensionEvent::from_method(method, params),
            });
        }

        Ok(Self::Unknown {
            method: method.to_owned(),
            params,
        })
    }

    /// Session the notification is addressed to, if any.
    #[must_use]
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::SessionUpdate { session_id, .. } => Some(session_id),
            Self::Extension { session_id, .. } => session_id.as_ref(),
            Self::Unknown { .. } => None,
        }
    }
}
