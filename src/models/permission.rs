//! `session/request_permission` payloads and the automatic approval rule.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::session::SessionId;

/// Method name of the agent's permission request.
pub const REQUEST_PERMISSION: &str = "session/request_permission";

/// One answer the agent offers for a permission request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Identifier echoed back in the response.
    pub option_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Option kind (`allow_once`, `allow_always`, `reject_once`, ...).
    #[serde(default)]
    pub kind: String,
}

/// Parameters of `session/request_permission`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Session the tool call belongs to.
    pub session_id: SessionId,
    /// Tool call awaiting permission.
    #[serde(default)]
    pub tool_call: Option<Value>,
    /// Offered answers.
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}

/// Client decision for a permission request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionOutcome {
    /// One of the offered options was chosen.
    Selected(String),
    /// No acceptable option; the request is declined.
    Cancelled,
}

impl PermissionOutcome {
    /// Pick the most conservative allowing option.
    ///
    /// Preference: `allow_once`, then `allow_always`, then any kind containing
    /// `allow`. Without one the outcome is [`PermissionOutcome::Cancelled`].
    #[must_use]
    pub fn auto_approve(options: &[PermissionOption]) -> Self {
        let by_kind = |kind: &str| options.iter().find(|o| o.kind == kind);
        by_kind("allow_once")
            .or_else(|| by_kind("allow_always"))
            .or_else(|| options.iter().find(|o| o.kind.contains("allow")))
            .map_or(Self::Cancelled, |o| Self::Selected(o.option_id.clone()))
    }

    /// JSON-RPC `result` body for this outcome.
    #[must_use]
    pub fn to_result(&self) -> Value {
        match self {
            Self::Selected(option_id) => {
                json!({"outcome": {"outcome": "selected", "optionId": option_id}})
            }
            Self::Cancelled => json!({"outcome": {"outcome": "cancelled"}}),
        }
    }
}
