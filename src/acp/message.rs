//! JSON-RPC 2.0 envelopes exchanged with the agent.
//!
//! Inbound values are classified by shape:
//!
//! | Shape                         | Variant                         |
//! |-------------------------------|---------------------------------|
//! | `method` + non-null `id`      | [`RpcMessage::Request`]         |
//! | `method`, no `id`             | [`RpcMessage::Notification`]    |
//! | `id` + `result` or `error`    | [`RpcMessage::Response`]        |

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{AppError, Result};

/// JSON-RPC protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC code for an unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Standard JSON-RPC code for malformed parameters.
pub const INVALID_PARAMS: i64 = -32602;

/// JSON-RPC `error` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcError {
    /// Numeric error code.
    pub code: i64,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error without `data`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        // Agents often put the useful detail in `data` and keep `message` generic.
        let message = match err.data {
            Some(Value::String(detail)) if !detail.is_empty() => {
                format!("{} ({detail})", err.message)
            }
            _ => err.message,
        };
        Self::Remote {
            code: err.code,
            message,
        }
    }
}

/// A classified inbound JSON-RPC message.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    /// Reply to one of our requests.
    Response {
        /// Correlation id as sent by the agent.
        id: Value,
        /// `result` on success, `error` on failure.
        outcome: std::result::Result<Value, RpcError>,
    },
    /// Agent-initiated request expecting a reply.
    Request {
        /// Correlation id to echo back.
        id: Value,
        /// Method name.
        method: String,
        /// Parameters (`null` when absent).
        params: Value,
    },
    /// Agent-initiated notification.
    Notification {
        /// Method name.
        method: String,
        /// Parameters (`null` when absent).
        params: Value,
    },
}

impl RpcMessage {
    /// Classify a parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Acp` if the value is not an object or matches none
    /// of the JSON-RPC shapes.
    pub fn classify(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(AppError::Acp("message is not a JSON object".into()));
        };

        let id = map.remove("id").filter(|id| !id.is_null());
        let params = map.remove("params").unwrap_or(Value::Null);

        if let Some(method) = map.remove("method") {
            let Value::String(method) = method else {
                return Err(AppError::Acp("method is not a string".into()));
            };
            return Ok(match id {
                Some(id) => Self::Request { id, method, params },
                None => Self::Notification { method, params },
            });
        }

        let Some(id) = id else {
            return Err(AppError::Acp("message has neither method nor id".into()));
        };

        if let Some(error) = map.remove("error") {
            let error: RpcError = serde_json::from_value(error)
                .map_err(|e| AppError::Acp(format!("malformed error object: {e}")))?;
            return Ok(Self::Response {
                id,
                outcome: Err(error),
            });
        }

        match map.remove("result") {
            Some(result) => Ok(Self::Response {
                id,
                outcome: Ok(result),
            }),
            None => Err(AppError::Acp("response has neither result nor error".into())),
        }
    }
}

/// Build a request frame.
#[must_use]
pub fn request_frame(id: u64, method: &str, params: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "method": method, "params": params})
}

/// Build a notification frame (no `id`).
#[must_use]
pub fn notification_frame(method: &str, params: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "method": method, "params": params})
}

/// Build a success response to an agent-initiated request.
#[must_use]
pub fn response_frame(id: Value, result: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result})
}

/// Build an error response to an agent-initiated request.
#[must_use]
pub fn error_frame(id: Value, error: &RpcError) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "error": error})
}
