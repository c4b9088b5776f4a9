//! One logical conversation with an agent.
//!
//! A [`Session`] wraps the `session/*` calls of an [`RpcClient`]. Streamed
//! output for the session is decoded by a [`SessionRouter`] on the reader
//! task and handed to [`SessionEvents`] callbacks.
//!
//! A turn ends when the `session/prompt` **response** arrives, carrying the
//! stop reason. The protocol has no "turn ended" notification.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::acp::message::{RpcError, INVALID_PARAMS, METHOD_NOT_FOUND};
use crate::acp::rpc::{InboundHandler, RpcClient};
use crate::models::content::ContentBlock;
use crate::models::permission::{PermissionOutcome, PermissionRequest, REQUEST_PERMISSION};
use crate::models::session::{
    AgentCapabilities, LoadSessionResult, NewSessionResult, SessionId, SessionModeState,
    SessionModelState, StopReason,
};
use crate::models::update::{
    AgentNotification, ExtensionEvent, SessionUpdate, ToolCall, ToolCallUpdate,
};
use crate::{AppError, Result};

/// Typed callbacks for streamed session output.
///
/// Called on the reader task in emission order; implementations must not block.
pub trait SessionEvents: Send + Sync {
    /// A fragment of reply text.
    fn on_chunk(&self, text: &str);
    /// A tool invocation started.
    fn on_tool_call(&self, call: &ToolCall);
    /// A tool invocation progressed or finished.
    fn on_tool_update(&self, update: &ToolCallUpdate);
    /// A vendor extension event addressed to this session.
    fn on_extension(&self, _event: &ExtensionEvent) {}
}

/// Decodes inbound traffic for one session and answers permission requests.
pub struct SessionRouter {
    agent: String,
    session_id: OnceLock<SessionId>,
    events: Arc<dyn SessionEvents>,
}

impl SessionRouter {
    /// Create an unbound router; bind it once the session id is known.
    pub fn new(agent: impl Into<String>, events: Arc<dyn SessionEvents>) -> Self {
        Self {
            agent: agent.into(),
            session_id: OnceLock::new(),
            events,
        }
    }

    /// Bind the router to the session the agent issued.
    ///
    /// `session/update` notifications are dropped until bound.
    pub fn bind(&self, session_id: SessionId) {
        if self.session_id.set(session_id).is_err() {
            warn!(agent = self.agent, "session router already bound");
        }
    }

    fn is_for_us(&self, target: Option<&SessionId>) -> bool {
        match (self.session_id.get(), target) {
            (Some(bound), Some(target)) => bound == target,
            // Agent-wide events and anything before binding are accepted.
            _ => true,
        }
    }

    fn route_update(&self, update: SessionUpdate) {
        match update {
            SessionUpdate::AgentMessageChunk { text } => {
                if !text.is_empty() {
                    self.events.on_chunk(&text);
                }
            }
            SessionUpdate::AgentThoughtChunk { text } => {
                debug!(agent = self.agent, len = text.len(), "agent thought chunk");
            }
            SessionUpdate::ToolCall(call) => self.events.on_tool_call(&call),
            SessionUpdate::ToolCallUpdate(update) => self.events.on_tool_update(&update),
            SessionUpdate::Other { kind, .. } => {
                warn!(agent = self.agent, kind, "unhandled session update kind");
            }
        }
    }
}

impl InboundHandler for SessionRouter {
    fn on_notification(&self, method: &str, params: Value) {
        let notification = match AgentNotification::parse(method, params) {
            Ok(notification) => notification,
            Err(err) => {
                warn!(agent = self.agent, method, %err, "dropping malformed notification");
                return;
            }
        };

        if !self.is_for_us(notification.session_id()) {
            debug!(agent = self.agent, method, "notification for another session ignored");
            return;
        }

        match notification {
            AgentNotification::SessionUpdate { session_id, update } => {
                if self.session_id.get().is_none() {
                    debug!(agent = self.agent, %session_id, "update before session bound; ignored");
                    return;
                }
                self.route_update(update);
            }
            AgentNotification::Extension { event, .. } => {
                debug!(agent = self.agent, method, "extension notification");
                self.events.on_extension(&event);
            }
            AgentNotification::Unknown { method, .. } => {
                debug!(agent = self.agent, method, "unhandled notification");
            }
        }
    }

    fn on_request(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        if method != REQUEST_PERMISSION {
            return Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {method}"),
            ));
        }

        let request: PermissionRequest = serde_json::from_value(params)
            .map_err(|e| RpcError::new(INVALID_PARAMS, format!("invalid params: {e}")))?;
        let outcome = PermissionOutcome::auto_approve(&request.options);
        info!(
            agent = self.agent,
            session_id = %request.session_id,
            outcome = ?outcome,
            "permission request answered"
        );
        Ok(outcome.to_result())
    }
}

/// Clears the active-turn flag when a prompt ends, however it ends.
struct TurnGuard<'a>(&'a AtomicBool);

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A live session bound to one agent process.
pub struct Session {
    client: Arc<RpcClient>,
    session_id: SessionId,
    working_directory: PathBuf,
    capabilities: AgentCapabilities,
    modes: Mutex<Option<SessionModeState>>,
    models: Mutex<Option<SessionModelState>>,
    active_turn: AtomicBool,
    prompt_timeout: Duration,
}

impl Session {
    /// Create a new session with `session/new`.
    ///
    /// Installs a [`SessionRouter`] on `client` so streamed output for the
    /// session reaches `events`.
    ///
    /// # Errors
    ///
    /// Propagates request failures; returns `AppError::Acp` if the response
    /// lacks a session id.
    pub async fn create(
        client: Arc<RpcClient>,
        capabilities: AgentCapabilities,
        working_directory: &Path,
        events: Arc<dyn SessionEvents>,
        prompt_timeout: Duration,
    ) -> Result<Self> {
        let router = Arc::new(SessionRouter::new(client.agent(), events));
        client.set_handler(router.clone());

        let result = client
            .request(
                "session/new",
                json!({"cwd": working_directory, "mcpServers": []}),
            )
            .await?;
        let created: NewSessionResult = serde_json::from_value(result)?;
        router.bind(created.session_id.clone());

        info!(
            agent = client.agent(),
            session_id = %created.session_id,
            cwd = %working_directory.display(),
            "session created"
        );

        Ok(Self {
            client,
            session_id: created.session_id,
            working_directory: working_directory.to_path_buf(),
            capabilities,
            modes: Mutex::new(created.modes),
            models: Mutex::new(created.models),
            active_turn: AtomicBool::new(false),
            prompt_timeout,
        })
    }

    /// Restore a persisted session with `session/load`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unavailable` if the agent did not advertise
    /// `loadSession`, otherwise propagates request failures.
    pub async fn load(
        client: Arc<RpcClient>,
        capabilities: AgentCapabilities,
        session_id: SessionId,
        working_directory: &Path,
        events: Arc<dyn SessionEvents>,
        prompt_timeout: Duration,
    ) -> Result<Self> {
        if !capabilities.load_session {
            return Err(AppError::Unavailable(format!(
                "agent `{}` does not support session/load",
                client.agent()
            )));
        }

        let router = Arc::new(SessionRouter::new(client.agent(), events));
        router.bind(session_id.clone());
        client.set_handler(router);

        // The agent replays history as updates while loading; the bound router
        // forwards them like live output.
        let result = client
            .request(
                "session/load",
                json!({"sessionId": session_id, "cwd": working_directory, "mcpServers": []}),
            )
            .await?;
        let loaded: LoadSessionResult = if result.is_null() {
            LoadSessionResult::default()
        } else {
            serde_json::from_value(result)?
        };

        info!(agent = client.agent(), %session_id, "session loaded");

        Ok(Self {
            client,
            session_id,
            working_directory: working_directory.to_path_buf(),
            capabilities,
            modes: Mutex::new(loaded.modes),
            models: Mutex::new(loaded.models),
            active_turn: AtomicBool::new(false),
            prompt_timeout,
        })
    }

    /// Run one turn: send `session/prompt` and wait for its response.
    ///
    /// Streamed output arrives through [`SessionEvents`] while this is pending.
    ///
    /// # Errors
    ///
    /// - `AppError::TurnInProgress` — another prompt is outstanding.
    /// - `AppError::Remote` — the agent rejected the prompt; the session stays usable.
    /// - `AppError::Timeout` / `AppError::ConnectionClosed` — no response.
    pub async fn prompt(&self, blocks: Vec<ContentBlock>) -> Result<StopReason> {
        if self.active_turn.swap(true, Ordering::AcqRel) {
            return Err(AppError::TurnInProgress(format!(
                "session {} already has a prompt in flight",
                self.session_id
            )));
        }
        let _turn = TurnGuard(&self.active_turn);

        let result = self
            .client
            .request_with_timeout(
                "session/prompt",
                json!({"sessionId": self.session_id, "prompt": blocks}),
                self.prompt_timeout,
            )
            .await?;

        let stop = StopReason::from_prompt_result(&result);
        debug!(agent = self.client.agent(), session_id = %self.session_id, %stop, "turn complete");
        Ok(stop)
    }

    /// Ask the agent to stop the current turn.
    ///
    /// Fire-and-forget; the pending [`Session::prompt`] still resolves through
    /// its response. A no-op when no turn is active.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionClosed` if the notification cannot be written.
    pub async fn cancel(&self) -> Result<()> {
        if !self.is_turn_active() {
            debug!(agent = self.client.agent(), "cancel with no active turn; ignored");
            return Ok(());
        }
        info!(agent = self.client.agent(), session_id = %self.session_id, "cancelling turn");
        self.client
            .notify("session/cancel", json!({"sessionId": self.session_id}))
            .await
    }

    /// Switch the session's mode.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn set_mode(&self, mode_id: &str) -> Result<()> {
        self.client
            .request(
                "session/set_mode",
                json!({"sessionId": self.session_id, "modeId": mode_id}),
            )
            .await?;
        self.modes
            .lock()
            .get_or_insert_with(SessionModeState::default)
            .current_mode_id = mode_id.to_owned();
        info!(agent = self.client.agent(), mode_id, "mode changed");
        Ok(())
    }

    /// Switch the session's model.
    ///
    /// # Errors
    ///
    /// Propagates request failures.
    pub async fn set_model(&self, model_id: &str) -> Result<()> {
        self.client
            .request(
                "session/set_model",
                json!({"sessionId": self.session_id, "modelId": model_id}),
            )
            .await?;
        self.models
            .lock()
            .get_or_insert_with(SessionModelState::default)
            .current_model_id = model_id.to_owned();
        info!(agent = self.client.agent(), model_id, "model changed");
        Ok(())
    }

    /// Session id issued by the agent.
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Directory the session was created in.
    #[must_use]
    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Whether prompts may carry image blocks.
    #[must_use]
    pub fn supports_images(&self) -> bool {
        self.capabilities.prompt_capabilities.image
    }

    /// Whether a prompt is in flight.
    #[must_use]
    pub fn is_turn_active(&self) -> bool {
        self.active_turn.load(Ordering::Acquire)
    }

    /// Current mode state, if the agent reported one.
    #[must_use]
    pub fn modes(&self) -> Option<SessionModeState> {
        self.modes.lock().clone()
    }

    /// Current model state, if the agent reported one.
    #[must_use]
    pub fn models(&self) -> Option<SessionModelState> {
        self.models.lock().clone()
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }
}
