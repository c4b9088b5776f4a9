//! JSON-RPC client over a [`Transport`].
//!
//! Assigns monotonically increasing integer ids, parks each caller on a
//! oneshot until the reader resolves the matching response, and routes
//! agent-initiated traffic to a registered [`InboundHandler`].
//!
//! The pending table is the only state shared with the reader task. It is
//! guarded by a `parking_lot::Mutex` that is never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::acp::message::{
    error_frame, notification_frame, request_frame, response_frame, RpcError, RpcMessage,
    METHOD_NOT_FOUND,
};
use crate::acp::reader::InboundSink;
use crate::acp::spawner::SpawnConfig;
use crate::acp::transport::{ShutdownOutcome, Transport};
use crate::{AppError, Result};

/// Receives agent-initiated notifications and requests.
///
/// Invoked on the reader task, in the order the agent emitted the messages.
pub trait InboundHandler: Send + Sync {
    /// Handle a notification.
    fn on_notification(&self, method: &str, params: Value);

    /// Answer an agent-initiated request.
    ///
    /// # Errors
    ///
    /// The returned [`RpcError`] is sent back as the JSON-RPC `error` object.
    fn on_request(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError>;
}

/// Book-keeping for one outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Request id.
    pub id: u64,
    /// When the request was written.
    pub created_at: DateTime<Utc>,
}

struct PendingEntry {
    request: PendingRequest,
    method: String,
    resolver: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<u64, PendingEntry>,
    closed: Option<String>,
}

/// State shared between callers and the reader task.
struct ClientCore {
    agent: String,
    pending: Mutex<PendingTable>,
    handler: RwLock<Option<Arc<dyn InboundHandler>>>,
}

impl ClientCore {
    fn resolve(&self, id: &Value, outcome: std::result::Result<Value, RpcError>) {
        let entry = id
            .as_u64()
            .and_then(|id| self.pending.lock().entries.remove(&id));

        let Some(entry) = entry else {
            debug!(agent = self.agent, %id, "discarding response for unknown request id");
            return;
        };

        let elapsed_ms = (Utc::now() - entry.request.created_at).num_milliseconds();
        debug!(
            agent = self.agent,
            id = entry.request.id,
            method = entry.method,
            elapsed_ms,
            ok = outcome.is_ok(),
            "response received"
        );

        // The caller may have timed out and gone away.
        let _ = entry.resolver.send(outcome.map_err(AppError::from));
    }
}

impl InboundSink for ClientCore {
    fn dispatch(&self, message: RpcMessage) -> Option<Value> {
        match message {
            RpcMessage::Response { id, outcome } => {
                self.resolve(&id, outcome);
                None
            }
            RpcMessage::Notification { method, params } => {
                let handler = self.handler.read().clone();
                match handler {
                    Some(handler) => handler.on_notification(&method, params),
                    None => debug!(agent = self.agent, method, "no handler; notification dropped"),
                }
                None
            }
            RpcMessage::Request { id, method, params } => {
                let handler = self.handler.read().clone();
                let reply = match handler {
                    Some(handler) => handler.on_request(&method, params),
                    None => Err(RpcError::new(
                        METHOD_NOT_FOUND,
                        format!("method not found: {method}"),
                    )),
                };
                Some(match reply {
                    Ok(result) => response_frame(id, result),
                    Err(error) => {
                        debug!(agent = self.agent, method, code = error.code, "rejecting agent request");
                        error_frame(id, &error)
                    }
                })
            }
        }
    }

    fn closed(&self, reason: &str) {
        let drained: Vec<PendingEntry> = {
            let mut table = self.pending.lock();
            table.closed.get_or_insert_with(|| reason.to_owned());
            table.entries.drain().map(|(_, entry)| entry).collect()
        };

        if !drained.is_empty() {
            warn!(
                agent = self.agent,
                count = drained.len(),
                reason,
                "failing outstanding requests"
            );
        }
        for entry in drained {
            let _ = entry.resolver.send(Err(AppError::ConnectionClosed(format!(
                "{} (id {}): {reason}",
                entry.method, entry.request.id
            ))));
        }
    }
}

/// Removes a pending entry if the awaiting future is dropped or times out.
struct PendingGuard<'a> {
    core: &'a ClientCore,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.core.pending.lock().entries.remove(&self.id);
    }
}

/// JSON-RPC client bound to one agent process.
pub struct RpcClient {
    agent: String,
    transport: Transport,
    core: Arc<ClientCore>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl RpcClient {
    /// Spawn the agent and start routing its output.
    ///
    /// `request_timeout` bounds [`RpcClient::request`]; prompts pass their
    /// own deadline to [`RpcClient::request_with_timeout`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process cannot be launched.
    pub fn start(agent: &str, config: &SpawnConfig, request_timeout: Duration) -> Result<Self> {
        let core = Arc::new(ClientCore {
            agent: agent.to_owned(),
            pending: Mutex::new(PendingTable::default()),
            handler: RwLock::new(None),
        });
        let transport = Transport::start(config, agent, core.clone())?;

        Ok(Self {
            agent: agent.to_owned(),
            transport,
            core,
            next_id: AtomicU64::new(1),
            request_timeout,
        })
    }

    /// Agent name this client serves.
    #[must_use]
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Install the handler for agent-initiated traffic, replacing any previous one.
    pub fn set_handler(&self, handler: Arc<dyn InboundHandler>) {
        *self.core.handler.write() = Some(handler);
    }

    /// Send a request and wait up to the default deadline for its response.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::request_with_timeout`].
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.request_with_timeout(method, params, self.request_timeout)
            .await
    }

    /// Send a request and wait up to `deadline` for its response.
    ///
    /// # Errors
    ///
    /// - `AppError::Remote` — the agent answered with an `error` object.
    /// - `AppError::ConnectionClosed` — the stream ended first.
    /// - `AppError::Timeout` — no response within `deadline`; the pending
    ///   entry is discarded and a late response is ignored.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (resolver, response) = oneshot::channel();

        {
            let mut table = self.core.pending.lock();
            if let Some(reason) = &table.closed {
                return Err(AppError::ConnectionClosed(format!(
                    "agent `{}`: {reason}",
                    self.agent
                )));
            }
            table.entries.insert(
                id,
                PendingEntry {
                    request: PendingRequest {
                        id,
                        created_at: Utc::now(),
                    },
                    method: method.to_owned(),
                    resolver,
                },
            );
        }
        let _guard = PendingGuard {
            core: &self.core,
            id,
        };

        debug!(agent = self.agent, id, method, "sending request");
        self.transport
            .send(&request_frame(id, method, params))
            .await?;

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AppError::ConnectionClosed(format!(
                "{method} (id {id}): response channel dropped"
            ))),
            Err(_elapsed) => {
                warn!(agent = self.agent, id, method, deadline = ?deadline, "request timed out");
                Err(AppError::Timeout(format!(
                    "{method} (id {id}) got no response within {}s",
                    deadline.as_secs()
                )))
            }
        }
    }

    /// Send a notification (no id, no response).
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionClosed` if the stream is closed.
    pub async fn notify(&self, method: &str, params: Value) -> Result<()> {
        debug!(agent = self.agent, method, "sending notification");
        self.transport
            .send(&notification_frame(method, params))
            .await
    }

    /// Snapshot of outstanding requests, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingRequest> {
        let mut pending: Vec<PendingRequest> = self
            .core
            .pending
            .lock()
            .entries
            .values()
            .map(|entry| entry.request)
            .collect();
        pending.sort_by_key(|request| request.id);
        pending
    }

    /// Whether the agent stream is still open.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Shut down the agent process and fail outstanding requests.
    pub async fn close(&self, grace: Duration, reader_join: Duration) -> ShutdownOutcome {
        let outcome = self.transport.close(grace, reader_join).await;
        // The reader may have been aborted before it could drain the table.
        self.core.closed("transport closed");
        outcome
    }
}
