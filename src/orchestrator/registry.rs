//! Named agent entries and their lifecycle.
//!
//! The [`Registry`] owns one entry per agent name. Each ready entry bundles
//! its own RPC client (and thus process and reader task), session, and
//! coalescer, so a crash or hang in one agent never touches another.
//!
//! The registry is owned by the dispatcher worker and mutated only there.
//! Two pieces are shared outward: the [`InFlightTurn`] slot, which lets the
//! dispatcher cancel or abort a running turn without queuing behind it, and
//! the [`ActiveAgent`] name, so those fast paths target the same agent the
//! queued command would.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::acp::handshake;
use crate::acp::rpc::RpcClient;
use crate::acp::session::Session;
use crate::acp::spawner::SpawnConfig;
use crate::acp::transport::ShutdownOutcome;
use crate::config::RelayConfig;
use crate::driver::TargetId;
use crate::models::content::PromptInput;
use crate::models::session::{SessionId, SessionModeState, SessionModelState, StopReason};
use crate::orchestrator::coalescer::{Coalescer, RenderLimits};
use crate::orchestrator::heartbeat::Heartbeat;
use crate::orchestrator::outbox::Outbox;
use crate::orchestrator::render::{render_error, CANCELLED_NOTICE};
use crate::{AppError, Result};

/// Bound on waiting for a heartbeat task to exit after a turn.
const HEARTBEAT_STOP_BOUND: Duration = Duration::from_secs(1);

/// The turn currently running on the worker, if any.
#[derive(Clone)]
pub struct InFlight {
    /// Agent running the turn.
    pub agent: String,
    /// Its session, for the cancel fast path.
    pub session: Arc<Session>,
    /// Fired to abandon the turn (restart, delete, shutdown).
    pub abort: CancellationToken,
}

/// Slot shared between the worker and dispatcher handles.
pub type InFlightTurn = Arc<Mutex<Option<InFlight>>>;

/// Name of the agent receiving front-end input, shared with dispatcher handles.
pub type ActiveAgent = Arc<Mutex<Option<String>>>;

struct ReadyAgent {
    client: Arc<RpcClient>,
    session: Arc<Session>,
    coalescer: Coalescer,
}

enum EntryState {
    Ready(ReadyAgent),
    Faulted { reason: String },
}

struct AgentEntry {
    working_directory: PathBuf,
    target: TargetId,
    state: EntryState,
}

/// Point-in-time view of one agent entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    /// Agent name.
    pub name: String,
    /// Whether this agent receives front-end input.
    pub active: bool,
    /// Directory the agent runs in.
    pub working_directory: PathBuf,
    /// Where its output is delivered.
    pub target: TargetId,
    /// Session id, when the entry is ready.
    pub session_id: Option<SessionId>,
    /// Fault reason, when the entry needs a restart.
    pub fault: Option<String>,
    /// Whether a prompt is in flight.
    pub turn_active: bool,
    /// Outstanding RPC requests.
    pub pending_requests: usize,
    /// Mode state reported by the agent.
    pub modes: Option<SessionModeState>,
    /// Model state reported by the agent.
    pub models: Option<SessionModelState>,
}

/// How a new entry obtains its session.
enum SessionSource {
    New,
    Load(SessionId),
}

/// Owner of every agent entry.
pub struct Registry {
    config: Arc<RelayConfig>,
    outbox: Outbox,
    agents: HashMap<String, AgentEntry>,
    active: ActiveAgent,
    in_flight: InFlightTurn,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(
        config: Arc<RelayConfig>,
        outbox: Outbox,
        in_flight: InFlightTurn,
        active: ActiveAgent,
    ) -> Self {
        Self {
            config,
            outbox,
            agents: HashMap::new(),
            active,
            in_flight,
        }
    }

    /// Start `name` if it has no entry yet; reuse it otherwise.
    ///
    /// `working_directory` overrides the configured directory for a new entry
    /// and is ignored for an existing one.
    ///
    /// # Errors
    ///
    /// - `AppError::Unavailable` — the entry exists but is faulted.
    /// - `AppError::Spawn` and handshake errors — starting a new entry failed;
    ///   nothing is registered.
    pub async fn ensure_agent(
        &mut self,
        name: &str,
        working_directory: Option<PathBuf>,
        target: TargetId,
    ) -> Result<SessionId> {
        if self.agents.contains_key(name) {
            return self.ready(name).map(|ready| ready.session.session_id().clone());
        }

        let working_directory =
            working_directory.unwrap_or_else(|| self.config.working_directory_for(name));
        let ready = self
            .start_agent(name, &working_directory, &target, SessionSource::New)
            .await?;
        Ok(self.insert_ready(name, working_directory, target, ready))
    }

    /// Start `name` by restoring a persisted session.
    ///
    /// # Errors
    ///
    /// - `AppError::Config` — an entry with this name already exists.
    /// - `AppError::Unavailable` — the agent cannot load sessions.
    /// - Spawn and request errors from starting the agent.
    pub async fn load_agent(
        &mut self,
        name: &str,
        session_id: SessionId,
        target: TargetId,
    ) -> Result<SessionId> {
        if self.agents.contains_key(name) {
            return Err(AppError::Config(format!(
                "agent `{name}` already exists; delete it before loading a session"
            )));
        }
        let working_directory = self.config.working_directory_for(name);
        let ready = self
            .start_agent(
                name,
                &working_directory,
                &target,
                SessionSource::Load(session_id),
            )
            .await?;
        Ok(self.insert_ready(name, working_directory, target, ready))
    }

    /// Make `name` the agent that receives front-end input, starting it if needed.
    ///
    /// # Errors
    ///
    /// See [`Registry::ensure_agent`].
    pub async fn switch_active(&mut self, name: &str, target: TargetId) -> Result<SessionId> {
        let session_id = self.ensure_agent(name, None, target).await?;
        let previous = self.active.lock().replace(name.to_owned());
        if previous.as_deref() != Some(name) {
            info!(agent = name, ?previous, "active agent switched");
        }
        Ok(session_id)
    }

    /// Currently active agent.
    #[must_use]
    pub fn active(&self) -> Option<String> {
        self.active.lock().clone()
    }

    /// Resolve an optional agent name to a concrete one (default: active).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no name is given and none is active.
    pub fn resolve(&self, name: Option<&str>) -> Result<String> {
        match name {
            Some(name) => Ok(name.to_owned()),
            None => self
                .active()
                .ok_or_else(|| AppError::NotFound("no active agent".into())),
        }
    }

    /// Tear down `name` and start it again with a fresh session.
    ///
    /// The name, working directory, and target are kept; the old session id
    /// is not reused. If the new start fails the entry stays registered as
    /// faulted so another restart can be attempted.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` — no such agent.
    /// - Spawn and handshake errors from the new start.
    pub async fn restart(&mut self, name: &str) -> Result<SessionId> {
        let Some(old) = self.agents.remove(name) else {
            return Err(AppError::NotFound(format!("agent `{name}`")));
        };
        let AgentEntry {
            working_directory,
            target,
            state,
        } = old;

        if let EntryState::Ready(ready) = state {
            ready.coalescer.discard();
            self.close_client(name, &ready.client).await;
        }

        info!(agent = name, cwd = %working_directory.display(), "restarting agent");
        match self
            .start_agent(name, &working_directory, &target, SessionSource::New)
            .await
        {
            Ok(ready) => Ok(self.insert_ready(name, working_directory, target, ready)),
            Err(err) => {
                self.agents.insert(
                    name.to_owned(),
                    AgentEntry {
                        working_directory,
                        target,
                        state: EntryState::Faulted {
                            reason: err.to_string(),
                        },
                    },
                );
                Err(err)
            }
        }
    }

    /// Tear down `name` and forget it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if there is no such agent.
    pub async fn delete(&mut self, name: &str) -> Result<()> {
        let Some(entry) = self.agents.remove(name) else {
            return Err(AppError::NotFound(format!("agent `{name}`")));
        };
        if let EntryState::Ready(ready) = entry.state {
            ready.coalescer.flush();
            self.close_client(name, &ready.client).await;
        }
        {
            let mut active = self.active.lock();
            if active.as_deref() == Some(name) {
                *active = None;
            }
        }
        info!(agent = name, "agent deleted");
        Ok(())
    }

    /// Run one prompt turn on `name` and wait for it to finish.
    ///
    /// A heartbeat runs for the length of the turn and is fully stopped
    /// before the final flush. On any failure the buffered partial output is
    /// flushed and an error notice follows it; the session stays usable
    /// unless the failure was fatal for the agent, in which case the entry
    /// is marked faulted.
    ///
    /// # Errors
    ///
    /// Propagates the turn's error after delivering it to the user.
    pub async fn send_prompt(&mut self, name: &str, input: PromptInput) -> Result<StopReason> {
        let (session, coalescer) = {
            let ready = self.ready(name)?;
            (Arc::clone(&ready.session), ready.coalescer.clone())
        };

        let preview = input.preview();
        let blocks = match input.into_blocks(session.supports_images()) {
            Ok(blocks) => blocks,
            Err(err) => {
                coalescer.emit(render_error(&err));
                return Err(err);
            }
        };

        let heartbeat = Heartbeat::new(
            name,
            coalescer.target().clone(),
            self.config.output.heartbeat_interval(),
            self.outbox.clone(),
        )
        .spawn();

        let abort = CancellationToken::new();
        *self.in_flight.lock() = Some(InFlight {
            agent: name.to_owned(),
            session: Arc::clone(&session),
            abort: abort.clone(),
        });

        info!(agent = name, session_id = %session.session_id(), prompt = preview, "turn started");
        let result = tokio::select! {
            result = session.prompt(blocks) => result,
            () = abort.cancelled() => Err(AppError::Unavailable(format!(
                "turn on agent `{name}` was abandoned"
            ))),
        };

        self.in_flight.lock().take();
        heartbeat.stop(HEARTBEAT_STOP_BOUND).await;

        match result {
            Ok(stop) => {
                coalescer.flush();
                if stop == StopReason::Cancelled {
                    coalescer.emit(CANCELLED_NOTICE);
                }
                info!(agent = name, %stop, "turn finished");
                Ok(stop)
            }
            Err(err) => {
                warn!(agent = name, %err, "turn failed");
                coalescer.emit(render_error(&err));
                if err.is_fatal_for_agent() {
                    self.fault(name, &err).await;
                }
                Err(err)
            }
        }
    }

    /// Send `session/cancel` for `name` (no-op without an active turn).
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` / `AppError::Unavailable` for unknown or
    /// faulted agents, or a write failure.
    pub async fn cancel(&mut self, name: &str) -> Result<()> {
        let session = Arc::clone(&self.ready(name)?.session);
        session.cancel().await
    }

    /// Change `name`'s mode.
    ///
    /// # Errors
    ///
    /// Propagates lookup and request failures.
    pub async fn set_mode(&mut self, name: &str, mode_id: &str) -> Result<()> {
        let session = Arc::clone(&self.ready(name)?.session);
        self.contain(name, session.set_mode(mode_id).await).await
    }

    /// Change `name`'s model.
    ///
    /// # Errors
    ///
    /// Propagates lookup and request failures.
    pub async fn set_model(&mut self, name: &str, model_id: &str) -> Result<()> {
        let session = Arc::clone(&self.ready(name)?.session);
        self.contain(name, session.set_model(model_id).await).await
    }

    /// Status of every entry, sorted by name.
    #[must_use]
    pub fn list(&self) -> Vec<AgentStatus> {
        let mut all: Vec<AgentStatus> = self
            .agents
            .iter()
            .map(|(name, entry)| self.status_of(name, entry))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Status of one entry.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if there is no such agent.
    pub fn describe(&self, name: &str) -> Result<AgentStatus> {
        self.agents
            .get(name)
            .map(|entry| self.status_of(name, entry))
            .ok_or_else(|| AppError::NotFound(format!("agent `{name}`")))
    }

    /// Close every agent; used at shutdown.
    pub async fn close_all(&mut self) {
        let names: Vec<String> = self.agents.keys().cloned().collect();
        for name in names {
            if let Some(entry) = self.agents.remove(&name) {
                if let EntryState::Ready(ready) = entry.state {
                    ready.coalescer.flush();
                    self.close_client(&name, &ready.client).await;
                }
            }
        }
        *self.active.lock() = None;
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn ready(&mut self, name: &str) -> Result<&ReadyAgent> {
        let entry = self
            .agents
            .get_mut(name)
            .ok_or_else(|| AppError::NotFound(format!("agent `{name}`")))?;

        // A dead stream between turns faults the entry here.
        let dead = matches!(&entry.state, EntryState::Ready(ready) if !ready.client.is_alive());
        if dead {
            warn!(agent = name, "agent stream closed; marking unavailable");
            entry.state = EntryState::Faulted {
                reason: "agent process exited".into(),
            };
        }

        match &entry.state {
            EntryState::Ready(ready) => Ok(ready),
            EntryState::Faulted { reason } => Err(AppError::Unavailable(format!(
                "agent `{name}` needs a restart ({reason})"
            ))),
        }
    }

    fn insert_ready(
        &mut self,
        name: &str,
        working_directory: PathBuf,
        target: TargetId,
        ready: ReadyAgent,
    ) -> SessionId {
        let session_id = ready.session.session_id().clone();
        self.agents.insert(
            name.to_owned(),
            AgentEntry {
                working_directory,
                target,
                state: EntryState::Ready(ready),
            },
        );
        session_id
    }

    async fn start_agent(
        &self,
        name: &str,
        working_directory: &Path,
        target: &TargetId,
        source: SessionSource,
    ) -> Result<ReadyAgent> {
        let timeouts = &self.config.timeouts;
        let spawn = SpawnConfig::from_launch(&self.config.agent, working_directory.to_path_buf());
        let client = Arc::new(RpcClient::start(name, &spawn, timeouts.request())?);

        let coalescer = Coalescer::new(
            name,
            target.clone(),
            self.outbox.clone(),
            self.config.output.flush_delay(),
            RenderLimits {
                message_limit: self.config.output.message_limit,
                tool_output_excerpt: self.config.output.tool_output_excerpt,
            },
        );

        let session = match self
            .open_session(&client, working_directory, &coalescer, source)
            .await
        {
            Ok(session) => session,
            Err(err) => {
                warn!(agent = name, %err, "agent setup failed; closing");
                self.close_client(name, &client).await;
                return Err(err);
            }
        };

        Ok(ReadyAgent {
            client,
            session: Arc::new(session),
            coalescer,
        })
    }

    async fn open_session(
        &self,
        client: &Arc<RpcClient>,
        working_directory: &Path,
        coalescer: &Coalescer,
        source: SessionSource,
    ) -> Result<Session> {
        let init = handshake::initialize(client).await?;
        let events = Arc::new(coalescer.clone());
        let prompt_timeout = self.config.timeouts.prompt();
        match source {
            SessionSource::New => {
                Session::create(
                    Arc::clone(client),
                    init.agent_capabilities,
                    working_directory,
                    events,
                    prompt_timeout,
                )
                .await
            }
            SessionSource::Load(session_id) => {
                Session::load(
                    Arc::clone(client),
                    init.agent_capabilities,
                    session_id,
                    working_directory,
                    events,
                    prompt_timeout,
                )
                .await
            }
        }
    }

    async fn close_client(&self, name: &str, client: &RpcClient) {
        let timeouts = &self.config.timeouts;
        match client
            .close(timeouts.close_grace(), timeouts.reader_join())
            .await
        {
            ShutdownOutcome::Killed => {
                warn!(agent = name, "agent did not exit after terminate; killed");
            }
            outcome => info!(agent = name, ?outcome, "agent closed"),
        }
    }

    async fn contain(&mut self, name: &str, result: Result<()>) -> Result<()> {
        if let Err(err) = &result {
            if err.is_fatal_for_agent() {
                self.fault(name, err).await;
            }
        }
        result
    }

    async fn fault(&mut self, name: &str, err: &AppError) {
        let Some(entry) = self.agents.get_mut(name) else {
            return;
        };
        let previous = std::mem::replace(
            &mut entry.state,
            EntryState::Faulted {
                reason: err.to_string(),
            },
        );
        warn!(agent = name, %err, "agent marked unavailable");
        if let EntryState::Ready(ready) = previous {
            ready.coalescer.discard();
            self.close_client(name, &ready.client).await;
        }
    }

    fn status_of(&self, name: &str, entry: &AgentEntry) -> AgentStatus {
        let mut status = AgentStatus {
            name: name.to_owned(),
            active: self.active.lock().as_deref() == Some(name),
            working_directory: entry.working_directory.clone(),
            target: entry.target.clone(),
            session_id: None,
            fault: None,
            turn_active: false,
            pending_requests: 0,
            modes: None,
            models: None,
        };
        match &entry.state {
            EntryState::Ready(ready) => {
                status.session_id = Some(ready.session.session_id().clone());
                status.turn_active = ready.session.is_turn_active();
                status.pending_requests = ready.client.pending().len();
                status.modes = ready.session.modes();
                status.models = ready.session.models();
            }
            EntryState::Faulted { reason } => status.fault = Some(reason.clone()),
        }
        status
    }
}
