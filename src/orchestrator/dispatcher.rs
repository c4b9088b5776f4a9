//! Command dispatcher and its single worker.
//!
//! Front-end calls become [`Command`]s on a bounded queue. One worker task
//! owns the [`Registry`] and executes commands strictly in arrival order,
//! awaiting each one (including whole prompt turns) before taking the next.
//! That serialization is what keeps at most one prompt in flight per engine.
//!
//! Two operations may not wait behind a running turn:
//! - [`Dispatcher::cancel`] sends `session/cancel` straight to the in-flight
//!   session, then the turn ends through its normal response.
//! - [`Dispatcher::restart`], [`Dispatcher::delete_agent`], and
//!   [`Dispatcher::shutdown`] abandon the in-flight turn of the agent they
//!   target before queuing, so a hung agent can always be recovered.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::config::RelayConfig;
use crate::driver::{Delivery, TargetId};
use crate::models::content::PromptInput;
use crate::models::session::{SessionId, StopReason};
use crate::orchestrator::outbox::Outbox;
use crate::orchestrator::registry::{ActiveAgent, AgentStatus, InFlight, InFlightTurn, Registry};
use crate::{AppError, Result};

/// Operations executed by the worker.
#[derive(Debug)]
pub enum Command {
    /// Start an agent (no-op if it already exists).
    StartSession {
        /// Agent name.
        agent: String,
        /// Working directory override for a new entry.
        working_directory: Option<PathBuf>,
        /// Delivery target for its output.
        target: TargetId,
    },
    /// Start an agent by restoring a persisted session.
    LoadSession {
        /// Agent name.
        agent: String,
        /// Session to restore.
        session_id: SessionId,
        /// Delivery target for its output.
        target: TargetId,
    },
    /// Make an agent the receiver of front-end input, starting it if needed.
    SwitchAgent {
        /// Agent name.
        agent: String,
        /// Delivery target used if the agent has to be started.
        target: TargetId,
    },
    /// Run one prompt turn.
    Prompt {
        /// Agent name; the active agent when `None`.
        agent: Option<String>,
        /// Message and attachments.
        input: PromptInput,
    },
    /// Cancel the current turn (no-op when idle).
    Cancel {
        /// Agent name; the active agent when `None`.
        agent: Option<String>,
    },
    /// Replace an agent with a fresh process and session.
    Restart {
        /// Agent name; the active agent when `None`.
        agent: Option<String>,
    },
    /// Change the session mode.
    SetMode {
        /// Agent name; the active agent when `None`.
        agent: Option<String>,
        /// Mode identifier.
        mode_id: String,
    },
    /// Change the session model.
    SetModel {
        /// Agent name; the active agent when `None`.
        agent: Option<String>,
        /// Model identifier.
        model_id: String,
    },
    /// Tear down and forget an agent.
    DeleteAgent {
        /// Agent name.
        agent: String,
    },
    /// Status of every agent.
    ListAgents,
    /// Status of one agent.
    Describe {
        /// Agent name; the active agent when `None`.
        agent: Option<String>,
    },
    /// Close every agent and stop the worker.
    Shutdown,
}

/// Result payload of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The command completed with nothing to report.
    Done,
    /// A session is ready.
    Session(SessionId),
    /// A turn finished.
    Turn(StopReason),
    /// Agent listing.
    Agents(Vec<AgentStatus>),
    /// One agent's status.
    Status(Box<AgentStatus>),
}

struct Envelope {
    command: Command,
    reply: oneshot::Sender<Result<Reply>>,
}

/// Join handles for the engine's background tasks.
pub struct DispatcherRuntime {
    /// Command worker.
    pub worker: JoinHandle<()>,
    /// Delivery worker.
    pub delivery: JoinHandle<()>,
}

/// Cloneable front-end handle to the engine.
#[derive(Clone)]
pub struct Dispatcher {
    queue_tx: mpsc::Sender<Envelope>,
    in_flight: InFlightTurn,
    active: ActiveAgent,
    outbox: Outbox,
    closing: CancellationToken,
}

impl Dispatcher {
    /// Start the delivery worker and the command worker.
    #[must_use]
    pub fn start(config: Arc<RelayConfig>, delivery: Arc<dyn Delivery>) -> (Self, DispatcherRuntime) {
        let (outbox, delivery_task) = Outbox::start(delivery);
        let in_flight: InFlightTurn = Arc::new(Mutex::new(None));
        let active: ActiveAgent = Arc::new(Mutex::new(None));
        let closing = CancellationToken::new();
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);

        let registry = Registry::new(
            config,
            outbox.clone(),
            Arc::clone(&in_flight),
            Arc::clone(&active),
        );
        let worker = tokio::spawn(
            run_worker(registry, queue_rx, closing.clone()).instrument(info_span!("dispatcher")),
        );

        info!("dispatcher started");
        (
            Self {
                queue_tx,
                in_flight,
                active,
                outbox,
                closing,
            },
            DispatcherRuntime {
                worker,
                delivery: delivery_task,
            },
        )
    }

    /// Queue a command and wait for the worker to finish it.
    ///
    /// # Errors
    ///
    /// - `AppError::QueueClosed` — the engine is shutting down or stopped.
    /// - Any error the command itself produced.
    pub async fn submit(&self, command: Command) -> Result<Reply> {
        if self.closing.is_cancelled() && !matches!(command, Command::Shutdown) {
            return Err(AppError::QueueClosed("engine is shutting down".into()));
        }

        let (reply, response) = oneshot::channel();
        self.queue_tx
            .send(Envelope { command, reply })
            .await
            .map_err(|_| AppError::QueueClosed("dispatcher worker stopped".into()))?;
        response
            .await
            .map_err(|_| AppError::QueueClosed("command dropped during shutdown".into()))?
    }

    /// Start `agent` if it has no entry yet.
    ///
    /// # Errors
    ///
    /// See [`Registry::ensure_agent`].
    pub async fn start_session(
        &self,
        agent: &str,
        working_directory: Option<PathBuf>,
        target: TargetId,
    ) -> Result<SessionId> {
        let reply = self
            .submit(Command::StartSession {
                agent: agent.to_owned(),
                working_directory,
                target,
            })
            .await?;
        expect_session(reply)
    }

    /// Start `agent` by restoring `session_id`.
    ///
    /// # Errors
    ///
    /// See [`Registry::load_agent`].
    pub async fn load_session(
        &self,
        agent: &str,
        session_id: SessionId,
        target: TargetId,
    ) -> Result<SessionId> {
        let reply = self
            .submit(Command::LoadSession {
                agent: agent.to_owned(),
                session_id,
                target,
            })
            .await?;
        expect_session(reply)
    }

    /// Switch the active agent, starting it if needed.
    ///
    /// # Errors
    ///
    /// See [`Registry::switch_active`].
    pub async fn switch_agent(&self, agent: &str, target: TargetId) -> Result<SessionId> {
        let reply = self
            .submit(Command::SwitchAgent {
                agent: agent.to_owned(),
                target,
            })
            .await?;
        expect_session(reply)
    }

    /// Run a prompt turn and wait for its stop reason.
    ///
    /// # Errors
    ///
    /// See [`Registry::send_prompt`].
    pub async fn prompt(&self, agent: Option<&str>, input: PromptInput) -> Result<StopReason> {
        let reply = self
            .submit(Command::Prompt {
                agent: agent.map(str::to_owned),
                input,
            })
            .await?;
        match reply {
            Reply::Turn(stop) => Ok(stop),
            other => Err(unexpected(&other)),
        }
    }

    /// Cancel the running turn.
    ///
    /// `None` means the active agent. With a turn in flight on that agent the
    /// cancel notification is sent immediately; otherwise it is queued and is
    /// a no-op. A turn running on any other agent is left alone.
    ///
    /// # Errors
    ///
    /// Returns a write failure for the in-flight session, or lookup errors
    /// for a named agent.
    pub async fn cancel(&self, agent: Option<&str>) -> Result<()> {
        let Some(agent) = self.target_of(agent) else {
            debug!("cancel with no active agent; ignored");
            return Ok(());
        };
        if let Some(turn) = self.in_flight_for(&agent) {
            debug!(agent, "cancel fast path");
            return turn.session.cancel().await;
        }
        self.submit(Command::Cancel { agent: Some(agent) })
            .await
            .map(drop)
    }

    /// Restart an agent (`None`: the active one), abandoning its in-flight
    /// turn first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when `None` is given and no agent is
    /// active; otherwise see [`Registry::restart`].
    pub async fn restart(&self, agent: Option<&str>) -> Result<SessionId> {
        let agent = self
            .target_of(agent)
            .ok_or_else(|| AppError::NotFound("no active agent".into()))?;
        self.abandon_turn(&agent);
        let reply = self.submit(Command::Restart { agent: Some(agent) }).await?;
        expect_session(reply)
    }

    /// Change an agent's mode.
    ///
    /// # Errors
    ///
    /// See [`Registry::set_mode`].
    pub async fn set_mode(&self, agent: Option<&str>, mode_id: &str) -> Result<()> {
        self.submit(Command::SetMode {
            agent: agent.map(str::to_owned),
            mode_id: mode_id.to_owned(),
        })
        .await
        .map(drop)
    }

    /// Change an agent's model.
    ///
    /// # Errors
    ///
    /// See [`Registry::set_model`].
    pub async fn set_model(&self, agent: Option<&str>, model_id: &str) -> Result<()> {
        self.submit(Command::SetModel {
            agent: agent.map(str::to_owned),
            model_id: model_id.to_owned(),
        })
        .await
        .map(drop)
    }

    /// Tear down and forget an agent, abandoning its in-flight turn first.
    ///
    /// # Errors
    ///
    /// See [`Registry::delete`].
    pub async fn delete_agent(&self, agent: &str) -> Result<()> {
        self.abandon_turn(agent);
        self.submit(Command::DeleteAgent {
            agent: agent.to_owned(),
        })
        .await
        .map(drop)
    }

    /// Status of every agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::QueueClosed` after shutdown.
    pub async fn list_agents(&self) -> Result<Vec<AgentStatus>> {
        match self.submit(Command::ListAgents).await? {
            Reply::Agents(agents) => Ok(agents),
            other => Err(unexpected(&other)),
        }
    }

    /// Status of one agent.
    ///
    /// # Errors
    ///
    /// See [`Registry::describe`].
    pub async fn describe(&self, agent: Option<&str>) -> Result<AgentStatus> {
        let reply = self
            .submit(Command::Describe {
                agent: agent.map(str::to_owned),
            })
            .await?;
        match reply {
            Reply::Status(status) => Ok(*status),
            other => Err(unexpected(&other)),
        }
    }

    /// Stop accepting commands, abandon the running turn, close every agent,
    /// and stop the worker.
    ///
    /// Commands already queued are answered with `AppError::QueueClosed`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::QueueClosed` if the worker had already stopped.
    pub async fn shutdown(&self) -> Result<()> {
        self.closing.cancel();
        if let Some(turn) = self.in_flight.lock().as_ref() {
            info!(agent = turn.agent, "abandoning in-flight turn for shutdown");
            turn.abort.cancel();
        }
        self.submit(Command::Shutdown).await.map(drop)
    }

    /// Wait until every delivery queued so far has been handed to the front-end.
    pub async fn settle(&self) {
        self.outbox.barrier().await;
    }

    /// The agent a command with an optional name would run against.
    fn target_of(&self, agent: Option<&str>) -> Option<String> {
        agent.map(str::to_owned).or_else(|| self.active.lock().clone())
    }

    fn in_flight_for(&self, agent: &str) -> Option<InFlight> {
        self.in_flight
            .lock()
            .as_ref()
            .filter(|turn| turn.agent == agent)
            .cloned()
    }

    fn abandon_turn(&self, agent: &str) {
        if let Some(turn) = self.in_flight_for(agent) {
            info!(agent = turn.agent, "abandoning in-flight turn");
            turn.abort.cancel();
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

async fn run_worker(
    mut registry: Registry,
    mut queue_rx: mpsc::Receiver<Envelope>,
    closing: CancellationToken,
) {
    while let Some(Envelope { command, reply }) = queue_rx.recv().await {
        if matches!(command, Command::Shutdown) {
            registry.close_all().await;
            let _ = reply.send(Ok(Reply::Done));
            break;
        }

        if closing.is_cancelled() {
            let _ = reply.send(Err(AppError::QueueClosed("engine is shutting down".into())));
            continue;
        }

        debug!(command = command_name(&command), "executing command");
        let result = execute(&mut registry, command).await;
        if reply.send(result).is_err() {
            debug!("command issuer went away before the reply");
        }
    }

    // Answer anything still queued and refuse new work.
    queue_rx.close();
    while let Ok(Envelope { reply, .. }) = queue_rx.try_recv() {
        let _ = reply.send(Err(AppError::QueueClosed("engine stopped".into())));
    }
    registry.close_all().await;
    info!("dispatcher worker exiting");
}

async fn execute(registry: &mut Registry, command: Command) -> Result<Reply> {
    match command {
        Command::StartSession {
            agent,
            working_directory,
            target,
        } => registry
            .ensure_agent(&agent, working_directory, target)
            .await
            .map(Reply::Session),
        Command::LoadSession {
            agent,
            session_id,
            target,
        } => registry
            .load_agent(&agent, session_id, target)
            .await
            .map(Reply::Session),
        Command::SwitchAgent { agent, target } => registry
            .switch_active(&agent, target)
            .await
            .map(Reply::Session),
        Command::Prompt { agent, input } => {
            let name = registry.resolve(agent.as_deref())?;
            registry.send_prompt(&name, input).await.map(Reply::Turn)
        }
        Command::Cancel { agent } => match registry.resolve(agent.as_deref()) {
            Ok(name) => registry.cancel(&name).await.map(|()| Reply::Done),
            // Nothing to cancel.
            Err(_) => Ok(Reply::Done),
        },
        Command::Restart { agent } => {
            let name = registry.resolve(agent.as_deref())?;
            registry.restart(&name).await.map(Reply::Session)
        }
        Command::SetMode { agent, mode_id } => {
            let name = registry.resolve(agent.as_deref())?;
            registry
                .set_mode(&name, &mode_id)
                .await
                .map(|()| Reply::Done)
        }
        Command::SetModel { agent, model_id } => {
            let name = registry.resolve(agent.as_deref())?;
            registry
                .set_model(&name, &model_id)
                .await
                .map(|()| Reply::Done)
        }
        Command::DeleteAgent { agent } => registry.delete(&agent).await.map(|()| Reply::Done),
        Command::ListAgents => Ok(Reply::Agents(registry.list())),
        Command::Describe { agent } => {
            let name = registry.resolve(agent.as_deref())?;
            registry
                .describe(&name)
                .map(|status| Reply::Status(Box::new(status)))
        }
        // Handled by the worker loop.
        Command::Shutdown => Ok(Reply::Done),
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::StartSession { .. } => "start_session",
        Command::LoadSession { .. } => "load_session",
        Command::SwitchAgent { .. } => "switch_agent",
        Command::Prompt { .. } => "prompt",
        Command::Cancel { .. } => "cancel",
        Command::Restart { .. } => "restart",
        Command::SetMode { .. } => "set_mode",
        Command::SetModel { .. } => "set_model",
        Command::DeleteAgent { .. } => "delete_agent",
        Command::ListAgents => "list_agents",
        Command::Describe { .. } => "describe",
        Command::Shutdown => "shutdown",
    }
}

fn expect_session(reply: Reply) -> Result<SessionId> {
    match reply {
        Reply::Session(id) => Ok(id),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(reply: &Reply) -> AppError {
    AppError::Acp(format!("unexpected dispatcher reply: {reply:?}"))
}
