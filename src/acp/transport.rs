//! Agent subprocess transport.
//!
//! A [`Transport`] owns one agent process and the three tasks bound to its
//! stdio: the writer (outbound lines), the reader (classification and
//! dispatch), and the stderr drain. It knows nothing about request ids;
//! correlation lives in [`crate::acp::rpc`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::reader::{run_reader, InboundSink};
use crate::acp::spawner::{drain_stderr, spawn_agent, SpawnConfig};
use crate::acp::writer::run_writer;
use crate::{AppError, Result};

/// Outbound lines buffered ahead of the writer task.
const OUTBOUND_CAPACITY: usize = 64;

/// How an agent process ended during [`Transport::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The process exited within the grace period.
    Exited(Option<i32>),
    /// The process ignored the terminate signal and was killed.
    Killed,
    /// The transport had already been closed.
    AlreadyClosed,
}

struct Tasks {
    child: Child,
    reader: JoinHandle<()>,
    writer: JoinHandle<Result<()>>,
    stderr: JoinHandle<()>,
}

/// Line-oriented JSON transport over an agent's stdio.
pub struct Transport {
    agent: String,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    stream_closed: CancellationToken,
    tasks: Mutex<Option<Tasks>>,
}

impl Transport {
    /// Spawn the agent and start the reader, writer, and stderr tasks.
    ///
    /// Every inbound message is handed to `sink` on the reader task.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process cannot be launched.
    pub fn start(config: &SpawnConfig, agent: &str, sink: Arc<dyn InboundSink>) -> Result<Self> {
        let process = spawn_agent(config, agent)?;
        let cancel = CancellationToken::new();
        let stream_closed = CancellationToken::new();
        let (outbound, outbound_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

        let writer = tokio::spawn(run_writer(
            agent.to_owned(),
            process.stdin,
            outbound_rx,
            cancel.clone(),
        ));

        let reader = {
            let agent = agent.to_owned();
            let replies = outbound.clone();
            let cancel = cancel.clone();
            let stream_closed = stream_closed.clone();
            tokio::spawn(async move {
                run_reader(agent, process.stdout, sink, replies, cancel).await;
                stream_closed.cancel();
            })
        };

        let stderr = drain_stderr(agent.to_owned(), process.stderr);

        Ok(Self {
            agent: agent.to_owned(),
            outbound,
            cancel,
            stream_closed,
            tasks: Mutex::new(Some(Tasks {
                child: process.child,
                reader,
                writer,
                stderr,
            })),
        })
    }

    /// Serialise `frame` and queue it for the writer.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConnectionClosed` if the stream has ended or the
    /// writer has stopped.
    pub async fn send(&self, frame: &Value) -> Result<()> {
        if !self.is_alive() {
            return Err(AppError::ConnectionClosed(format!(
                "agent `{}` stream is closed",
                self.agent
            )));
        }
        let line = serde_json::to_string(frame)?;
        self.outbound.send(line).await.map_err(|_| {
            AppError::ConnectionClosed(format!("agent `{}` writer stopped", self.agent))
        })
    }

    /// Whether the reader is still running and the writer still accepts lines.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.stream_closed.is_cancelled() && !self.outbound.is_closed()
    }

    /// Stop the agent: terminate signal, bounded wait, forced kill.
    ///
    /// The reader, writer, and stderr tasks share one `reader_join` deadline;
    /// any still running at the deadline is aborted. Closing twice returns
    /// [`ShutdownOutcome::AlreadyClosed`].
    pub async fn close(&self, grace: Duration, reader_join: Duration) -> ShutdownOutcome {
        let Some(mut tasks) = self.tasks.lock().take() else {
            return ShutdownOutcome::AlreadyClosed;
        };

        // Stops the writer (stdin EOF) and the reader (fails pending requests).
        self.cancel.cancel();
        send_terminate(&self.agent, &mut tasks.child);

        let outcome = match tokio::time::timeout(grace, tasks.child.wait()).await {
            Ok(Ok(status)) => {
                info!(agent = self.agent, code = status.code(), "agent exited");
                ShutdownOutcome::Exited(status.code())
            }
            Ok(Err(err)) => {
                warn!(agent = self.agent, %err, "failed to wait for agent; killing");
                force_kill(&self.agent, &mut tasks.child).await
            }
            Err(_elapsed) => {
                warn!(
                    agent = self.agent,
                    grace = ?grace,
                    "agent ignored terminate signal; killing"
                );
                force_kill(&self.agent, &mut tasks.child).await
            }
        };

        let deadline = Instant::now() + reader_join;
        tokio::join!(
            join_until(&self.agent, "reader", tasks.reader, deadline),
            join_until(&self.agent, "writer", tasks.writer, deadline),
            join_until(&self.agent, "stderr", tasks.stderr, deadline),
        );

        outcome
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        // `kill_on_drop` reaps the child with the handle; stop the tasks too.
        self.cancel.cancel();
    }
}

// ── Private helpers ───────────────────────────────────────────────────────────

#[cfg(unix)]
fn send_terminate(agent: &str, child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        debug!(agent, "agent already reaped; no signal sent");
        return;
    };
    if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(agent, %err, "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_terminate(agent: &str, child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(agent, %err, "failed to terminate agent");
    }
}

async fn force_kill(agent: &str, child: &mut Child) -> ShutdownOutcome {
    if let Err(err) = child.kill().await {
        warn!(agent, %err, "failed to kill agent");
    }
    ShutdownOutcome::Killed
}

async fn join_until<T>(agent: &str, task: &str, mut handle: JoinHandle<T>, deadline: Instant) {
    if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
        warn!(agent, task, "task did not stop in time; aborting");
        handle.abort();
    }
}
