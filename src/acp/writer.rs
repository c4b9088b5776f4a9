//! ACP writer task.
//!
//! Receives serialised JSON lines from a tokio [`mpsc`] channel and writes
//! them to the agent's `stdin` through a [`FramedWrite`] over [`AcpCodec`],
//! which appends the `\n` delimiter.

use futures_util::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::AcpCodec;
use crate::{AppError, Result};

/// ACP writer task.
///
/// Exits cleanly when `cancel` fires or every sender is dropped; either way
/// `stdin` is dropped, which the agent observes as EOF.
///
/// # Errors
///
/// Returns [`AppError::ConnectionClosed`] if a write fails (e.g. the agent
/// process has exited). The receiver is dropped with the task, so later
/// sends fail as well.
pub async fn run_writer<W>(
    agent: String,
    stdin: W,
    mut msg_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut framed = FramedWrite::new(stdin, AcpCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(agent, "acp writer: cancellation received, stopping");
                break;
            }

            msg = msg_rx.recv() => {
                let Some(line) = msg else {
                    debug!(agent, "acp writer: message channel closed, stopping");
                    break;
                };

                if let Err(e) = framed.send(line).await {
                    warn!(agent, error = %e, "acp writer: write to stdin failed");
                    return Err(AppError::ConnectionClosed(format!("write failed: {e}")));
                }
            }
        }
    }

    Ok(())
}
