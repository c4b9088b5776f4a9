//! ACP reader task.
//!
//! Reads newline-delimited JSON messages from an agent's stdout, classifies
//! each line as a response, request, or notification, and hands it to an
//! [`InboundSink`] on this task. Exactly one reader runs per transport, so
//! messages reach the sink in the order the agent wrote them.
//!
//! The reader is driven by [`FramedRead`] backed by [`AcpCodec`], which
//! enforces the 1 MiB per-line limit before any heap allocation for JSON
//! parsing.

use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::{AcpCodec, InboundFrame};
use crate::acp::message::RpcMessage;
use crate::{AppError, Result};

/// Longest raw-line excerpt included in parse-error logs.
const LOG_EXCERPT_CHARS: usize = 200;

/// Consumer of classified inbound messages.
///
/// Called synchronously on the reader task; implementations must not block.
pub trait InboundSink: Send + Sync {
    /// Handle one message. A returned value is written back to the agent as
    /// the reply to an agent-initiated request.
    fn dispatch(&self, message: RpcMessage) -> Option<Value>;

    /// The stream ended; no further messages will arrive.
    fn closed(&self, reason: &str);
}

/// Parse a single NDJSON line into a classified message.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// - [`AppError::Acp`]`("malformed json: …")` — not valid JSON.
/// - [`AppError::Acp`] from [`RpcMessage::classify`] — not a JSON-RPC shape.
pub fn parse_inbound_line(line: &str) -> Result<Option<RpcMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    let value: Value =
        serde_json::from_str(line).map_err(|e| AppError::Acp(format!("malformed json: {e}")))?;
    RpcMessage::classify(value).map(Some)
}

/// ACP reader task.
///
/// Malformed and oversized lines are logged and skipped; they do **not**
/// terminate the reader. On EOF, I/O error, or cancellation the sink is told
/// the stream closed, which fails every outstanding request.
pub async fn run_reader<R>(
    agent: String,
    stdout: R,
    sink: Arc<dyn InboundSink>,
    replies: mpsc::Sender<String>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(stdout, AcpCodec::new());

    let reason = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(agent, "acp reader: cancellation received, stopping");
                break "transport closed".to_owned();
            }

            item = framed.next() => {
                match item {
                    None => {
                        debug!(agent, "acp reader: EOF detected");
                        break "agent stream closed".to_owned();
                    }

                    Some(Err(e)) => {
                        warn!(agent, error = %e, "acp reader: IO error, stopping");
                        break format!("stream error: {e}");
                    }

                    Some(Ok(InboundFrame::Oversized)) => {
                        warn!(agent, "acp reader: line too long, skipping");
                    }

                    Some(Ok(InboundFrame::Line(line))) => match parse_inbound_line(&line) {
                        Ok(Some(message)) => {
                            if let Some(reply) = sink.dispatch(message) {
                                send_reply(&agent, &replies, &reply).await;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(
                                agent,
                                error = %e,
                                raw_line = %excerpt(&line),
                                "acp reader: parse error, skipping line"
                            );
                        }
                    },
                }
            }
        }
    };

    sink.closed(&reason);
}

// ── Private helpers ───────────────────────────────────────────────────────────

async fn send_reply(agent: &str, replies: &mpsc::Sender<String>, reply: &Value) {
    match serde_json::to_string(reply) {
        Ok(line) => {
            if replies.send(line).await.is_err() {
                debug!(agent, "acp reader: writer gone, reply dropped");
            }
        }
        Err(e) => warn!(agent, error = %e, "acp reader: failed to serialise reply"),
    }
}

fn excerpt(line: &str) -> String {
    if line.chars().count() <= LOG_EXCERPT_CHARS {
        return line.to_owned();
    }
    let head: String = line.chars().take(LOG_EXCERPT_CHARS).collect();
    format!("{head}…")
}
