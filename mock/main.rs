#![forbid(unsafe_code)]

//! `mock-acp-agent` — a scripted ACP agent for exercising the relay.
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout. Each line of a prompt's
//! text is one step:
//!
//! ```text
//! chunk <text>          agent_message_chunk (text kept verbatim, spaces included)
//! thought <text>        agent_thought_chunk
//! sleep <ms>            pause; session/cancel interrupts it
//! tool <title>          tool_call (kind execute, command = title)
//! tool_done <stdout>    tool_call_update completing the last tool
//! permission            session/request_permission, then a chunk naming the answer
//! compaction <label>    vendor compaction status notification
//! foreign <text>        chunk addressed to a different session id
//! noise                 a non-JSON line on stdout
//! stale                 responses for request ids the relay never issued
//! error <code> <msg>    answer the prompt with a JSON-RPC error
//! stop <reason>         answer the prompt with this stop reason
//! hang                  never answer, even when cancelled
//! exit <code>           terminate the process immediately
//! anything else         echoed back as one chunk
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use acp_relay::acp::message::{
    error_frame, notification_frame, request_frame, response_frame, RpcError, INVALID_PARAMS,
    METHOD_NOT_FOUND,
};
use acp_relay::{AppError, Result};

const MODES: [&str; 2] = ["default", "plan"];
const MODELS: [&str; 2] = ["mock-small", "mock-large"];

#[derive(Debug, Parser)]
#[command(name = "mock-acp-agent", about = "Scripted ACP agent for tests", version, long_about = None)]
struct Cli {
    /// Ignore SIGTERM and keep running after stdin closes.
    #[arg(long)]
    ignore_sigterm: bool,

    /// Advertise no `loadSession` capability.
    #[arg(long)]
    no_load_session: bool,

    /// Advertise no image prompt capability.
    #[arg(long)]
    no_images: bool,
}

/// Serialized writer for stdout frames.
struct Output {
    stdout: tokio::sync::Mutex<Stdout>,
}

impl Output {
    async fn line(&self, line: &str) {
        let mut out = self.stdout.lock().await;
        let written = async {
            out.write_all(line.as_bytes()).await?;
            out.write_all(b"\n").await?;
            out.flush().await
        };
        if let Err(err) = written.await {
            warn!(%err, "stdout write failed");
        }
    }

    async fn frame(&self, frame: &Value) {
        self.line(&frame.to_string()).await;
    }
}

struct Agent {
    cli: Cli,
    out: Output,
    session_id: Mutex<Option<String>>,
    mode: Mutex<String>,
    model: Mutex<String>,
    turn: Mutex<Option<CancellationToken>>,
    next_id: AtomicU64,
    waiting: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let ignore_sigterm = cli.ignore_sigterm;
    if ignore_sigterm {
        ignore_terminate()?;
    }

    let agent = Arc::new(Agent {
        cli,
        out: Output {
            stdout: tokio::sync::Mutex::new(tokio::io::stdout()),
        },
        session_id: Mutex::new(None),
        mode: Mutex::new(MODES[0].to_owned()),
        model: Mutex::new(MODELS[0].to_owned()),
        turn: Mutex::new(None),
        next_id: AtomicU64::new(1),
        waiting: Mutex::new(HashMap::new()),
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Ok(message) = serde_json::from_str::<Value>(&line) else {
            warn!(line, "ignoring non-JSON input");
            continue;
        };
        let agent = Arc::clone(&agent);
        // Each message is handled on its own task so cancel reaches a running turn.
        tokio::spawn(async move { agent.handle(message).await });
    }

    info!("stdin closed");
    if ignore_sigterm {
        std::future::pending::<()>().await;
    }
    Ok(())
}

#[cfg(unix)]
fn ignore_terminate() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    // Registering a listener replaces the default terminate action.
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        while sigterm.recv().await.is_some() {
            info!("SIGTERM ignored");
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn ignore_terminate() -> Result<()> {
    Ok(())
}

impl Agent {
    async fn handle(self: Arc<Self>, message: Value) {
        let id = message.get("id").cloned();
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let params = message.get("params").cloned().unwrap_or(Value::Null);

        match (id, method) {
            (Some(id), Some(method)) => {
                let frame = match self.request(&method, params).await {
                    Ok(result) => response_frame(id, result),
                    Err(error) => error_frame(id, &error),
                };
                self.out.frame(&frame).await;
            }
            (None, Some(method)) => self.notification(&method),
            (Some(id), None) => self.response(&id, message),
            (None, None) => warn!("ignoring message without id or method"),
        }
    }

    async fn request(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        debug!(method, "request");
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": params.get("protocolVersion").cloned().unwrap_or(json!(1)),
                "agentCapabilities": {
                    "loadSession": !self.cli.no_load_session,
                    "promptCapabilities": {"image": !self.cli.no_images},
                },
                "agentInfo": {"name": "mock-acp-agent", "version": env!("CARGO_PKG_VERSION")},
            })),
            "session/new" => {
                let session_id = uuid::Uuid::new_v4().to_string();
                *self.session_id.lock() = Some(session_id.clone());
                let mut result = self.mode_state();
                result["sessionId"] = json!(session_id);
                Ok(result)
            }
            "session/load" => {
                let session_id = params
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::new(INVALID_PARAMS, "sessionId is required"))?;
                if self.cli.no_load_session {
                    return Err(RpcError::new(METHOD_NOT_FOUND, "session/load not supported"));
                }
                *self.session_id.lock() = Some(session_id.to_owned());
                Ok(self.mode_state())
            }
            "session/set_mode" => {
                let mode = choose(&params, "modeId", &MODES)?;
                *self.mode.lock() = mode;
                Ok(json!({}))
            }
            "session/set_model" => {
                let model = choose(&params, "modelId", &MODELS)?;
                *self.model.lock() = model;
                Ok(json!({}))
            }
            "session/prompt" => self.prompt(&params).await,
            other => Err(RpcError::new(
                METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            )),
        }
    }

    fn notification(&self, method: &str) {
        if method == "session/cancel" {
            if let Some(turn) = self.turn.lock().as_ref() {
                info!("turn cancelled");
                turn.cancel();
            }
        } else {
            debug!(method, "ignoring notification");
        }
    }

    fn response(&self, id: &Value, message: Value) {
        let Some(id) = id.as_u64() else {
            return;
        };
        if let Some(waiter) = self.waiting.lock().remove(&id) {
            let _ = waiter.send(message);
        }
    }

    fn mode_state(&self) -> Value {
        let modes: Vec<Value> = MODES
            .iter()
            .map(|id| json!({"id": id, "name": id}))
            .collect();
        let models: Vec<Value> = MODELS
            .iter()
            .map(|id| json!({"modelId": id, "name": id}))
            .collect();
        json!({
            "modes": {"currentModeId": self.mode.lock().clone(), "availableModes": modes},
            "models": {"currentModelId": self.model.lock().clone(), "availableModels": models},
        })
    }

    async fn prompt(&self, params: &Value) -> std::result::Result<Value, RpcError> {
        let script: String = params
            .get("prompt")
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|block| block.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        let cancel = CancellationToken::new();
        *self.turn.lock() = Some(cancel.clone());
        let outcome = self.run_script(&script, &cancel).await;
        self.turn.lock().take();

        outcome.map(|reason| json!({"stopReason": reason}))
    }

    async fn run_script(
        &self,
        script: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<String, RpcError> {
        let mut tool_seq = 0_u32;

        for line in script.lines() {
            if cancel.is_cancelled() {
                return Ok("cancelled".into());
            }
            let (verb, arg) = line.split_once(' ').unwrap_or((line, ""));

            match verb {
                "chunk" => self.update(message_chunk("agent_message_chunk", arg)).await,
                "thought" => self.update(message_chunk("agent_thought_chunk", arg)).await,
                "sleep" => {
                    let ms = arg.trim().parse().unwrap_or(0);
                    tokio::select! {
                        () = cancel.cancelled() => return Ok("cancelled".into()),
                        () = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    }
                }
                "tool" => {
                    tool_seq += 1;
                    self.update(json!({
                        "sessionUpdate": "tool_call",
                        "toolCallId": format!("call-{tool_seq}"),
                        "title": arg,
                        "kind": "execute",
                        "status": "pending",
                        "rawInput": {"command": arg},
                    }))
                    .await;
                }
                "tool_done" => {
                    self.update(json!({
                        "sessionUpdate": "tool_call_update",
                        "toolCallId": format!("call-{tool_seq}"),
                        "status": "completed",
                        "rawOutput": {"items": [{"Json": {"stdout": arg, "stderr": ""}}]},
                    }))
                    .await;
                }
                "permission" => {
                    let answer = tokio::select! {
                        () = cancel.cancelled() => return Ok("cancelled".into()),
                        answer = self.ask_permission() => answer,
                    };
                    self.update(message_chunk("agent_message_chunk", &format!("permission: {answer}")))
                        .await;
                }
                "compaction" => {
                    let params = json!({"sessionId": self.current_session(), "status": arg});
                    self.out
                        .frame(&notification_frame("_mock.dev/compaction/status", params))
                        .await;
                }
                "foreign" => {
                    let params = json!({
                        "sessionId": "some-other-session",
                        "update": {"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": arg}},
                    });
                    self.out.frame(&notification_frame("session/update", params)).await;
                }
                "noise" => self.out.line("this is not json").await,
                "stale" => {
                    self.out.frame(&response_frame(json!(999_999), json!({}))).await;
                    self.out
                        .frame(&error_frame(json!(999_998), &RpcError::new(-32000, "stale")))
                        .await;
                }
                "error" => {
                    let (code, message) = arg.split_once(' ').unwrap_or((arg, "mock error"));
                    return Err(RpcError::new(code.parse().unwrap_or(-32000), message));
                }
                "stop" => return Ok(arg.trim().to_owned()),
                "hang" => std::future::pending::<()>().await,
                "exit" => std::process::exit(arg.trim().parse().unwrap_or(1)),
                _ => self.update(message_chunk("agent_message_chunk", line)).await,
            }
        }

        if cancel.is_cancelled() {
            Ok("cancelled".into())
        } else {
            Ok("end_turn".into())
        }
    }

    async fn ask_permission(&self) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiting.lock().insert(id, tx);

        let params = json!({
            "sessionId": self.current_session(),
            "toolCall": {"toolCallId": "perm-1", "title": "write file"},
            "options": [
                {"optionId": "reject", "name": "Reject", "kind": "reject_once"},
                {"optionId": "allow", "name": "Allow", "kind": "allow_once"},
            ],
        });
        self.out
            .frame(&request_frame(id, "session/request_permission", params))
            .await;

        let Ok(response) = rx.await else {
            return "no answer".into();
        };
        response
            .pointer("/result/outcome/optionId")
            .and_then(Value::as_str)
            .map_or_else(|| "cancelled".to_owned(), str::to_owned)
    }

    async fn update(&self, update: Value) {
        let params = json!({"sessionId": self.current_session(), "update": update});
        self.out.frame(&notification_frame("session/update", params)).await;
    }

    fn current_session(&self) -> String {
        self.session_id.lock().clone().unwrap_or_default()
    }
}

fn message_chunk(kind: &str, text: &str) -> Value {
    json!({"sessionUpdate": kind, "content": {"type": "text", "text": text}})
}

fn choose(params: &Value, field: &str, allowed: &[&str]) -> std::result::Result<String, RpcError> {
    let value = params
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::new(INVALID_PARAMS, format!("{field} is required")))?;
    if allowed.contains(&value) {
        Ok(value.to_owned())
    } else {
        Err(RpcError::new(INVALID_PARAMS, format!("unknown {field}: {value}")))
    }
}
