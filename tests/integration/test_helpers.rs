//! Shared helpers for process-level tests against `mock-acp-agent`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use acp_relay::acp::handshake;
use acp_relay::acp::rpc::RpcClient;
use acp_relay::acp::session::{Session, SessionEvents};
use acp_relay::acp::spawner::SpawnConfig;
use acp_relay::driver::{Delivery, TargetId};
use acp_relay::models::content::{ContentBlock, PromptInput};
use acp_relay::models::update::{ToolCall, ToolCallUpdate};
use acp_relay::orchestrator::dispatcher::{Dispatcher, DispatcherRuntime};
use acp_relay::{RelayConfig, Result};

/// Path of the scripted agent built alongside the tests.
pub const MOCK_AGENT: &str = env!("CARGO_BIN_EXE_mock-acp-agent");

/// Relay configuration launching the mock agent in `dir`.
pub fn mock_config(dir: &Path, args: &[&str]) -> RelayConfig {
    let mut config = RelayConfig::default();
    config.agent.command = MOCK_AGENT.to_owned();
    config.agent.args = args.iter().map(|arg| (*arg).to_owned()).collect();
    config.default_working_directory = dir.to_path_buf();
    config.timeouts.request_seconds = 10;
    config.timeouts.prompt_seconds = 30;
    config.timeouts.close_grace_seconds = 1;
    config.timeouts.reader_join_seconds = 2;
    config.output.heartbeat_interval_ms = 1000;
    config.validate().expect("test config is valid");
    config
}

pub fn spawn_config(dir: &Path, args: &[&str]) -> SpawnConfig {
    SpawnConfig::from_launch(&mock_config(dir, args).agent, dir.to_path_buf())
}

/// Prompt blocks whose text is one script line per entry.
pub fn script(lines: &[&str]) -> Vec<ContentBlock> {
    vec![ContentBlock::text(lines.join("\n"))]
}

pub fn script_input(lines: &[&str]) -> PromptInput {
    PromptInput::text(lines.join("\n"))
}

/// Spawn the mock, initialize it, and create a session.
pub async fn open_session(
    dir: &Path,
    args: &[&str],
    prompt_timeout: Duration,
) -> (Arc<RpcClient>, Session, Arc<RecordingEvents>) {
    let client = Arc::new(
        RpcClient::start("mock", &spawn_config(dir, args), Duration::from_secs(10))
            .expect("mock agent spawns"),
    );
    let init = handshake::initialize(&client).await.expect("initialize");
    let events = Arc::new(RecordingEvents::default());
    let session = Session::create(
        Arc::clone(&client),
        init.agent_capabilities,
        dir,
        events.clone(),
        prompt_timeout,
    )
    .await
    .expect("session/new");
    (client, session, events)
}

/// Start an engine wired to a recording delivery.
pub fn start_engine(config: RelayConfig) -> (Dispatcher, DispatcherRuntime, Arc<RecordingDelivery>) {
    let delivery = Arc::new(RecordingDelivery::default());
    let (dispatcher, runtime) = Dispatcher::start(Arc::new(config), delivery.clone());
    (dispatcher, runtime, delivery)
}

pub fn target() -> TargetId {
    TargetId::from("chan")
}

/// `SessionEvents` that keeps everything it sees.
#[derive(Default)]
pub struct RecordingEvents {
    pub chunks: Mutex<Vec<String>>,
    pub tools: Mutex<Vec<String>>,
}

impl RecordingEvents {
    pub fn chunks(&self) -> Vec<String> {
        self.chunks.lock().clone()
    }
}

impl SessionEvents for RecordingEvents {
    fn on_chunk(&self, text: &str) {
        self.chunks.lock().push(text.to_owned());
    }

    fn on_tool_call(&self, call: &ToolCall) {
        self.tools.lock().push(call.title.clone());
    }

    fn on_tool_update(&self, update: &ToolCallUpdate) {
        self.tools
            .lock()
            .push(format!("{}:{}", update.tool_call_id, update.status.as_deref().unwrap_or_default()));
    }
}

/// One call observed by [`RecordingDelivery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Text(String),
    Activity,
}

/// `Delivery` that records calls in order.
#[derive(Default)]
pub struct RecordingDelivery {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingDelivery {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Recorded::Text(text) => Some(text.clone()),
                Recorded::Activity => None,
            })
            .collect()
    }

    pub fn activity_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| **event == Recorded::Activity)
            .count()
    }
}

impl Delivery for RecordingDelivery {
    fn deliver(
        &self,
        _target: TargetId,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.events.lock().push(Recorded::Text(text));
            Ok(())
        })
    }

    fn signal_activity(
        &self,
        _target: TargetId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.events.lock().push(Recorded::Activity);
            Ok(())
        })
    }
}
