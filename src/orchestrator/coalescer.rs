//! Turn output coalescer.
//!
//! Reply text arrives as many small chunks. The coalescer buffers them and
//! flushes one delivery unit after `flush_delay` without a new chunk (a
//! sliding window), or immediately when the turn completes.
//!
//! States:
//!
//! ```text
//!   Idle ──chunk──▶ Buffering ──chunk──▶ Buffering (timer re-armed)
//!                       │
//!            timer / tool event / finish
//!                       ▼
//!                   Flushing ──▶ Idle
//! ```
//!
//! `Flushing` is the step that takes the buffer and queues it on the
//! [`Outbox`]. It runs under the buffer lock, which is never held across
//! delivery I/O: the outbox only enqueues. Tool events are never buffered;
//! they flush pending text first so the user sees output in emission order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::acp::session::SessionEvents;
use crate::driver::TargetId;
use crate::models::update::{ExtensionEvent, ToolCall, ToolCallUpdate};
use crate::orchestrator::outbox::Outbox;
use crate::orchestrator::render::{
    render_compaction, render_tool_call, render_tool_output, split_message,
};

/// Observable coalescer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescerState {
    /// Nothing buffered, no timer armed.
    Idle,
    /// Text buffered and a flush timer armed.
    Buffering {
        /// Number of chunks waiting.
        chunks: usize,
    },
}

/// Rendering limits applied at flush time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLimits {
    /// Maximum characters per delivery unit.
    pub message_limit: usize,
    /// Characters kept from each end of tool output.
    pub tool_output_excerpt: usize,
}

#[derive(Default)]
struct Buffer {
    pending: Vec<String>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever the armed timer is superseded or the buffer is flushed.
    generation: u64,
}

struct Inner {
    agent: String,
    target: TargetId,
    outbox: Outbox,
    flush_delay: Duration,
    limits: RenderLimits,
    buffer: Mutex<Buffer>,
}

impl Inner {
    /// Take the buffer and queue it. Caller holds the lock.
    fn flush_locked(&self, buffer: &mut Buffer) {
        buffer.generation = buffer.generation.wrapping_add(1);
        if let Some(timer) = buffer.timer.take() {
            timer.abort();
        }
        if buffer.pending.is_empty() {
            return;
        }

        let text = std::mem::take(&mut buffer.pending).concat();
        debug!(agent = self.agent, len = text.len(), "flushing coalesced text");
        for piece in split_message(&text, self.limits.message_limit) {
            self.outbox.deliver(&self.target, piece);
        }
    }

    fn flush_if_current(&self, generation: u64) {
        let mut buffer = self.buffer.lock();
        if buffer.generation != generation {
            // Superseded by a newer chunk or an explicit flush.
            return;
        }
        // This task is the timer; do not abort ourselves.
        buffer.timer = None;
        self.flush_locked(&mut buffer);
    }
}

/// Per-agent output coalescer bound to one delivery target.
#[derive(Clone)]
pub struct Coalescer {
    inner: Arc<Inner>,
}

impl Coalescer {
    /// Create an idle coalescer.
    #[must_use]
    pub fn new(
        agent: impl Into<String>,
        target: TargetId,
        outbox: Outbox,
        flush_delay: Duration,
        limits: RenderLimits,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agent: agent.into(),
                target,
                outbox,
                flush_delay,
                limits,
                buffer: Mutex::new(Buffer::default()),
            }),
        }
    }

    /// Append a chunk and re-arm the flush timer.
    ///
    /// Must be called within a tokio runtime.
    pub fn push_chunk(&self, text: &str) {
        let mut buffer = self.inner.buffer.lock();
        buffer.pending.push(text.to_owned());

        if let Some(timer) = buffer.timer.take() {
            timer.abort();
        }
        buffer.generation = buffer.generation.wrapping_add(1);
        let generation = buffer.generation;

        let inner = Arc::clone(&self.inner);
        buffer.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.flush_delay).await;
            inner.flush_if_current(generation);
        }));
        trace!(agent = self.inner.agent, chunks = buffer.pending.len(), "chunk buffered");
    }

    /// Flush buffered text now and disarm the timer.
    pub fn flush(&self) {
        let mut buffer = self.inner.buffer.lock();
        self.inner.flush_locked(&mut buffer);
    }

    /// Flush buffered text, then queue `text` right after it.
    pub fn emit(&self, text: impl Into<String>) {
        let mut buffer = self.inner.buffer.lock();
        self.inner.flush_locked(&mut buffer);
        self.inner.outbox.deliver(&self.inner.target, text);
    }

    /// Drop buffered text without delivering it.
    pub fn discard(&self) {
        let mut buffer = self.inner.buffer.lock();
        let dropped = buffer.pending.len();
        buffer.pending.clear();
        buffer.generation = buffer.generation.wrapping_add(1);
        if let Some(timer) = buffer.timer.take() {
            timer.abort();
        }
        if dropped > 0 {
            debug!(agent = self.inner.agent, dropped, "discarded buffered chunks");
        }
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> CoalescerState {
        let buffer = self.inner.buffer.lock();
        if buffer.pending.is_empty() {
            CoalescerState::Idle
        } else {
            CoalescerState::Buffering {
                chunks: buffer.pending.len(),
            }
        }
    }

    /// Delivery target of this coalescer.
    #[must_use]
    pub fn target(&self) -> &TargetId {
        &self.inner.target
    }
}

impl SessionEvents for Coalescer {
    fn on_chunk(&self, text: &str) {
        self.push_chunk(text);
    }

    fn on_tool_call(&self, call: &ToolCall) {
        debug!(agent = self.inner.agent, tool = call.title, "tool call");
        self.emit(render_tool_call(call));
    }

    fn on_tool_update(&self, update: &ToolCallUpdate) {
        if let Some(text) = render_tool_output(update, self.inner.limits.tool_output_excerpt) {
            self.emit(text);
        }
    }

    fn on_extension(&self, event: &ExtensionEvent) {
        if let ExtensionEvent::CompactionStatus(params) = event {
            if let Some(text) = render_compaction(params) {
                self.emit(text);
            }
        }
    }
}
