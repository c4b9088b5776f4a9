//! Per-turn "still working" heartbeat.
//!
//! While a prompt is outstanding the front-end's typing indicator would
//! expire on its own, so a [`Heartbeat`] refreshes it every `interval`
//! (shorter than the front-end's expiry window). Signals go through the
//! [`Outbox`], in order with the turn's text.
//!
//! The turn must [`stop`](HeartbeatHandle::stop) the heartbeat and wait for
//! the task to exit before queuing its final output; otherwise a late
//! signal could land after the completion message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::driver::TargetId;
use crate::orchestrator::outbox::Outbox;

/// Builder for a per-turn heartbeat.
///
/// Call [`spawn`](Self::spawn) to start the background loop.
pub struct Heartbeat {
    agent: String,
    target: TargetId,
    interval: Duration,
    outbox: Outbox,
}

impl Heartbeat {
    /// Construct a heartbeat (does not start it yet).
    #[must_use]
    pub fn new(agent: impl Into<String>, target: TargetId, interval: Duration, outbox: Outbox) -> Self {
        Self {
            agent: agent.into(),
            target,
            interval,
            outbox,
        }
    }

    /// Spawn the loop. The first signal is sent immediately.
    #[must_use]
    pub fn spawn(self) -> HeartbeatHandle {
        let cancel = CancellationToken::new();
        let beats = Arc::new(AtomicU64::new(0));
        let span = info_span!("heartbeat", agent = self.agent);

        let task = tokio::spawn(
            Self::run(
                self.target,
                self.interval,
                self.outbox,
                cancel.clone(),
                Arc::clone(&beats),
            )
            .instrument(span),
        );

        HeartbeatHandle {
            cancel,
            beats,
            join_handle: Some(task),
        }
    }

    async fn run(
        target: TargetId,
        interval: Duration,
        outbox: Outbox,
        cancel: CancellationToken,
        beats: Arc<AtomicU64>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    outbox.signal_activity(&target);
                    beats.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        debug!(beats = beats.load(Ordering::Relaxed), "heartbeat stopped");
    }
}

/// Handle returned from [`Heartbeat::spawn`].
///
/// Dropping the handle cancels the loop without waiting for it.
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    beats: Arc<AtomicU64>,
    join_handle: Option<JoinHandle<()>>,
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl HeartbeatHandle {
    /// Number of activity signals queued so far.
    #[must_use]
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    /// Stop the loop and wait up to `bound` for it to exit.
    ///
    /// Once this returns no further signal from this heartbeat is queued.
    pub async fn stop(mut self, bound: Duration) {
        self.cancel.cancel();
        if let Some(mut handle) = self.join_handle.take() {
            if tokio::time::timeout(bound, &mut handle).await.is_err() {
                warn!("heartbeat did not stop in time; aborting");
                handle.abort();
            }
        }
    }
}
