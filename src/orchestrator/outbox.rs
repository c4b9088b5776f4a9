//! Ordered delivery queue in front of the [`Delivery`] implementation.
//!
//! Coalescer flushes, tool events, notices, and heartbeats all enqueue here
//! and one worker task performs the (possibly slow) delivery calls in order.
//! Enqueueing never blocks, so it is safe under the coalescer's buffer lock;
//! that is what keeps "take text from the buffer" and "queue it" atomic with
//! respect to later chunks and tool events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::driver::{Delivery, TargetId};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(200);

enum OutboxItem {
    Deliver { target: TargetId, text: String },
    Activity { target: TargetId },
    Barrier(oneshot::Sender<()>),
}

/// Cloneable handle to the delivery queue.
#[derive(Clone)]
pub struct Outbox {
    queue_tx: mpsc::UnboundedSender<OutboxItem>,
}

impl Outbox {
    /// Start the delivery worker.
    ///
    /// The worker exits once every `Outbox` clone is dropped and the queue
    /// has drained.
    #[must_use]
    pub fn start(delivery: Arc<dyn Delivery>) -> (Self, JoinHandle<()>) {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(delivery, queue_rx));
        (Self { queue_tx }, worker)
    }

    /// Queue one unit of text.
    pub fn deliver(&self, target: &TargetId, text: impl Into<String>) {
        self.enqueue(OutboxItem::Deliver {
            target: target.clone(),
            text: text.into(),
        });
    }

    /// Queue an activity signal.
    pub fn signal_activity(&self, target: &TargetId) {
        self.enqueue(OutboxItem::Activity {
            target: target.clone(),
        });
    }

    /// Wait until everything queued before this call has been handed to the
    /// front-end.
    pub async fn barrier(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        self.enqueue(OutboxItem::Barrier(done_tx));
        // A closed queue has nothing left to wait for.
        let _ = done_rx.await;
    }

    fn enqueue(&self, item: OutboxItem) {
        if self.queue_tx.send(item).is_err() {
            warn!("delivery worker stopped; dropping outbound item");
        }
    }
}

async fn run_worker(delivery: Arc<dyn Delivery>, mut queue_rx: mpsc::UnboundedReceiver<OutboxItem>) {
    while let Some(item) = queue_rx.recv().await {
        match item {
            OutboxItem::Deliver { target, text } => deliver_with_retry(&*delivery, target, text).await,
            OutboxItem::Activity { target } => {
                if let Err(err) = delivery.signal_activity(target.clone()).await {
                    debug!(%target, %err, "activity signal failed");
                }
            }
            OutboxItem::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    info!("delivery worker exiting");
}

async fn deliver_with_retry(delivery: &dyn Delivery, target: TargetId, text: String) {
    let mut backoff = INITIAL_RETRY_DELAY;
    for attempt in 1..=MAX_ATTEMPTS {
        match delivery.deliver(target.clone(), text.clone()).await {
            Ok(()) => {
                debug!(%target, len = text.len(), "delivered");
                return;
            }
            Err(err) if attempt < MAX_ATTEMPTS => {
                warn!(%target, %err, attempt, delay = ?backoff, "delivery failed; retrying");
                sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => {
                warn!(%target, %err, "delivery failed; dropping message");
            }
        }
    }
}
