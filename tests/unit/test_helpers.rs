//! Shared fakes for unit tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use acp_relay::driver::{Delivery, TargetId};
use acp_relay::{AppError, Result};

/// One call observed by [`RecordingDelivery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Text { target: String, text: String },
    Activity { target: String },
}

/// `Delivery` that records every successful call in order.
///
/// The first `failures` text deliveries fail with `AppError::Io`.
#[derive(Default)]
pub struct RecordingDelivery {
    events: Mutex<Vec<Recorded>>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingDelivery {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(failures: usize) -> Arc<Self> {
        let delivery = Self::default();
        delivery.failures.store(failures, Ordering::SeqCst);
        Arc::new(delivery)
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Recorded::Text { text, .. } => Some(text.clone()),
                Recorded::Activity { .. } => None,
            })
            .collect()
    }

    pub fn activity_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, Recorded::Activity { .. }))
            .count()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Delivery for RecordingDelivery {
    fn deliver(
        &self,
        target: TargetId,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(AppError::Io("front-end unavailable".into()));
            }
            self.events.lock().push(Recorded::Text {
                target: target.0,
                text,
            });
            Ok(())
        })
    }

    fn signal_activity(
        &self,
        target: TargetId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            self.events
                .lock()
                .push(Recorded::Activity { target: target.0 });
            Ok(())
        })
    }
}
