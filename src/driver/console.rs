//! Terminal [`Delivery`] used by the `acp-relay` binary.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::Mutex;
use tracing::trace;

use crate::driver::{Delivery, TargetId};
use crate::Result;

/// Prints each delivery unit to stdout, prefixed with the target.
pub struct ConsoleDelivery {
    stdout: Mutex<Stdout>,
}

impl ConsoleDelivery {
    /// Create a console delivery writing to the process stdout.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for ConsoleDelivery {
    fn default() -> Self {
        Self::new()
    }
}

impl Delivery for ConsoleDelivery {
    fn deliver(
        &self,
        target: TargetId,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut out = self.stdout.lock().await;
            out.write_all(format!("[{target}] {text}\n").as_bytes())
                .await?;
            out.flush().await?;
            Ok(())
        })
    }

    fn signal_activity(
        &self,
        target: TargetId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            trace!(%target, "agent still working");
            Ok(())
        })
    }
}
