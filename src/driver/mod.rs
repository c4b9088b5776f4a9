//! Front-end delivery abstraction.
//!
//! The [`Delivery`] trait decouples the engine (sessions, coalescing,
//! heartbeats) from the chat front-end that shows agent output to a user.
//! Everything the engine says to a user goes through this trait.

pub mod console;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use crate::Result;

/// Opaque front-end destination (channel, thread, terminal).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId(pub String);

impl TargetId {
    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TargetId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TargetId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Interface the front-end supplies for showing agent output.
///
/// Calls are made from a single delivery task, in order; a slow
/// implementation delays later deliveries but never the agent reader.
pub trait Delivery: Send + Sync {
    /// Show one unit of text at `target`.
    ///
    /// # Errors
    ///
    /// Implementation-specific; failures are logged and the unit is dropped.
    fn deliver(
        &self,
        target: TargetId,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Refresh the "still working" indicator at `target`.
    ///
    /// # Errors
    ///
    /// Implementation-specific; failures are logged and ignored.
    fn signal_activity(
        &self,
        target: TargetId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
