//! Domain model module declarations.
//!
//! Wire-facing Agent Client Protocol types: prompt content, session
//! setup results, streamed updates, and permission requests.

pub mod content;
pub mod permission;
pub mod session;
pub mod update;
