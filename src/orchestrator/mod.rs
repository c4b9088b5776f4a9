//! Engine orchestration.
//!
//! Owns agent entries and their lifecycle, serializes front-end commands
//! through one worker, and turns session events into ordered deliveries:
//! coalesced reply text, tool notices, heartbeats, and error notices.

pub mod coalescer;
pub mod dispatcher;
pub mod heartbeat;
pub mod outbox;
pub mod registry;
pub mod render;
