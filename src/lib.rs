#![forbid(unsafe_code)]

//! Relay between a chat front-end and long-lived ACP agent processes.
//!
//! Agents are child processes speaking line-delimited JSON-RPC 2.0 on their
//! standard streams. The [`acp`] layer owns framing, request correlation, and
//! session operations; [`orchestrator`] serializes front-end commands and
//! shapes streamed output into deliveries for a [`driver::Delivery`].

pub mod acp;
pub mod config;
pub mod driver;
pub mod errors;
pub mod models;
pub mod orchestrator;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
