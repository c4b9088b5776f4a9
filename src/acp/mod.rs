//! Agent Client Protocol (ACP) stream handling.
//!
//! Layers, leaves first:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based NDJSON framing.
//! - `message`: JSON-RPC envelope classification and frame builders.
//! - `reader` / `writer`: the per-agent stdio tasks.
//! - `spawner`: process launch with environment isolation.
//! - `transport`: process ownership and graceful-then-forced shutdown.
//! - `rpc`: request ids, the pending table, and inbound routing.
//! - `handshake`: the `initialize` exchange.
//! - `session`: `session/*` calls and typed streamed-output callbacks.

pub mod codec;
pub mod handshake;
pub mod message;
pub mod reader;
pub mod rpc;
pub mod session;
pub mod spawner;
pub mod transport;
pub mod writer;
