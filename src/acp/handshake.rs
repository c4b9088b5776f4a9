//! ACP initialization handshake.
//!
//! The first request on a fresh transport is `initialize`:
//!
//! ```json
//! {
//!   "jsonrpc": "2.0", "id": 1, "method": "initialize",
//!   "params": {
//!     "protocolVersion": 1,
//!     "clientCapabilities": {},
//!     "clientInfo": { "name": "acp-relay", "version": "0.2.0" }
//!   }
//! }
//! ```
//!
//! The response advertises what the agent accepts (image prompts, session
//! restore), which the session layer consults when building prompts.

use serde_json::json;
use tracing::info;

use crate::acp::rpc::RpcClient;
use crate::models::session::InitializeResult;
use crate::Result;

/// Protocol version this relay speaks.
pub const PROTOCOL_VERSION: u64 = 1;

/// Client name reported in `clientInfo`.
pub const CLIENT_NAME: &str = "acp-relay";

/// Perform the `initialize` exchange.
///
/// # Errors
///
/// Propagates request failures (`Remote`, `Timeout`, `ConnectionClosed`) and
/// returns `AppError::Acp` if the response body is malformed.
pub async fn initialize(client: &RpcClient) -> Result<InitializeResult> {
    let result = client
        .request(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientCapabilities": {},
                "clientInfo": {
                    "name": CLIENT_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
        .await?;

    let init: InitializeResult = serde_json::from_value(result)?;
    let caps = init.agent_capabilities;
    info!(
        agent = client.agent(),
        protocol_version = %init.protocol_version,
        image = caps.prompt_capabilities.image,
        load_session = caps.load_session,
        agent_name = init.agent_info.as_ref().map(|info| info.name.as_str()),
        "handshake: initialize complete"
    );
    Ok(init)
}
