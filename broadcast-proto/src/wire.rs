//! Wire format of relayed messages and the relay's well-known endpoint.

use crate::PeerId;

/// HTTP path on which the relay accepts WebSocket upgrades.
pub const WS_PATH: &str = "/ws";

/// Port the relay listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 3000;

/// URL a client dials when no server URL is configured.
#[must_use]
pub fn default_server_url() -> String {
    format!("ws://localhost:{DEFAULT_PORT}{WS_PATH}")
}

/// Wrap a peer's raw payload into the text frame fanned out to every peer.
///
/// The payload is copied verbatim, so an empty payload still produces the
/// `"[<peer>]: "` prefix.
#[must_use]
pub fn format_broadcast(from: &PeerId, payload: &str) -> String {
    format!("[{from}]: {payload}")
}
