//! Resolved settings for the relay server.
//!
//! Values come from the layered loader in the `broadcast-cli` crate
//! (CLI > env > TOML file > defaults); this module only owns the resolved
//! shape and the compiled defaults.

use std::time::Duration;

use broadcast_proto::DEFAULT_PORT;

use crate::registry::DEFAULT_SEND_TIMEOUT;

/// Default maximum size of one inbound WebSocket message (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default number of consecutive read errors after which a session gives up.
pub const DEFAULT_MAX_READ_ERRORS: u32 = 3;

/// Fully resolved relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:3000`).
    pub bind_addr: String,
    /// Upper bound on a single write to a single peer.
    pub send_timeout: Duration,
    /// Largest inbound message accepted from a peer, in bytes.
    pub max_message_size: usize,
    /// Consecutive read errors tolerated before a session is closed.
    pub max_read_errors: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_read_errors: DEFAULT_MAX_READ_ERRORS,
        }
    }
}
