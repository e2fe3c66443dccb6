//! Shared protocol definitions for the broadcast relay.
//!
//! The wire format is deliberately minimal: peers exchange raw WebSocket text
//! frames, and the relay prefixes every fanned-out frame with the identity of
//! the peer that sent it.

pub mod peer;
pub mod wire;

pub use peer::PeerId;
pub use wire::{DEFAULT_PORT, WS_PATH, default_server_url, format_broadcast};
