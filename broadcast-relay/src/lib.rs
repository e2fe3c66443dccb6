//! Broadcast relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The server
//! accepts WebSocket connections, registers each peer under its remote
//! address, and fans every text message out to all connected peers as
//! `"[<peer>]: <payload>"`.

pub mod config;
pub mod connection;
pub mod registry;
pub mod relay;
pub mod session;
