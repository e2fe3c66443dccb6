//! Command-line front end for the broadcast relay.
//!
//! Provides the layered configuration for both process modes, the WebSocket
//! client used by `client` mode, and its interactive send/receive loop. The
//! server side lives in the `broadcast-relay` crate.

pub mod client;
pub mod config;
pub mod interactive;
