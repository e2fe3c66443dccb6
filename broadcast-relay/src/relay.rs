//! Relay server core: shared state, WebSocket handler and message dispatch.
//!
//! The relay accepts WebSocket upgrades on [`WS_PATH`], registers each peer
//! under its remote address, and runs one session per peer. Every payload a
//! peer sends is wrapped as `"[<peer>]: <payload>"` and broadcast to all
//! registered peers, the sender included.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use broadcast_proto::{PeerId, WS_PATH, format_broadcast};
use futures_util::StreamExt;

use crate::config::RelayConfig;
use crate::connection::Connection;
use crate::registry::{BroadcastReport, Registry};
use crate::session;

/// Errors that can occur while starting the relay server.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The listener could not bind to the requested address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was attempted.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The bound listener could not report its local address.
    #[error("failed to read bound address: {0}")]
    LocalAddr(std::io::Error),
}

/// Shared relay server state holding the connection registry.
pub struct RelayState {
    registry: Registry,
    config: RelayConfig,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with an empty registry and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Creates relay state from a resolved [`RelayConfig`].
    #[must_use]
    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            registry: Registry::with_send_timeout(config.send_timeout),
            config,
        }
    }

    /// The connection registry.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The configuration this state was built with.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Wraps `payload` with the sender's identity and broadcasts it.
    pub async fn dispatch(&self, from: &PeerId, payload: &str) -> BroadcastReport {
        let text = format_broadcast(from, payload);
        tracing::info!(text = %text, "new message");
        let report = self.registry.broadcast(&text).await;
        tracing::debug!(
            delivered = report.delivered,
            failed = report.failed.len(),
            "broadcast complete"
        );
        report
    }

    /// Send a WebSocket close frame to every connected peer.
    ///
    /// Each peer's session notices and unregisters itself. Used on graceful
    /// shutdown and in tests.
    pub async fn close_all_connections(&self) {
        self.registry.close_all().await;
    }
}

/// Handles an upgraded WebSocket connection for a single peer.
///
/// Registers the peer, runs its session until it disconnects or is evicted,
/// and logs both ends of the connection.
pub async fn handle_socket(socket: WebSocket, peer: PeerId, state: Arc<RelayState>) {
    tracing::info!(peer = %peer, "client connected");

    let (ws_sender, ws_receiver) = socket.split();
    let conn = Arc::new(Connection::from_websocket(peer.clone(), ws_sender));
    let end = session::run_session(conn, ws_receiver, state).await;

    tracing::info!(peer = %peer, reason = ?end, "client disconnected");
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns [`RelayError::Bind`] if the TCP listener cannot bind.
pub async fn start_server(
    addr: &str,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), RelayError> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-built [`RelayState`].
///
/// The caller keeps its own handle on `state`, which is how `main` closes
/// connections on shutdown and how tests inspect the registry.
///
/// # Errors
///
/// Returns [`RelayError::Bind`] if the TCP listener cannot bind, or
/// [`RelayError::LocalAddr`] if its address cannot be read back.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), RelayError> {
    let app = axum::Router::new()
        .route(WS_PATH, axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: addr.to_string(),
            source,
        })?;
    let bound_addr = listener.local_addr().map_err(RelayError::LocalAddr)?;

    let handle = tokio::spawn(async move {
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        if let Err(e) = axum::serve(listener, service).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.max_message_size(state.config().max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, PeerId::from(remote), state))
}
