//! A single peer connection as seen by the broadcast path.
//!
//! A [`Connection`] only carries the *outbound* half of a peer's WebSocket.
//! The inbound half is owned by the peer's session loop
//! ([`crate::session::run_session`]), so reads stay strictly sequential while
//! any task may write to the peer during a broadcast.

use std::pin::Pin;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use broadcast_proto::PeerId;
use futures_util::stream::SplitSink;
use futures_util::{Sink, SinkExt, future};
use tokio::sync::{Mutex, watch};

/// Boxed text sink used to write to a peer.
pub type Outbound = Pin<Box<dyn Sink<String, Error = DeliveryError> + Send>>;

/// Errors that can occur while writing to one peer.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The WebSocket rejected the write.
    #[error("websocket write failed: {0}")]
    Transport(#[from] axum::Error),

    /// The write did not finish within the send timeout.
    #[error("write timed out after {0:?}")]
    TimedOut(Duration),

    /// The connection had already been marked dead.
    #[error("connection closed")]
    Closed,
}

/// Outbound side of one connected peer.
pub struct Connection {
    id: PeerId,
    /// Serializes writers so concurrent broadcasts never interleave frames.
    outbound: Mutex<Outbound>,
    /// `true` while the connection is usable.
    alive: watch::Sender<bool>,
}

impl Connection {
    /// Creates a live connection writing through `outbound`.
    pub fn new(
        id: PeerId,
        outbound: impl Sink<String, Error = DeliveryError> + Send + 'static,
    ) -> Self {
        let (alive, _) = watch::channel(true);
        Self {
            id,
            outbound: Mutex::new(Box::pin(outbound)),
            alive,
        }
    }

    /// Creates a connection writing text frames to a split axum WebSocket.
    pub fn from_websocket(id: PeerId, ws_sender: SplitSink<WebSocket, Message>) -> Self {
        let outbound = ws_sender
            .sink_map_err(DeliveryError::from)
            .with(|text: String| future::ready(Ok::<_, DeliveryError>(Message::Text(text.into()))));
        Self::new(id, outbound)
    }

    /// Identity of the peer behind this connection.
    #[must_use]
    pub const fn id(&self) -> &PeerId {
        &self.id
    }

    /// Returns `false` once the connection has been marked dead.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }

    /// Marks the connection dead. Returns `true` if it was alive before.
    pub fn mark_dead(&self) -> bool {
        self.alive.send_replace(false)
    }

    /// Resolves once the connection has been marked dead.
    pub async fn closed(&self) {
        let mut alive = self.alive.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = alive.wait_for(|alive| !*alive).await;
    }

    /// Writes one complete text frame to the peer.
    ///
    /// Waiting for a concurrent writer counts against `limit` too, so a
    /// stalled peer costs the caller at most `limit`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Closed`] if the connection is dead,
    /// [`DeliveryError::TimedOut`] if the write did not finish in time, and
    /// [`DeliveryError::Transport`] if the socket rejected it.
    pub async fn deliver(&self, text: &str, limit: Duration) -> Result<(), DeliveryError> {
        if !self.is_alive() {
            return Err(DeliveryError::Closed);
        }
        let write = async {
            let mut outbound = self.outbound.lock().await;
            outbound.send(text.to_owned()).await
        };
        tokio::time::timeout(limit, write)
            .await
            .map_err(|_| DeliveryError::TimedOut(limit))?
    }

    /// Marks the connection dead and closes its sink, sending a close frame
    /// to a WebSocket peer.
    ///
    /// Gives up after `limit` if a stalled writer still holds the sink.
    pub async fn shutdown(&self, limit: Duration) {
        self.mark_dead();
        let close = async {
            let mut outbound = self.outbound.lock().await;
            outbound.close().await
        };
        match tokio::time::timeout(limit, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(peer = %self.id, error = %e, "close failed"),
            Err(_) => tracing::debug!(peer = %self.id, "close timed out"),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}
