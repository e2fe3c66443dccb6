//! Registry of live connections and the broadcast fan-out.
//!
//! Membership lives in a [`parking_lot::Mutex`] that is only held long enough
//! to insert, remove or copy out a snapshot. Broadcast writes happen after the
//! lock is released, concurrently, and each write is bounded by the send
//! timeout, so a stalled peer can neither block membership changes nor delay
//! delivery to anybody else.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use broadcast_proto::PeerId;
use futures_util::future;
use parking_lot::Mutex;

use crate::connection::Connection;

/// Default upper bound on a single write to a single peer.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that can occur during registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Another live connection already uses this identity.
    #[error("peer {0} is already registered")]
    DuplicateIdentity(PeerId),
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of peers that received the full frame.
    pub delivered: usize,
    /// Peers whose write failed; they have been unregistered.
    pub failed: Vec<PeerId>,
}

impl BroadcastReport {
    /// Number of peers in the snapshot the broadcast was sent to.
    #[must_use]
    pub const fn recipients(&self) -> usize {
        self.delivered + self.failed.len()
    }
}

/// The authoritative set of live connections.
pub struct Registry {
    connections: Mutex<HashMap<PeerId, Arc<Connection>>>,
    send_timeout: Duration,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Creates an empty registry with the default send timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_send_timeout(DEFAULT_SEND_TIMEOUT)
    }

    /// Creates an empty registry whose per-peer writes give up after `send_timeout`.
    #[must_use]
    pub fn with_send_timeout(send_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Upper bound on a single write to a single peer.
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        self.send_timeout
    }

    /// Adds a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateIdentity`] if a connection with the
    /// same identity is already registered. The existing entry is kept.
    pub fn register(&self, conn: Arc<Connection>) -> Result<(), RegistryError> {
        let mut conns = self.connections.lock();
        if conns.contains_key(conn.id()) {
            return Err(RegistryError::DuplicateIdentity(conn.id().clone()));
        }
        conns.insert(conn.id().clone(), conn);
        Ok(())
    }

    /// Removes `conn` if it is still registered.
    ///
    /// Only the exact connection is removed: a different connection that
    /// happens to share the identity stays. Returns `true` if an entry was
    /// removed, so calling this twice is the same as calling it once.
    pub fn unregister(&self, conn: &Connection) -> bool {
        let mut conns = self.connections.lock();
        let registered = conns
            .get(conn.id())
            .is_some_and(|existing| std::ptr::eq(Arc::as_ptr(existing), conn));
        if registered {
            conns.remove(conn.id());
        }
        registered
    }

    /// Returns `true` if a connection with this identity is registered.
    #[must_use]
    pub fn contains(&self, id: &PeerId) -> bool {
        self.connections.lock().contains_key(id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    /// Returns `true` if nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Point-in-time copy of the registered connections.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Delivers `text` to every connection registered at the time of the call.
    ///
    /// Each recipient either receives the whole frame or is marked dead and
    /// unregistered; its session loop observes that and winds down. Failures
    /// never propagate past the returned report.
    pub async fn broadcast(&self, text: &str) -> BroadcastReport {
        let recipients = self.snapshot();
        let outcomes = future::join_all(
            recipients
                .iter()
                .map(|conn| conn.deliver(text, self.send_timeout)),
        )
        .await;

        let mut report = BroadcastReport::default();
        for (conn, outcome) in recipients.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(peer = %conn.id(), error = %e, "error writing message to client");
                    conn.mark_dead();
                    self.unregister(conn);
                    report.failed.push(conn.id().clone());
                }
            }
        }
        report
    }

    /// Marks every connection dead and closes its socket.
    ///
    /// Session loops notice and unregister their connections themselves.
    pub async fn close_all(&self) {
        let conns = self.snapshot();
        tracing::info!(count = conns.len(), "closing all connections");
        future::join_all(conns.iter().map(|conn| conn.shutdown(self.send_timeout))).await;
    }
}
