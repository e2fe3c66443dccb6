//! Per-connection read loop.
//!
//! Every accepted peer gets exactly one session. The session owns the inbound
//! half of the peer's socket, hands each text payload to the relay for
//! fan-out, and keeps the registry honest: the connection stays registered
//! for exactly as long as the loop is running.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use axum::extract::ws::Message;
use broadcast_proto::PeerId;
use futures_util::{Stream, StreamExt};

use crate::connection::Connection;
use crate::relay::RelayState;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgraded, not yet registered.
    Connecting,
    /// Registered and reading.
    Active,
    /// The last read failed; still registered and still reading.
    Closing,
    /// Unregistered. Terminal.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Active => write!(f, "active"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the stream or sent a close frame.
    CleanDisconnect,
    /// The connection was marked dead elsewhere (failed delivery or shutdown).
    Evicted,
    /// Too many consecutive read errors.
    TransportUnusable,
    /// Registration was refused.
    Rejected,
}

/// What happened to one inbound frame.
enum Inbound<'a> {
    Payload(Cow<'a, str>),
    Skip,
    Disconnect,
}

struct Session<'a> {
    conn: &'a Connection,
    state: SessionState,
}

impl Session<'_> {
    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(peer = %self.conn.id(), from = %self.state, to = %next, "session state");
            self.state = next;
        }
    }
}

/// Runs one peer's session until it ends.
///
/// `inbound` is the read half of the peer's socket. Text and binary frames
/// are dispatched through `state`, binary ones decoded lossily; empty
/// payloads are dispatched too. A read error is logged and reading continues until
/// `max_read_errors` errors arrive in a row.
///
/// On return the connection has been unregistered and marked dead.
pub async fn run_session<S, E>(
    conn: Arc<Connection>,
    mut inbound: S,
    state: Arc<RelayState>,
) -> SessionEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let mut session = Session {
        conn: &conn,
        state: SessionState::Connecting,
    };

    if let Err(e) = state.registry().register(Arc::clone(&conn)) {
        tracing::warn!(peer = %conn.id(), error = %e, "refusing connection");
        session.transition(SessionState::Closed);
        conn.shutdown(state.registry().send_timeout()).await;
        return SessionEnd::Rejected;
    }
    session.transition(SessionState::Active);

    let max_read_errors = state.config().max_read_errors;
    let mut consecutive_errors = 0_u32;
    let evicted = conn.closed();
    tokio::pin!(evicted);

    let end = loop {
        let next = tokio::select! {
            biased;
            () = &mut evicted => break SessionEnd::Evicted,
            next = inbound.next() => next,
        };

        let msg = match next {
            None => break SessionEnd::CleanDisconnect,
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                consecutive_errors += 1;
                tracing::warn!(
                    peer = %conn.id(),
                    error = %e,
                    attempt = consecutive_errors,
                    "error reading message from client"
                );
                if consecutive_errors >= max_read_errors {
                    break SessionEnd::TransportUnusable;
                }
                session.transition(SessionState::Closing);
                continue;
            }
        };
        consecutive_errors = 0;
        session.transition(SessionState::Active);

        match classify(conn.id(), &msg) {
            Inbound::Payload(payload) => {
                state.dispatch(conn.id(), &payload).await;
            }
            Inbound::Skip => {}
            Inbound::Disconnect => break SessionEnd::CleanDisconnect,
        }
    };

    session.transition(SessionState::Closed);
    state.registry().unregister(&conn);
    if end != SessionEnd::Evicted {
        conn.shutdown(state.registry().send_timeout()).await;
    }
    end
}

fn classify<'a>(peer: &PeerId, msg: &'a Message) -> Inbound<'a> {
    match msg {
        Message::Text(text) => Inbound::Payload(Cow::Borrowed(text.as_str())),
        Message::Binary(data) => {
            let payload = String::from_utf8_lossy(data);
            if matches!(payload, Cow::Owned(_)) {
                tracing::warn!(
                    peer = %peer,
                    len = data.len(),
                    "binary frame is not valid UTF-8, relaying with replacement characters"
                );
            }
            Inbound::Payload(payload)
        }
        Message::Close(_) => Inbound::Disconnect,
        Message::Ping(_) | Message::Pong(_) => Inbound::Skip,
    }
}
