//! WebSocket client for the broadcast relay.
//!
//! [`RelayClient::connect`] dials the server and spawns a background task
//! that pushes every received text frame into a channel. The client can be
//! split into a [`ClientSender`] and a [`ClientReceiver`] so one task can
//! wait for user input while another waits for relayed messages.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// Type alias for the write half of a WebSocket connection.
type WsSender = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Type alias for the read half of a WebSocket connection.
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Capacity of the channel between the reader task and [`ClientReceiver`].
const INCOMING_CAPACITY: usize = 256;

/// Errors that can occur on the client side.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The server could not be reached or refused the upgrade.
    #[error("failed to connect to {url}: {source}")]
    Dial {
        /// URL that was dialed.
        url: String,
        /// Underlying WebSocket error.
        source: Box<tungstenite::Error>,
    },

    /// The server did not answer in time.
    #[error("timed out connecting to {url} after {after:?}")]
    Timeout {
        /// URL that was dialed.
        url: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The connection to the server is gone.
    #[error("connection closed")]
    ConnectionClosed,

    /// Writing a frame failed.
    #[error("failed to send message: {0}")]
    Send(Box<tungstenite::Error>),

    /// Local input or output failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A connected relay client.
pub struct RelayClient {
    sender: ClientSender,
    receiver: ClientReceiver,
    local_addr: Option<SocketAddr>,
}

/// Write half of a [`RelayClient`].
pub struct ClientSender {
    ws_sender: WsSender,
    connected: Arc<AtomicBool>,
}

/// Read half of a [`RelayClient`].
pub struct ClientReceiver {
    incoming: mpsc::Receiver<String>,
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl RelayClient {
    /// Connect to the relay at `server_url`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Timeout`] if the handshake does not finish within `timeout`.
    /// - [`ClientError::Dial`] if the server cannot be reached or rejects the upgrade.
    pub async fn connect(server_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(server_url))
            .await
            .map_err(|_| {
                tracing::warn!(url = server_url, "connect timed out");
                ClientError::Timeout {
                    url: server_url.to_string(),
                    after: timeout,
                }
            })?
            .map_err(|e| {
                tracing::warn!(url = server_url, error = %e, "connect failed");
                ClientError::Dial {
                    url: server_url.to_string(),
                    source: Box::new(e),
                }
            })?;

        let local_addr = match ws_stream.get_ref() {
            MaybeTlsStream::Plain(tcp) => tcp.local_addr().ok(),
            _ => None,
        };

        let (ws_sender, ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(INCOMING_CAPACITY);
        let connected = Arc::new(AtomicBool::new(true));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx, Arc::clone(&connected)));

        tracing::info!(url = server_url, local = ?local_addr, "connected to server");

        Ok(Self {
            sender: ClientSender {
                ws_sender,
                connected,
            },
            receiver: ClientReceiver {
                incoming: rx,
                _reader_handle: reader_handle,
            },
            local_addr,
        })
    }

    /// Local socket address of this client, which is the identity the relay
    /// puts in front of its messages. `None` for TLS connections.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Send one text message.
    ///
    /// # Errors
    ///
    /// See [`ClientSender::send`].
    pub async fn send(&mut self, text: &str) -> Result<(), ClientError> {
        self.sender.send(text).await
    }

    /// Wait for the next relayed message. `None` once the server is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Split into independently usable halves.
    #[must_use]
    pub fn into_split(self) -> (ClientSender, ClientReceiver) {
        (self.sender, self.receiver)
    }
}

impl ClientSender {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ConnectionClosed`] if the server has gone away,
    /// or [`ClientError::Send`] if the write fails.
    pub async fn send(&mut self, text: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::ConnectionClosed);
        }
        self.ws_sender.send(Message::text(text.to_owned())).await.map_err(|e| {
            self.connected.store(false, Ordering::Relaxed);
            ClientError::Send(Box::new(e))
        })
    }

    /// Whether the reader task still sees an open connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Send a close frame. Errors are ignored; the connection is going away
    /// either way.
    pub async fn close(&mut self) {
        if let Err(e) = self.ws_sender.close().await {
            tracing::debug!(error = %e, "close failed");
        }
        self.connected.store(false, Ordering::Relaxed);
    }
}

impl ClientReceiver {
    /// Wait for the next relayed message. `None` once the server is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.recv().await
    }
}

/// Background task that forwards text frames to the receiver channel.
///
/// Binary frames are decoded lossily. Sets `connected` to
/// `false` when the server closes the connection or the socket fails.
async fn reader_loop(mut ws_reader: WsReader, tx: mpsc::Sender<String>, connected: Arc<AtomicBool>) {
    while let Some(msg_result) = ws_reader.next().await {
        let text = match msg_result {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Close(_)) => {
                tracing::info!("disconnected from server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "error reading from server");
                break;
            }
        };
        if tx.send(text).await.is_err() {
            // Receiver dropped, nobody is listening any more.
            break;
        }
    }
    connected.store(false, Ordering::Relaxed);
    tracing::debug!("reader task exiting");
}
