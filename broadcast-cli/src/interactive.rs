//! Interactive send/receive loop used by `client` mode.
//!
//! Reads newline-terminated lines from `input` and sends each one to the
//! relay while writing every relayed message to `output`, one per line.

use std::borrow::Cow;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::client::{ClientError, ClientReceiver, ClientSender};

/// Input line that ends the session.
pub const EXIT_COMMAND: &str = "exit";

/// How an interactive session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractiveEnd {
    /// The user typed [`EXIT_COMMAND`].
    ExitCommand,
    /// Input reached end-of-file.
    InputClosed,
}

/// One line of user input, after trimming.
#[derive(Debug, PartialEq, Eq)]
pub enum InputLine<'a> {
    /// Stop the client.
    Exit,
    /// Nothing to send.
    Blank,
    /// Send this text.
    Message(&'a str),
}

/// Classify a raw input line.
#[must_use]
pub fn parse_input(line: &str) -> InputLine<'_> {
    match line.trim() {
        EXIT_COMMAND => InputLine::Exit,
        "" => InputLine::Blank,
        text => InputLine::Message(text),
    }
}

/// Decode one raw input line, replacing invalid UTF-8 with U+FFFD.
fn decode_line(raw: &[u8]) -> Cow<'_, str> {
    let line = String::from_utf8_lossy(raw);
    if matches!(line, Cow::Owned(_)) {
        tracing::warn!(len = raw.len(), "input line is not valid UTF-8, replacing invalid bytes");
    }
    line
}

/// Run the interactive loop until the user exits or input ends.
///
/// Send failures are logged and the loop keeps going, as do input lines that
/// are not valid UTF-8. Once the server hangs up, relayed output stops but
/// input is still read so `exit` works.
///
/// # Errors
///
/// Returns [`ClientError::Io`] if reading `input` or writing `output` fails.
pub async fn run_interactive<R, W>(
    sender: &mut ClientSender,
    receiver: &mut ClientReceiver,
    mut input: R,
    mut output: W,
) -> Result<InteractiveEnd, ClientError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // Holds partially read lines across select! iterations.
    let mut buf = Vec::new();
    let mut server_open = true;

    loop {
        tokio::select! {
            read = input.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    return Ok(InteractiveEnd::InputClosed);
                }
                let line = decode_line(&buf);
                match parse_input(&line) {
                    InputLine::Exit => return Ok(InteractiveEnd::ExitCommand),
                    InputLine::Blank => {}
                    InputLine::Message(text) => {
                        if let Err(e) = sender.send(text).await {
                            tracing::warn!(error = %e, "error sending message");
                        }
                    }
                }
                buf.clear();
            }
            incoming = receiver.recv(), if server_open => {
                if let Some(text) = incoming {
                    output.write_all(text.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                    output.flush().await?;
                } else {
                    tracing::info!("server closed the connection");
                    server_open = false;
                }
            }
        }
    }
}
