//! Transport layer for MCP peer communication
//!
//! A transport is a duplex byte channel with a lifecycle. Framing is the
//! transport's responsibility: every element yielded by [`Transport::receive`]
//! is exactly one JSON-RPC frame's bytes. The stream transports here use
//! newline delimiters; JSON guarantees no unescaped newline can appear
//! inside a frame.

pub mod mock;
pub mod net;
pub mod sse;
pub mod stdio;

use std::io;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::errors::Error;

/// Inbound frames, one JSON-RPC message per element.
///
/// Errors come through as `io::Error` so the receive loop can distinguish
/// the would-block family (retried after a short back-off) from fatal ones.
pub type FrameStream = Pin<Box<dyn Stream<Item = io::Result<Vec<u8>>> + Send>>;

/// MCP transport abstraction
#[async_trait]
pub trait Transport: Send {
    /// Establish the underlying channel.
    async fn connect(&mut self) -> Result<(), Error>;

    /// Tear the channel down. Idempotent.
    async fn disconnect(&mut self) -> Result<(), Error>;

    /// Write one frame.
    async fn send(&mut self, frame: &[u8]) -> Result<(), Error>;

    /// Take the inbound frame stream. May be called once per connection;
    /// the stream ends at EOF.
    fn receive(&mut self) -> Result<FrameStream, Error>;
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout_secs: u64,
    pub max_message_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_message_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Read one `\n`-terminated line, capped at `max_bytes`. Trailing partial
/// lines are buffered until the delimiter or EOF arrives. Returns `None`
/// at a clean EOF.
pub(crate) async fn read_line_limited<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    max_bytes: usize,
) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if buf.is_empty() {
                return Ok(None);
            }
            break;
        }

        let newline_pos = available.iter().position(|b| *b == b'\n');
        let take = newline_pos
            .map(|idx| idx.saturating_add(1))
            .unwrap_or(available.len());
        if buf.len().saturating_add(take) > max_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "message exceeds maximum frame size",
            ));
        }
        buf.extend_from_slice(&available[..take]);
        reader.consume(take);

        if newline_pos.is_some() {
            break;
        }
    }

    if buf.ends_with(b"\n") {
        buf.pop();
        if buf.ends_with(b"\r") {
            buf.pop();
        }
    }

    Ok(Some(buf))
}

/// Turn a byte reader into a stream of newline-delimited frames, skipping
/// blank lines.
pub(crate) fn line_stream<R>(read: R, max_bytes: usize) -> FrameStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let reader = BufReader::new(read);
    Box::pin(futures_util::stream::unfold(
        reader,
        move |mut reader| async move {
            loop {
                match read_line_limited(&mut reader, max_bytes).await {
                    Ok(Some(line)) => {
                        if line.iter().all(u8::is_ascii_whitespace) {
                            continue;
                        }
                        return Some((Ok(line), reader));
                    }
                    Ok(None) => return None,
                    Err(err) => return Some((Err(err), reader)),
                }
            }
        },
    ))
}

/// Write one frame followed by the `\n` delimiter and flush.
pub(crate) async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
