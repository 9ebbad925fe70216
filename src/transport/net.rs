//! Line-delimited TCP transport for networked MCP peers

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::{line_stream, write_line, FrameStream, Transport, TransportConfig};
use crate::errors::Error;

/// Transport over a TCP connection, one JSON-RPC frame per line
pub struct TcpTransport {
    addr: String,
    config: TransportConfig,
    reader: Option<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, config: TransportConfig) -> Self {
        Self {
            addr: addr.into(),
            config,
            reader: None,
            writer: None,
        }
    }

    /// Wrap an already-accepted connection, e.g. on the server side of a
    /// listener.
    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            addr: String::new(),
            config,
            reader: Some(reader),
            writer: Some(writer),
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<(), Error> {
        if self.writer.is_some() {
            return Ok(());
        }
        let stream = TcpStream::connect(&self.addr).await.map_err(|err| {
            Error::transport_error(format!("failed to connect to {}: {err}", self.addr))
        })?;
        let (reader, writer) = stream.into_split();
        self.reader = Some(reader);
        self.writer = Some(writer);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::transport_error("connection is not open"))?;
        write_line(writer, frame).await?;
        Ok(())
    }

    fn receive(&mut self) -> Result<FrameStream, Error> {
        let reader = self
            .reader
            .take()
            .ok_or_else(|| Error::transport_error("connection is not open"))?;
        Ok(line_stream(reader, self.config.max_message_size))
    }
}
