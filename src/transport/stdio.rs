//! Line-delimited stdio transports
//!
//! [`StdioTransport`] speaks over the current process's stdin/stdout, which
//! is how a server is normally hosted. [`ChildProcessTransport`] spawns a
//! server binary and speaks over its piped stdio, which is how a client
//! normally reaches a local server.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use super::{line_stream, write_line, FrameStream, Transport, TransportConfig};
use crate::errors::Error;

/// Transport over the current process's standard streams
pub struct StdioTransport {
    config: TransportConfig,
    stdin: Option<tokio::io::Stdin>,
    stdout: tokio::io::Stdout,
}

impl StdioTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            stdin: Some(tokio::io::stdin()),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&mut self) -> Result<(), Error> {
        // The standard streams are already open.
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.stdin = None;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
        write_line(&mut self.stdout, frame).await?;
        Ok(())
    }

    fn receive(&mut self) -> Result<FrameStream, Error> {
        let stdin = self
            .stdin
            .take()
            .ok_or_else(|| Error::transport_error("stdin stream already taken"))?;
        Ok(line_stream(stdin, self.config.max_message_size))
    }
}

/// Transport that spawns an MCP server process and speaks over its stdio
pub struct ChildProcessTransport {
    command: String,
    args: Vec<String>,
    config: TransportConfig,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
}

impl ChildProcessTransport {
    pub fn new(command: impl Into<String>, args: &[String], config: TransportConfig) -> Self {
        Self {
            command: command.into(),
            args: args.to_vec(),
            config,
            child: None,
            stdin: None,
            stdout: None,
        }
    }

    /// Process id of the spawned server, if running.
    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Transport for ChildProcessTransport {
    async fn connect(&mut self) -> Result<(), Error> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                Error::transport_error(format!("failed to spawn {}: {err}", self.command))
            })?;

        self.stdin = child.stdin.take();
        self.stdout = child.stdout.take();
        if self.stdin.is_none() || self.stdout.is_none() {
            return Err(Error::transport_error("child stdio was not captured"));
        }
        self.child = Some(child);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.stdin = None;
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            child
                .kill()
                .await
                .map_err(|err| Error::transport_error(format!("failed to kill server: {err}")))?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::transport_error("server process is not running"))?;
        write_line(stdin, frame).await?;
        Ok(())
    }

    fn receive(&mut self) -> Result<FrameStream, Error> {
        let stdout = self
            .stdout
            .take()
            .ok_or_else(|| Error::transport_error("server process is not running"))?;
        Ok(line_stream(stdout, self.config.max_message_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_fails() {
        let mut transport =
            ChildProcessTransport::new("mcp-server", &[], TransportConfig::default());
        let err = transport.send(b"{}").await.unwrap_err();
        assert_eq!(err.code(), crate::errors::codes::TRANSPORT_ERROR);
    }

    #[tokio::test]
    async fn receive_before_connect_fails() {
        let mut transport =
            ChildProcessTransport::new("mcp-server", &[], TransportConfig::default());
        assert!(transport.receive().is_err());
    }

    #[tokio::test]
    async fn spawn_failure_is_a_transport_error() {
        let mut transport = ChildProcessTransport::new(
            "definitely-not-a-real-binary-4x7",
            &[],
            TransportConfig::default(),
        );
        let err = transport.connect().await.unwrap_err();
        assert!(err.detail().unwrap().contains("failed to spawn"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn round_trip_through_cat() {
        use futures_util::StreamExt;

        let mut transport = ChildProcessTransport::new("cat", &[], TransportConfig::default());
        transport.connect().await.unwrap();
        let mut stream = transport.receive().unwrap();

        transport.send(br#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#).await.unwrap();
        let frame = stream.next().await.unwrap().unwrap();
        assert_eq!(
            frame,
            br#"{"jsonrpc":"2.0","id":1,"method":"ping","params":{}}"#
        );

        transport.disconnect().await.unwrap();
    }
}
