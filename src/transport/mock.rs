//! In-memory transport for testing
//!
//! [`MockTransport::pair`] yields two connected endpoints, so a real client
//! and a real server can run against each other inside one test process.
//! Each endpoint keeps a shared log of the frames it sent, which tests use
//! to assert byte-level behavior (exact batch shape, or that nothing was
//! written at all).

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{FrameStream, Transport};
use crate::errors::Error;

/// Shared log of frames written through one endpoint.
pub type SentLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// One endpoint of an in-memory duplex channel
pub struct MockTransport {
    outbound: Option<mpsc::UnboundedSender<Vec<u8>>>,
    inbound: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    sent: SentLog,
}

impl MockTransport {
    /// Two endpoints wired back to back.
    pub fn pair() -> (MockTransport, MockTransport) {
        let (left_tx, right_rx) = mpsc::unbounded_channel();
        let (right_tx, left_rx) = mpsc::unbounded_channel();
        (
            MockTransport {
                outbound: Some(left_tx),
                inbound: Some(left_rx),
                sent: Arc::default(),
            },
            MockTransport {
                outbound: Some(right_tx),
                inbound: Some(right_rx),
                sent: Arc::default(),
            },
        )
    }

    /// Handle onto this endpoint's sent-frame log. Grab it before handing
    /// the transport to a peer.
    pub fn sent_log(&self) -> SentLog {
        Arc::clone(&self.sent)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<(), Error> {
        if self.outbound.is_some() {
            Ok(())
        } else {
            Err(Error::transport_error("mock endpoint already disconnected"))
        }
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        // Dropping the sender closes the far endpoint's inbound stream.
        self.outbound = None;
        self.inbound = None;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), Error> {
        let sender = self
            .outbound
            .as_ref()
            .ok_or_else(Error::connection_closed)?;
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(frame.to_vec());
        sender
            .send(frame.to_vec())
            .map_err(|_| Error::connection_closed())
    }

    fn receive(&mut self) -> Result<FrameStream, Error> {
        let receiver = self
            .inbound
            .take()
            .ok_or_else(|| Error::transport_error("inbound stream already taken"))?;
        Ok(Box::pin(futures_util::stream::unfold(
            receiver,
            |mut receiver| async move { receiver.recv().await.map(|frame| (Ok(frame), receiver)) },
        )))
    }
}
