//! JSON-RPC request batching
//!
//! A batch collects typed requests and writes them to the transport as a
//! single JSON array. Pending entries are installed as requests are added,
//! before any bytes move, so responses can never race the bookkeeping.
//! Responses are routed back per ID by the receive task; their order need
//! not match the array.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::errors::Error;
use crate::protocol::jsonrpc::{to_wire_value, JsonRpcRequest};
use crate::protocol::mcp::Method;

use super::{lock, PeerCore};

/// Accumulates requests for one batched transport write.
pub struct Batch {
    core: Arc<PeerCore>,
    requests: Vec<JsonRpcRequest>,
}

/// Typed handle resolving to one batched request's result.
pub struct BatchHandle<M: Method> {
    rx: oneshot::Receiver<Result<M::Result, Error>>,
}

impl<M: Method> BatchHandle<M> {
    /// Await this request's response.
    pub async fn wait(self) -> Result<M::Result, Error> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::connection_closed()),
        }
    }
}

impl Batch {
    pub(crate) fn new(core: Arc<PeerCore>) -> Self {
        Self {
            core,
            requests: Vec::new(),
        }
    }

    /// Queue a typed request and get a handle to its future result.
    pub fn add_request<M: Method>(&mut self, params: M::Params) -> Result<BatchHandle<M>, Error> {
        let params_value = to_wire_value(&params)?;
        let (id, rx) = {
            let mut pending = lock(&self.core.pending);
            let id = pending.fresh_id();
            let rx = pending.insert::<M::Result>(id.clone());
            (id, rx)
        };
        self.requests
            .push(JsonRpcRequest::new(id, M::NAME, params_value));
        Ok(BatchHandle { rx })
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Encode the accumulated requests, in insertion order, as one array
    /// and write it in a single transport send. An empty batch sends
    /// nothing. A failed write fails every handle in the batch.
    pub async fn send(self) -> Result<(), Error> {
        if self.requests.is_empty() {
            return Ok(());
        }

        let bytes = match serde_json::to_vec(&self.requests) {
            Ok(bytes) => bytes,
            Err(err) => {
                let err = Error::internal_error(err.to_string());
                self.fail_all(&err);
                return Err(err);
            }
        };

        if let Err(err) = self.core.send_bytes(&bytes).await {
            self.fail_all(&err);
            return Err(err);
        }
        Ok(())
    }

    fn fail_all(&self, err: &Error) {
        let mut pending = lock(&self.core.pending);
        for request in &self.requests {
            pending.resume(&request.id, Err(err.clone()));
        }
    }
}
