//! Peer runtime shared by the client and server roles
//!
//! One receive task per peer consumes framed bytes from the transport and
//! dispatches each frame: batches and single responses resume pending
//! awaiters by ID, requests run through the method registry (server side),
//! and notifications fan out to their handler lists. All shared state sits
//! behind short-lived locks that are never held across an await, so the
//! peer behaves as a single logically-serialized actor.
//!
//! Request handlers are executed serially on the receive task; a handler
//! that suspends delays dispatch of subsequent frames. Handlers that need
//! to run long should spawn their own work.

pub mod batch;
pub mod client;
pub mod server;

mod pending;
mod registry;

pub use batch::{Batch, BatchHandle};
pub use client::Client;
pub use server::{InitializeHook, Server};

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::errors::Error;
use crate::protocol::jsonrpc::{
    to_wire_value, Frame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::protocol::mcp::{methods, Method, Notification};
use crate::transport::{FrameStream, Transport};

use pending::PendingRequests;
use registry::{MethodRegistry, NotificationRegistry};

/// Peer configuration.
///
/// In strict mode lifecycle and capability preconditions are enforced
/// locally: the server rejects early requests, and the client refuses
/// calls the server never advertised.
#[derive(Debug, Clone, Copy, Default)]
pub struct Configuration {
    pub strict: bool,
}

impl Configuration {
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

/// Back-off applied when the transport reports a transient read failure.
const TRANSIENT_READ_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Role::Client => "Client",
            Role::Server => "Server",
        }
    }
}

/// Lock helper that shrugs off poisoning; no invariant of ours survives a
/// panic only partially.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State and machinery shared by both roles.
pub(crate) struct PeerCore {
    role: Role,
    config: Configuration,
    initialized: AtomicBool,
    pending: Mutex<PendingRequests>,
    methods: Mutex<MethodRegistry>,
    notifications: Mutex<NotificationRegistry>,
    transport: tokio::sync::Mutex<Option<Box<dyn Transport>>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl PeerCore {
    pub(crate) fn new(role: Role, config: Configuration) -> Self {
        Self {
            role,
            config,
            initialized: AtomicBool::new(false),
            pending: Mutex::new(PendingRequests::default()),
            methods: Mutex::new(MethodRegistry::default()),
            notifications: Mutex::new(NotificationRegistry::default()),
            transport: tokio::sync::Mutex::new(None),
            recv_task: Mutex::new(None),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub(crate) fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::SeqCst);
    }

    pub(crate) fn register_method<M, H, Fut>(&self, handler: H)
    where
        M: Method,
        H: Fn(M::Params) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<M::Result, Error>> + Send + 'static,
    {
        lock(&self.methods).register::<M, H, Fut>(handler);
    }

    pub(crate) fn has_method(&self, name: &str) -> bool {
        lock(&self.methods).contains(name)
    }

    pub(crate) fn register_notification<N, H, Fut>(&self, handler: H)
    where
        N: Notification,
        H: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
    {
        lock(&self.notifications).register::<N, H, Fut>(handler);
    }

    /// Attach the transport and start the receive task.
    pub(crate) async fn attach(self: Arc<Self>, mut transport: Box<dyn Transport>) -> Result<(), Error> {
        let mut guard = self.transport.lock().await;
        if guard.is_some() {
            return Err(Error::internal_error("transport already attached"));
        }
        transport.connect().await?;
        let stream = transport.receive()?;
        *guard = Some(transport);
        drop(guard);

        let task = tokio::spawn(recv_loop(Arc::clone(&self), stream));
        *lock(&self.recv_task) = Some(task);
        Ok(())
    }

    /// Cancel the receive task, fail every pending request, and release the
    /// transport.
    pub(crate) async fn detach(&self, reason: &str) -> Result<(), Error> {
        if let Some(task) = lock(&self.recv_task).take() {
            task.abort();
        }
        lock(&self.pending).drain(&Error::internal_error(reason));
        self.set_initialized(false);

        let transport = self.transport.lock().await.take();
        if let Some(mut transport) = transport {
            transport.disconnect().await?;
        }
        Ok(())
    }

    /// Write one frame. Fails once the transport has been released.
    pub(crate) async fn send_bytes(&self, bytes: &[u8]) -> Result<(), Error> {
        let mut guard = self.transport.lock().await;
        match guard.as_mut() {
            Some(transport) => transport.send(bytes).await,
            None => Err(Error::internal_error(format!(
                "{} is not initialized",
                self.role.name()
            ))),
        }
    }

    /// Send a typed request and await its typed result.
    ///
    /// The pending entry is installed before the frame is written and is
    /// guaranteed gone by the time this returns, on both paths.
    pub(crate) async fn send_request<M: Method>(&self, params: M::Params) -> Result<M::Result, Error> {
        let params_value = to_wire_value(&params)?;
        let (id, rx) = {
            let mut pending = lock(&self.pending);
            let id = pending.fresh_id();
            let rx = pending.insert::<M::Result>(id.clone());
            (id, rx)
        };

        let request = JsonRpcRequest::new(id.clone(), M::NAME, params_value);
        let bytes =
            serde_json::to_vec(&request).map_err(|err| Error::internal_error(err.to_string()))?;
        if let Err(err) = self.send_bytes(&bytes).await {
            lock(&self.pending).remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::connection_closed()),
        }
    }

    /// Send a typed notification. Unit params are omitted from the wire.
    pub(crate) async fn send_notification<N: Notification>(
        &self,
        params: N::Params,
    ) -> Result<(), Error> {
        let value =
            serde_json::to_value(&params).map_err(|err| Error::internal_error(err.to_string()))?;
        let params = if value.is_null() { None } else { Some(value) };
        let notification = JsonRpcNotification::new(N::NAME, params);
        let bytes = serde_json::to_vec(&notification)
            .map_err(|err| Error::internal_error(err.to_string()))?;
        self.send_bytes(&bytes).await
    }

    async fn handle_frame(&self, bytes: &[u8]) {
        match Frame::decode(bytes) {
            Ok(Frame::Batch(responses)) => {
                for response in responses {
                    self.resume_response(response);
                }
            }
            Ok(Frame::Response(response)) => self.resume_response(response),
            Ok(Frame::Request(request)) => {
                if self.role == Role::Server {
                    self.dispatch_request(request).await;
                } else {
                    tracing::warn!(
                        method = %request.method,
                        "ignoring request frame received on the client side"
                    );
                }
            }
            Ok(Frame::Notification(notification)) => {
                self.dispatch_notification(notification).await;
            }
            Err(err) => {
                // A parse-error reply is only possible when the frame still
                // carries a usable request id.
                if let Some(id) = recover_request_id(bytes) {
                    self.write_response(JsonRpcResponse::error(id, err.to_wire()))
                        .await;
                } else {
                    tracing::warn!(
                        frame = %String::from_utf8_lossy(bytes),
                        error = %err,
                        "discarding undecodable frame"
                    );
                }
            }
        }
    }

    fn resume_response(&self, response: JsonRpcResponse) {
        let id = response.id.clone();
        let outcome = response.into_outcome();
        if !lock(&self.pending).resume(&id, outcome) {
            tracing::warn!(id = %id, "response for unknown request id");
        }
    }

    async fn dispatch_request(&self, request: JsonRpcRequest) {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        let response = match self.invoke_method(&method, params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                tracing::error!(method = %method, error = %err, "request failed");
                JsonRpcResponse::error(id, err.to_wire())
            }
        };
        self.write_response(response).await;
    }

    async fn invoke_method(&self, method: &str, params: Value) -> Result<Value, Error> {
        if self.config.strict
            && !self.is_initialized()
            && !matches!(method, methods::INITIALIZE | methods::PING)
        {
            return Err(Error::invalid_request("Server is not initialized"));
        }

        let handler = lock(&self.methods).get(method);
        match handler {
            Some(handler) => handler(params).await,
            None => Err(Error::method_not_found(method)),
        }
    }

    async fn dispatch_notification(&self, notification: JsonRpcNotification) {
        if self.role == Role::Server
            && self.config.strict
            && !self.is_initialized()
            && notification.method != methods::NOTIFICATION_INITIALIZED
        {
            tracing::error!(
                method = %notification.method,
                "dropping notification received before initialization"
            );
            return;
        }

        let handlers = lock(&self.notifications).handlers_for(&notification.method);
        if handlers.is_empty() {
            tracing::debug!(method = %notification.method, "no handlers registered");
            return;
        }
        for handler in handlers {
            if let Err(err) = handler(notification.params.clone()).await {
                tracing::warn!(
                    method = %notification.method,
                    error = %err,
                    "notification handler failed"
                );
            }
        }
    }

    async fn write_response(&self, response: JsonRpcResponse) {
        match serde_json::to_vec(&response) {
            Ok(bytes) => {
                if let Err(err) = self.send_bytes(&bytes).await {
                    tracing::error!(error = %err, "failed to write response");
                }
            }
            Err(err) => tracing::error!(error = %err, "failed to encode response"),
        }
    }
}

/// Salvage a request id from bytes that failed frame decoding.
fn recover_request_id(bytes: &[u8]) -> Option<RequestId> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    serde_json::from_value(value.get("id")?.clone()).ok()
}

/// The single long-running receive task.
///
/// Transient ("would block") read errors back off briefly and retry; any
/// other error or EOF ends the loop. Pending requests are left in place
/// until the peer disconnects.
async fn recv_loop(core: Arc<PeerCore>, mut stream: FrameStream) {
    loop {
        match stream.next().await {
            Some(Ok(frame)) => core.handle_frame(&frame).await,
            Some(Err(err)) if err.kind() == io::ErrorKind::WouldBlock => {
                tokio::time::sleep(TRANSIENT_READ_BACKOFF).await;
            }
            Some(Err(err)) => {
                tracing::error!(error = %err, "transport read failed, stopping receive loop");
                break;
            }
            None => {
                tracing::debug!("transport closed the inbound stream");
                break;
            }
        }
    }
}
