//! Typed handler registries
//!
//! Registration binds a wire name to a boxed handler that performs the
//! typed conversion at the seam: dynamic `Value` in, concrete parameters
//! to the user closure, concrete result back out to a `Value`. No runtime
//! reflection; the method descriptor's associated types do the work.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::errors::Error;
use crate::protocol::jsonrpc::{from_params_value, to_wire_value};
use crate::protocol::mcp::{Method, Notification};

type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, Error>> + Send>>;

/// A registered method handler, callable with the raw inbound params.
pub(crate) type MethodHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

type NotifyFuture = Pin<Box<dyn Future<Output = Result<(), Error>> + Send>>;

/// A registered notification handler.
pub(crate) type NotificationHandler = Arc<dyn Fn(Option<Value>) -> NotifyFuture + Send + Sync>;

/// Method name -> single typed handler (server side).
#[derive(Default)]
pub(crate) struct MethodRegistry {
    handlers: HashMap<&'static str, MethodHandler>,
}

impl MethodRegistry {
    /// Bind a handler for method `M`, replacing any previous binding.
    pub fn register<M, H, Fut>(&mut self, handler: H)
    where
        M: Method,
        H: Fn(M::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Result, Error>> + Send + 'static,
    {
        let wrapped: MethodHandler = Arc::new(move |params: Value| {
            match from_params_value::<M::Params>(Some(params)) {
                Ok(params) => {
                    let fut = handler(params);
                    Box::pin(async move {
                        let result = fut.await?;
                        to_wire_value(&result)
                    }) as HandlerFuture
                }
                Err(err) => Box::pin(std::future::ready(Err(err))),
            }
        });
        self.handlers.insert(M::NAME, wrapped);
    }

    pub fn get(&self, name: &str) -> Option<MethodHandler> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

/// Notification name -> ordered handler list (both sides).
#[derive(Default)]
pub(crate) struct NotificationRegistry {
    handlers: HashMap<&'static str, Vec<NotificationHandler>>,
}

impl NotificationRegistry {
    /// Append a handler for notification `N`. Handlers run in registration
    /// order.
    pub fn register<N, H, Fut>(&mut self, handler: H)
    where
        N: Notification,
        H: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Error>> + Send + 'static,
    {
        let wrapped: NotificationHandler = Arc::new(move |params: Option<Value>| {
            match from_params_value::<N::Params>(params) {
                Ok(params) => Box::pin(handler(params)) as NotifyFuture,
                Err(err) => Box::pin(std::future::ready(Err(err))),
            }
        });
        self.handlers.entry(N::NAME).or_default().push(wrapped);
    }

    /// Handlers registered for `name`, in registration order.
    pub fn handlers_for(&self, name: &str) -> Vec<NotificationHandler> {
        self.handlers.get(name).cloned().unwrap_or_default()
    }
}
