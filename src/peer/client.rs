//! MCP client role
//!
//! High-level, typed API over the peer core: connect a transport, run the
//! initialize exchange, then call into the server's tools, resources, and
//! prompts. In strict mode each call is gated on the capabilities the
//! server advertised during initialization and fails locally, without a
//! round trip, when the feature is missing.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::errors::Error;
use crate::protocol::mcp::{
    CallTool, CallToolParams, CallToolResult, ClientCapabilities, GetPrompt, GetPromptParams,
    GetPromptResult, Implementation, Initialize, InitializeParams, InitializeResult,
    ListPrompts, ListPromptsResult, ListResources, ListResourcesResult, ListTools,
    ListToolsResult, Method, Notification, PaginationParams, Ping, ReadResource,
    ReadResourceParams, ReadResourceResult, ResourceSubscriptionParams, ServerCapabilities,
    SubscribeResource, UnsubscribeResource, LATEST_PROTOCOL_VERSION,
};
use crate::protocol::state::{PeerContext, PeerState};
use crate::transport::Transport;

use super::{lock, Batch, Configuration, PeerCore, Role};

/// MCP client for communicating with an MCP server over one transport
pub struct Client {
    core: Arc<PeerCore>,
    info: Implementation,
    context: Mutex<PeerContext<ClientCapabilities, ServerCapabilities>>,
}

impl Client {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_capabilities(
            name,
            version,
            ClientCapabilities::default(),
            Configuration::default(),
        )
    }

    pub fn with_capabilities(
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: ClientCapabilities,
        config: Configuration,
    ) -> Self {
        Self {
            core: Arc::new(PeerCore::new(Role::Client, config)),
            info: Implementation::new(name, version),
            context: Mutex::new(PeerContext::new(capabilities)),
        }
    }

    /// Attach the transport and start the receive task.
    pub async fn connect(&self, transport: Box<dyn Transport>) -> Result<(), Error> {
        Arc::clone(&self.core).attach(transport).await?;
        lock(&self.context)
            .set_connected()
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        Ok(())
    }

    /// Run the initialize exchange.
    ///
    /// Stores the server's capabilities, info, and protocol version on
    /// success; every strict-mode gate reads them from here on.
    pub async fn initialize(&self) -> Result<InitializeResult, Error> {
        let capabilities = {
            let context = lock(&self.context);
            if !context.is_connected() {
                return Err(Error::internal_error("Client is not connected"));
            }
            if context.is_initialized() {
                return Err(Error::invalid_request("Client is already initialized"));
            }
            context.local_capabilities().clone()
        };

        let params = InitializeParams::new(self.info.clone(), capabilities);
        let result = self.core.send_request::<Initialize>(params).await?;

        if result.protocol_version != LATEST_PROTOCOL_VERSION {
            return Err(Error::invalid_request(format!(
                "Unsupported protocol version: {}",
                result.protocol_version
            )));
        }

        lock(&self.context)
            .set_initialized(
                result.protocol_version.clone(),
                result.capabilities.clone(),
                result.server_info.clone(),
            )
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        self.core.set_initialized(true);

        Ok(result)
    }

    // =========================================================================
    // Connection state
    // =========================================================================

    pub fn state(&self) -> PeerState {
        lock(&self.context).state()
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.context).is_initialized()
    }

    /// Server capabilities learned during initialization.
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        lock(&self.context).remote_capabilities().cloned()
    }

    pub fn server_info(&self) -> Option<Implementation> {
        lock(&self.context).remote_info().cloned()
    }

    pub fn protocol_version(&self) -> Option<String> {
        lock(&self.context).protocol_version().map(str::to_string)
    }

    // =========================================================================
    // Tools
    // =========================================================================

    pub async fn list_tools(&self, cursor: Option<String>) -> Result<ListToolsResult, Error> {
        self.gate("Tools", ServerCapabilities::has_tools)?;
        self.core
            .send_request::<ListTools>(PaginationParams { cursor })
            .await
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, Error> {
        self.gate("Tools", ServerCapabilities::has_tools)?;
        self.core
            .send_request::<CallTool>(CallToolParams {
                name: name.to_string(),
                arguments,
            })
            .await
    }

    // =========================================================================
    // Resources
    // =========================================================================

    pub async fn list_resources(
        &self,
        cursor: Option<String>,
    ) -> Result<ListResourcesResult, Error> {
        self.gate("Resources", ServerCapabilities::has_resources)?;
        self.core
            .send_request::<ListResources>(PaginationParams { cursor })
            .await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, Error> {
        self.gate("Resources", ServerCapabilities::has_resources)?;
        self.core
            .send_request::<ReadResource>(ReadResourceParams {
                uri: uri.to_string(),
            })
            .await
    }

    pub async fn subscribe_to_resource(&self, uri: &str) -> Result<(), Error> {
        self.gate(
            "Resource subscription",
            ServerCapabilities::supports_resource_subscriptions,
        )?;
        self.core
            .send_request::<SubscribeResource>(ResourceSubscriptionParams {
                uri: uri.to_string(),
            })
            .await
    }

    pub async fn unsubscribe_from_resource(&self, uri: &str) -> Result<(), Error> {
        self.gate(
            "Resource subscription",
            ServerCapabilities::supports_resource_subscriptions,
        )?;
        self.core
            .send_request::<UnsubscribeResource>(ResourceSubscriptionParams {
                uri: uri.to_string(),
            })
            .await
    }

    // =========================================================================
    // Prompts
    // =========================================================================

    pub async fn list_prompts(&self, cursor: Option<String>) -> Result<ListPromptsResult, Error> {
        self.gate("Prompts", ServerCapabilities::has_prompts)?;
        self.core
            .send_request::<ListPrompts>(PaginationParams { cursor })
            .await
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Value>,
    ) -> Result<GetPromptResult, Error> {
        self.gate("Prompts", ServerCapabilities::has_prompts)?;
        self.core
            .send_request::<GetPrompt>(GetPromptParams {
                name: name.to_string(),
                arguments,
            })
            .await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub async fn ping(&self) -> Result<(), Error> {
        self.core.send_request::<Ping>(()).await
    }

    /// Cancel the receive task, fail outstanding requests, and release the
    /// transport.
    pub async fn disconnect(&self) -> Result<(), Error> {
        self.core.detach("Client disconnected").await?;
        lock(&self.context).set_disconnected();
        Ok(())
    }

    // =========================================================================
    // Extension points
    // =========================================================================

    /// Send any typed request, bypassing the capability gates. Extension
    /// methods outside the standard families go through here.
    pub async fn request<M: Method>(&self, params: M::Params) -> Result<M::Result, Error> {
        self.core.send_request::<M>(params).await
    }

    /// Send any typed notification.
    pub async fn notify<N: Notification>(&self, params: N::Params) -> Result<(), Error> {
        self.core.send_notification::<N>(params).await
    }

    /// Register a handler for an inbound notification. Handlers for the
    /// same notification run in registration order.
    pub fn on_notification<N, H, Fut>(&self, handler: H)
    where
        N: Notification,
        H: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.core.register_notification::<N, H, Fut>(handler);
    }

    // =========================================================================
    // Batching
    // =========================================================================

    /// Open a batch for manual use; call [`Batch::send`] to flush it.
    pub fn new_batch(&self) -> Batch {
        Batch::new(Arc::clone(&self.core))
    }

    /// Scoped batching: the closure queues requests, and the accumulated
    /// batch is sent as one frame when it returns.
    pub async fn batch<T, F>(&self, build: F) -> Result<T, Error>
    where
        F: FnOnce(&mut Batch) -> Result<T, Error>,
    {
        let mut batch = self.new_batch();
        let out = build(&mut batch)?;
        batch.send().await?;
        Ok(out)
    }

    // =========================================================================
    // Internal
    // =========================================================================

    /// Strict-mode capability gate: resolves locally, without any traffic,
    /// when the server never advertised the feature.
    fn gate(
        &self,
        feature: &str,
        supported: impl FnOnce(&ServerCapabilities) -> bool,
    ) -> Result<(), Error> {
        if !self.core.config.strict {
            return Ok(());
        }
        let context = lock(&self.context);
        let advertised = context.remote_capabilities().map(supported).unwrap_or(false);
        if advertised {
            Ok(())
        } else {
            Err(Error::method_not_found(format!(
                "{feature} is not supported by the server"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mcp::ToolsCapability;

    fn initialized_client(config: Configuration, caps: ServerCapabilities) -> Client {
        let client =
            Client::with_capabilities("test", "1.0", ClientCapabilities::default(), config);
        {
            let mut context = lock(&client.context);
            context.set_connected().unwrap();
            context
                .set_initialized(
                    LATEST_PROTOCOL_VERSION.to_string(),
                    caps,
                    Implementation::new("server", "1.0"),
                )
                .unwrap();
        }
        client
    }

    #[tokio::test]
    async fn strict_gate_fails_locally_for_missing_capability() {
        let client = initialized_client(Configuration::strict(), ServerCapabilities::default());
        let err = client.list_prompts(None).await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));
        assert_eq!(err.detail(), Some("Prompts is not supported by the server"));
    }

    #[tokio::test]
    async fn strict_gate_passes_for_advertised_capability() {
        let caps = ServerCapabilities {
            tools: Some(ToolsCapability::default()),
            ..Default::default()
        };
        let client = initialized_client(Configuration::strict(), caps);
        // Gate passes, so the call reaches the (absent) transport instead.
        let err = client.list_tools(None).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn lenient_mode_skips_the_gate() {
        let client =
            initialized_client(Configuration::default(), ServerCapabilities::default());
        let err = client.list_prompts(None).await.unwrap_err();
        // Not a local methodNotFound: the request went toward the wire.
        assert!(matches!(err, Error::Internal(_)));
    }

    #[tokio::test]
    async fn subscription_gate_requires_the_subscribe_flag() {
        let caps: ServerCapabilities = serde_json::from_value(serde_json::json!({
            "resources": {"listChanged": true}
        }))
        .unwrap();
        let client = initialized_client(Configuration::strict(), caps);

        // Parent capability present, so reads pass the gate...
        let err = client.read_resource("file:///x").await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        // ...but subscriptions need the explicit flag.
        let err = client.subscribe_to_resource("file:///x").await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn initialize_requires_a_connection() {
        let client = Client::new("test", "1.0");
        let err = client.initialize().await.unwrap_err();
        assert_eq!(err.detail(), Some("Client is not connected"));
    }

    #[test]
    fn fresh_client_is_disconnected() {
        let client = Client::new("test", "1.0");
        assert_eq!(client.state(), PeerState::Disconnected);
        assert!(!client.is_initialized());
        assert!(client.server_capabilities().is_none());
        assert!(client.protocol_version().is_none());
    }
}
