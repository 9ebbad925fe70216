//! MCP server role
//!
//! Registers typed method handlers, enforces the initialize lifecycle, and
//! pushes list-changed / resource-updated notifications. Default handlers
//! for `initialize` and `ping` are installed at start unless the embedder
//! registered their own.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::Error;
use crate::protocol::mcp::{
    methods, ClientCapabilities, Implementation, Initialize, InitializeResult, Initialized,
    Method, Notification, Ping, PromptsListChanged, ResourceUpdatedParams, ResourceUpdated,
    ResourcesListChanged, ServerCapabilities, ToolsListChanged, LATEST_PROTOCOL_VERSION,
};
use crate::protocol::state::{PeerContext, PeerState};
use crate::transport::Transport;

use super::{lock, Configuration, PeerCore, Role};

/// Runs before client state is stored during initialization; an error
/// becomes the initialize response and leaves the server uninitialized.
pub type InitializeHook =
    Arc<dyn Fn(&Implementation, &ClientCapabilities) -> Result<(), Error> + Send + Sync>;

/// Delay between answering `initialize` and announcing readiness, giving
/// the response frame time to go out first.
const INITIALIZED_NOTIFICATION_DELAY: Duration = Duration::from_millis(100);

/// MCP server hosting tools, resources, and prompts over one transport
pub struct Server {
    core: Arc<PeerCore>,
    info: Implementation,
    instructions: Option<String>,
    context: Arc<Mutex<PeerContext<ServerCapabilities, ClientCapabilities>>>,
}

impl Server {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        capabilities: ServerCapabilities,
        config: Configuration,
    ) -> Self {
        Self {
            core: Arc::new(PeerCore::new(Role::Server, config)),
            info: Implementation::new(name, version),
            instructions: None,
            context: Arc::new(Mutex::new(PeerContext::new(capabilities))),
        }
    }

    /// Usage instructions returned from `initialize`.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    /// Bind a typed handler for method `M`, replacing any previous binding.
    pub fn register_method<M, H, Fut>(&self, handler: H)
    where
        M: Method,
        H: Fn(M::Params) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<M::Result, Error>> + Send + 'static,
    {
        self.core.register_method::<M, H, Fut>(handler);
    }

    /// Register a handler for an inbound notification.
    pub fn on_notification<N, H, Fut>(&self, handler: H)
    where
        N: Notification,
        H: Fn(N::Params) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), Error>> + Send + 'static,
    {
        self.core.register_notification::<N, H, Fut>(handler);
    }

    /// Attach the transport and start serving.
    pub async fn start(&self, transport: Box<dyn Transport>) -> Result<(), Error> {
        self.start_with_hook(transport, None).await
    }

    /// Start with an initialization hook that can veto clients.
    pub async fn start_with_hook(
        &self,
        transport: Box<dyn Transport>,
        hook: Option<InitializeHook>,
    ) -> Result<(), Error> {
        self.register_default_handlers(hook);
        Arc::clone(&self.core).attach(transport).await?;
        lock(&self.context)
            .set_connected()
            .map_err(|err| Error::invalid_request(err.to_string()))?;
        Ok(())
    }

    /// Cancel the receive task, fail outstanding requests, and release the
    /// transport.
    pub async fn stop(&self) -> Result<(), Error> {
        self.core.detach("Server disconnected").await?;
        lock(&self.context).set_disconnected();
        Ok(())
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

    /// Info the client sent during initialization.
    pub fn client_info(&self) -> Option<Implementation> {
        lock(&self.context).remote_info().cloned()
    }

    pub fn client_capabilities(&self) -> Option<ClientCapabilities> {
        lock(&self.context).remote_capabilities().cloned()
    }

    // =========================================================================
    // Outbound notifications
    // =========================================================================

    pub async fn notify_tools_list_changed(&self) -> Result<(), Error> {
        self.core.send_notification::<ToolsListChanged>(()).await
    }

    pub async fn notify_prompts_list_changed(&self) -> Result<(), Error> {
        self.core.send_notification::<PromptsListChanged>(()).await
    }

    pub async fn notify_resources_list_changed(&self) -> Result<(), Error> {
        self.core.send_notification::<ResourcesListChanged>(()).await
    }

    pub async fn notify_resource_updated(
        &self,
        params: ResourceUpdatedParams,
    ) -> Result<(), Error> {
        self.core.send_notification::<ResourceUpdated>(params).await
    }

    // =========================================================================
    // Extension points
    // =========================================================================

    /// Send any typed request to the client.
    pub async fn request<M: Method>(&self, params: M::Params) -> Result<M::Result, Error> {
        self.core.send_request::<M>(params).await
    }

    /// Send any typed notification to the client.
    pub async fn notify<N: Notification>(&self, params: N::Params) -> Result<(), Error> {
        self.core.send_notification::<N>(params).await
    }

    // =========================================================================
    // Internal
    // =========================================================================

    fn register_default_handlers(&self, hook: Option<InitializeHook>) {
        if !self.core.has_method(methods::INITIALIZE) {
            let core = Arc::clone(&self.core);
            let context = Arc::clone(&self.context);
            let info = self.info.clone();
            let instructions = self.instructions.clone();

            self.core.register_method::<Initialize, _, _>(move |params| {
                let core = Arc::clone(&core);
                let context = Arc::clone(&context);
                let info = info.clone();
                let instructions = instructions.clone();
                let hook = hook.clone();

                async move {
                    if lock(&context).is_initialized() {
                        return Err(Error::invalid_request("Server is already initialized"));
                    }
                    if params.protocol_version != LATEST_PROTOCOL_VERSION {
                        return Err(Error::invalid_request(format!(
                            "Unsupported protocol version: {}",
                            params.protocol_version
                        )));
                    }
                    if let Some(hook) = &hook {
                        hook(&params.client_info, &params.capabilities)?;
                    }

                    let capabilities = {
                        let mut context = lock(&context);
                        context
                            .set_initialized(
                                params.protocol_version,
                                params.capabilities,
                                params.client_info,
                            )
                            .map_err(|err| Error::invalid_request(err.to_string()))?;
                        context.local_capabilities().clone()
                    };
                    core.set_initialized(true);

                    // Announce readiness once the response frame has had a
                    // chance to go out.
                    let announce = Arc::clone(&core);
                    tokio::spawn(async move {
                        tokio::time::sleep(INITIALIZED_NOTIFICATION_DELAY).await;
                        if let Err(err) = announce.send_notification::<Initialized>(()).await {
                            tracing::warn!(
                                error = %err,
                                "failed to send initialized notification"
                            );
                        }
                    });

                    Ok(InitializeResult {
                        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
                        capabilities,
                        server_info: info,
                        instructions,
                    })
                }
            });
        }

        if !self.core.has_method(methods::PING) {
            self.core.register_method::<Ping, _, _>(|()| async { Ok(()) });
        }
    }
}
