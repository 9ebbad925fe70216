//! Peer lifecycle state machine
//!
//! Both roles walk the same three states: `Disconnected` until a transport
//! is attached, `Connected` until the initialize exchange completes, then
//! `Initialized`. Disconnecting is allowed from anywhere.

use super::mcp::Implementation;

/// Peer lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No transport attached
    Disconnected,
    /// Transport attached, initialize exchange not yet complete
    Connected,
    /// Initialize exchange complete, operations permitted
    Initialized,
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerState::Disconnected => write!(f, "Disconnected"),
            PeerState::Connected => write!(f, "Connected"),
            PeerState::Initialized => write!(f, "Initialized"),
        }
    }
}

/// Error when attempting an invalid state transition
#[derive(Debug, Clone)]
pub struct StateTransitionError {
    pub from: PeerState,
    pub to: PeerState,
}

impl std::fmt::Display for StateTransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Invalid state transition from {} to {}",
            self.from, self.to
        )
    }
}

impl std::error::Error for StateTransitionError {}

/// Lifecycle context for one peer.
///
/// `Local` is this peer's capability advertisement; `Remote` is the far
/// peer's, learned during the initialize exchange. Remote fields are never
/// written again until the next disconnect.
#[derive(Debug)]
pub struct PeerContext<Local, Remote> {
    state: PeerState,
    local_capabilities: Local,
    remote_capabilities: Option<Remote>,
    remote_info: Option<Implementation>,
    protocol_version: Option<String>,
}

impl<Local, Remote> PeerContext<Local, Remote> {
    pub fn new(local_capabilities: Local) -> Self {
        Self {
            state: PeerState::Disconnected,
            local_capabilities,
            remote_capabilities: None,
            remote_info: None,
            protocol_version: None,
        }
    }

    // State queries

    pub fn state(&self) -> PeerState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.state, PeerState::Disconnected)
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, PeerState::Initialized)
    }

    // State transitions

    pub fn transition_to(&mut self, new_state: PeerState) -> Result<(), StateTransitionError> {
        let valid = match (self.state, new_state) {
            (PeerState::Disconnected, PeerState::Connected) => true,
            (PeerState::Connected, PeerState::Initialized) => true,
            (_, PeerState::Disconnected) => true,
            (a, b) if a == b => true,
            _ => false,
        };

        if valid {
            self.state = new_state;
            Ok(())
        } else {
            Err(StateTransitionError {
                from: self.state,
                to: new_state,
            })
        }
    }

    pub fn set_connected(&mut self) -> Result<(), StateTransitionError> {
        self.transition_to(PeerState::Connected)
    }

    pub fn set_initialized(
        &mut self,
        protocol_version: String,
        remote_capabilities: Remote,
        remote_info: Implementation,
    ) -> Result<(), StateTransitionError> {
        self.transition_to(PeerState::Initialized)?;
        self.protocol_version = Some(protocol_version);
        self.remote_capabilities = Some(remote_capabilities);
        self.remote_info = Some(remote_info);
        Ok(())
    }

    pub fn set_disconnected(&mut self) {
        let _ = self.transition_to(PeerState::Disconnected);
        self.protocol_version = None;
        self.remote_capabilities = None;
        self.remote_info = None;
    }

    // Accessors

    pub fn local_capabilities(&self) -> &Local {
        &self.local_capabilities
    }

    pub fn remote_capabilities(&self) -> Option<&Remote> {
        self.remote_capabilities.as_ref()
    }

    pub fn remote_info(&self) -> Option<&Implementation> {
        self.remote_info.as_ref()
    }

    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mcp::{ClientCapabilities, ServerCapabilities};

    type ClientSide = PeerContext<ClientCapabilities, ServerCapabilities>;

    #[test]
    fn initial_state() {
        let ctx = ClientSide::new(ClientCapabilities::default());
        assert_eq!(ctx.state(), PeerState::Disconnected);
        assert!(!ctx.is_connected());
        assert!(!ctx.is_initialized());
        assert!(ctx.remote_capabilities().is_none());
        assert!(ctx.protocol_version().is_none());
    }

    #[test]
    fn full_lifecycle() {
        let mut ctx = ClientSide::new(ClientCapabilities::default());
        ctx.set_connected().unwrap();
        assert!(ctx.is_connected());
        assert!(!ctx.is_initialized());

        ctx.set_initialized(
            "2024-11-05".to_string(),
            ServerCapabilities::default(),
            Implementation::new("server", "1.0"),
        )
        .unwrap();
        assert!(ctx.is_initialized());
        assert_eq!(ctx.protocol_version(), Some("2024-11-05"));
        assert_eq!(ctx.remote_info().unwrap().name, "server");

        ctx.set_disconnected();
        assert_eq!(ctx.state(), PeerState::Disconnected);
        assert!(ctx.remote_capabilities().is_none());
        assert!(ctx.protocol_version().is_none());
    }

    #[test]
    fn cannot_initialize_while_disconnected() {
        let mut ctx = ClientSide::new(ClientCapabilities::default());
        let err = ctx
            .set_initialized(
                "2024-11-05".to_string(),
                ServerCapabilities::default(),
                Implementation::new("server", "1.0"),
            )
            .unwrap_err();
        assert_eq!(err.from, PeerState::Disconnected);
        assert_eq!(err.to, PeerState::Initialized);
        assert!(!ctx.is_initialized());
    }

    #[test]
    fn can_always_disconnect() {
        let mut ctx = ClientSide::new(ClientCapabilities::default());
        ctx.set_connected().unwrap();
        ctx.set_disconnected();
        assert_eq!(ctx.state(), PeerState::Disconnected);
    }

    #[test]
    fn same_state_transition_is_a_no_op() {
        let mut ctx = ClientSide::new(ClientCapabilities::default());
        ctx.set_connected().unwrap();
        assert!(ctx.set_connected().is_ok());
        assert_eq!(ctx.state(), PeerState::Connected);
    }

    #[test]
    fn transition_error_display() {
        let err = StateTransitionError {
            from: PeerState::Disconnected,
            to: PeerState::Initialized,
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Disconnected to Initialized"
        );
    }
}
