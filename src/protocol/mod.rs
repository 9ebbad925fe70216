//! Protocol layer for MCP communication
//!
//! This module provides:
//! - JSON-RPC 2.0 envelopes, frame decoding, and the request-id type
//! - MCP method and notification descriptors with their typed schemas
//! - The peer lifecycle state machine

pub mod jsonrpc;
pub mod mcp;
pub mod state;

// Re-export commonly used types
pub use jsonrpc::{
    Frame, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use mcp::{
    ClientCapabilities, Implementation, Method, Notification, ServerCapabilities,
    LATEST_PROTOCOL_VERSION,
};
pub use state::{PeerContext, PeerState};
