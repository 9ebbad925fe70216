//! mcp-peer - Bidirectional JSON-RPC 2.0 peer runtime for the Model
//! Context Protocol
//!
//! A client (typically a language-model host) and a server (typically a
//! tool/resource provider) exchange typed requests, responses, and
//! notifications over a pluggable byte-oriented transport. The peer
//! runtime multiplexes many in-flight requests over a single duplex
//! stream, enforces the MCP lifecycle, dispatches typed methods and
//! notifications to registered handlers, and supports JSON-RPC batching.
//!
//! # Modules
//!
//! - `protocol` - JSON-RPC envelopes, typed method/notification schemas,
//!   and the lifecycle state machine
//! - `peer` - the concurrent dispatch core plus the `Client` and `Server`
//!   roles
//! - `transport` - the transport contract and the stdio, TCP, HTTP+SSE,
//!   and in-memory implementations
//! - `errors` - the protocol error model
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_peer::{Client, Configuration};
//! use mcp_peer::transport::stdio::ChildProcessTransport;
//! use mcp_peer::transport::TransportConfig;
//!
//! let client = Client::new("example-host", "1.0.0");
//! let transport = ChildProcessTransport::new(
//!     "mcp-server",
//!     &[],
//!     TransportConfig::default(),
//! );
//! client.connect(Box::new(transport)).await?;
//! client.initialize().await?;
//!
//! let tools = client.list_tools(None).await?;
//! println!("server offers {} tools", tools.tools.len());
//! ```

pub mod errors;
pub mod peer;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use errors::Error;
pub use peer::{Batch, BatchHandle, Client, Configuration, InitializeHook, Server};
pub use protocol::{
    ClientCapabilities, Implementation, RequestId, ServerCapabilities, LATEST_PROTOCOL_VERSION,
};
pub use transport::{Transport, TransportConfig};
