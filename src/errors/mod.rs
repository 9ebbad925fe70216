//! Protocol error model shared by both peer roles.
//!
//! Covers the standard JSON-RPC 2.0 codes plus the transport/connection
//! family that only ever surfaces locally. Every variant carries an
//! optional prose detail which travels on the wire as `data.detail`.

use std::hash::{Hash, Hasher};

use miette::Diagnostic;
use serde_json::{json, Value};
use thiserror::Error;

use crate::protocol::jsonrpc::JsonRpcError;

/// JSON-RPC error codes used by the protocol.
pub mod codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const CONNECTION_CLOSED: i32 = -32000;
    pub const TRANSPORT_ERROR: i32 = -32001;

    /// Implementation-defined server error range (inclusive bounds).
    pub const SERVER_ERROR_MAX: i32 = -32000;
    pub const SERVER_ERROR_MIN: i32 = -32099;
}

/// Error sum for everything a peer can report.
///
/// Equality compares codes only; hashing mixes in the detail so errors can
/// key collections without collapsing distinct failures of the same kind.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum Error {
    /// Invalid JSON was received or an envelope failed to decode.
    #[error("Parse error{}", detail_suffix(.0))]
    #[diagnostic(code(mcp::parse_error))]
    Parse(Option<String>),

    /// The JSON sent is not a valid request object, or lifecycle
    /// preconditions were violated.
    #[error("Invalid request{}", detail_suffix(.0))]
    #[diagnostic(code(mcp::invalid_request))]
    InvalidRequest(Option<String>),

    /// The method does not exist or is not available.
    #[error("Method not found{}", detail_suffix(.0))]
    #[diagnostic(code(mcp::method_not_found))]
    MethodNotFound(Option<String>),

    /// Invalid method parameters.
    #[error("Invalid params{}", detail_suffix(.0))]
    #[diagnostic(code(mcp::invalid_params))]
    InvalidParams(Option<String>),

    /// Internal JSON-RPC error.
    #[error("Internal error{}", detail_suffix(.0))]
    #[diagnostic(code(mcp::internal_error))]
    Internal(Option<String>),

    /// Implementation-defined server error.
    #[error("Server error {code}: {message}")]
    #[diagnostic(code(mcp::server_error))]
    Server {
        code: i32,
        message: String,
        detail: Option<String>,
    },

    /// The connection was closed before a response arrived.
    #[error("Connection closed{}", detail_suffix(.0))]
    #[diagnostic(code(mcp::connection_closed))]
    ConnectionClosed(Option<String>),

    /// The underlying transport failed.
    #[error("Transport error{}", detail_suffix(.0))]
    #[diagnostic(code(mcp::transport_error))]
    Transport(Option<String>),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

impl Error {
    pub fn parse_error(detail: impl Into<String>) -> Self {
        Error::Parse(Some(detail.into()))
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Error::InvalidRequest(Some(detail.into()))
    }

    pub fn method_not_found(detail: impl Into<String>) -> Self {
        Error::MethodNotFound(Some(detail.into()))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Error::InvalidParams(Some(detail.into()))
    }

    pub fn internal_error(detail: impl Into<String>) -> Self {
        Error::Internal(Some(detail.into()))
    }

    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Error::Server {
            code,
            message: message.into(),
            detail: None,
        }
    }

    pub fn connection_closed() -> Self {
        Error::ConnectionClosed(None)
    }

    pub fn transport_error(detail: impl Into<String>) -> Self {
        Error::Transport(Some(detail.into()))
    }

    /// The JSON-RPC error code for this variant.
    pub fn code(&self) -> i32 {
        match self {
            Error::Parse(_) => codes::PARSE_ERROR,
            Error::InvalidRequest(_) => codes::INVALID_REQUEST,
            Error::MethodNotFound(_) => codes::METHOD_NOT_FOUND,
            Error::InvalidParams(_) => codes::INVALID_PARAMS,
            Error::Internal(_) => codes::INTERNAL_ERROR,
            Error::Server { code, .. } => *code,
            Error::ConnectionClosed(_) => codes::CONNECTION_CLOSED,
            Error::Transport(_) => codes::TRANSPORT_ERROR,
        }
    }

    /// The optional prose detail attached to this error.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Error::Parse(detail)
            | Error::InvalidRequest(detail)
            | Error::MethodNotFound(detail)
            | Error::InvalidParams(detail)
            | Error::Internal(detail)
            | Error::ConnectionClosed(detail)
            | Error::Transport(detail)
            | Error::Server { detail, .. } => detail.as_deref(),
        }
    }

    /// Encode into the wire object `{ code, message, data? }`.
    ///
    /// The message is the canonical phrase for the code; the prose detail
    /// travels under `data.detail`.
    pub fn to_wire(&self) -> JsonRpcError {
        let message = match self {
            Error::Parse(_) => "Parse error".to_string(),
            Error::InvalidRequest(_) => "Invalid Request".to_string(),
            Error::MethodNotFound(_) => "Method not found".to_string(),
            Error::InvalidParams(_) => "Invalid params".to_string(),
            Error::Internal(_) => "Internal error".to_string(),
            Error::Server { message, .. } => message.clone(),
            Error::ConnectionClosed(_) => "Connection closed".to_string(),
            Error::Transport(_) => "Transport error".to_string(),
        };

        JsonRpcError {
            code: self.code(),
            message,
            data: self.detail().map(|detail| json!({ "detail": detail })),
        }
    }

    /// Decode from the wire object, mapping codes back onto variants.
    ///
    /// When `data.detail` is absent, the wire message doubles as the detail
    /// so the far peer's prose is not lost.
    pub fn from_wire(error: &JsonRpcError) -> Self {
        let detail = error
            .data
            .as_ref()
            .and_then(|data| data.get("detail"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                if error.message.is_empty() {
                    None
                } else {
                    Some(error.message.clone())
                }
            });

        match error.code {
            codes::PARSE_ERROR => Error::Parse(detail),
            codes::INVALID_REQUEST => Error::InvalidRequest(detail),
            codes::METHOD_NOT_FOUND => Error::MethodNotFound(detail),
            codes::INVALID_PARAMS => Error::InvalidParams(detail),
            codes::INTERNAL_ERROR => Error::Internal(detail),
            codes::CONNECTION_CLOSED => Error::ConnectionClosed(detail),
            codes::TRANSPORT_ERROR => Error::Transport(detail),
            code => Error::Server {
                code,
                message: error.message.clone(),
                detail: error
                    .data
                    .as_ref()
                    .and_then(|data| data.get("detail"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl Eq for Error {}

impl Hash for Error {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.code().hash(state);
        self.detail().hash(state);
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::transport_error(err.to_string())
    }
}
