//! JSON-RPC 2.0 envelopes and frame decoding for MCP communication

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::Error;

/// JSON-RPC version constant
pub const JSONRPC_VERSION: &str = "2.0";

/// Request ID - can be string or number per JSON-RPC spec
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    /// Draw a random non-negative numeric id for an outbound request.
    pub fn random() -> Self {
        RequestId::Number(i64::from(rand::random::<u32>()))
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

/// JSON-RPC 2.0 Request
///
/// `params` is always emitted, as `{}` when the method takes no parameters;
/// decoding accepts a missing field as `null`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params: if params.is_null() { json!({}) } else { params },
        }
    }
}

/// JSON-RPC 2.0 Response - exactly one of `result`/`error` is present
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_some()
    }

    /// Split into the outcome a pending awaiter is resumed with.
    ///
    /// `result` wins when both fields are somehow present.
    pub fn into_outcome(self) -> Result<Value, Error> {
        if let Some(result) = self.result {
            Ok(result)
        } else if let Some(error) = self.error {
            Err(Error::from_wire(&error))
        } else {
            Err(Error::parse_error(
                "response carries neither result nor error",
            ))
        }
    }
}

/// JSON-RPC 2.0 Notification (no id field)
///
/// `params` is omitted entirely when the notification carries none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 Error object as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// One decoded wire frame.
///
/// A batch frame is a top-level JSON array; only response batches are
/// produced by this peer, so that is the only array shape decoded.
#[derive(Debug, Clone)]
pub enum Frame {
    Batch(Vec<JsonRpcResponse>),
    Response(JsonRpcResponse),
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl Frame {
    /// Decode one frame's bytes.
    ///
    /// Shapes are attempted in a fixed order: array-of-responses, single
    /// response, single request, single notification. The order matters
    /// because a response and a notification share no required
    /// discriminator beyond the presence of `id` and `result`/`error`.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|err| Error::parse_error(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(response_from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Frame::Batch),
            Value::Object(ref map) => {
                let has_outcome = map.contains_key("result") || map.contains_key("error");
                let has_id = map.contains_key("id");
                let has_method = map.contains_key("method");
                check_version(&value)?;

                if has_outcome {
                    response_from_value(value).map(Frame::Response)
                } else if has_id && has_method {
                    serde_json::from_value(value)
                        .map(Frame::Request)
                        .map_err(|err| Error::parse_error(err.to_string()))
                } else if has_method {
                    serde_json::from_value(value)
                        .map(Frame::Notification)
                        .map_err(|err| Error::parse_error(err.to_string()))
                } else {
                    Err(Error::parse_error(
                        "frame is neither a response, a request, nor a notification",
                    ))
                }
            }
            _ => Err(Error::parse_error(
                "top-level JSON-RPC frame must be an object or an array",
            )),
        }
    }
}

fn check_version(value: &Value) -> Result<(), Error> {
    match value.get("jsonrpc").and_then(Value::as_str) {
        Some(JSONRPC_VERSION) => Ok(()),
        Some(other) => Err(Error::parse_error(format!(
            "unsupported jsonrpc version: {other}"
        ))),
        None => Err(Error::parse_error("missing jsonrpc version field")),
    }
}

fn response_from_value(value: Value) -> Result<JsonRpcResponse, Error> {
    check_version(&value)?;
    let (has_outcome, has_id) = match value.as_object() {
        Some(map) => (
            map.contains_key("result") || map.contains_key("error"),
            map.contains_key("id"),
        ),
        None => return Err(Error::parse_error("response frame must be an object")),
    };
    if !has_outcome {
        return Err(Error::parse_error(
            "response carries neither result nor error",
        ));
    }
    if !has_id {
        return Err(Error::parse_error("response is missing an id"));
    }
    serde_json::from_value(value).map_err(|err| Error::parse_error(err.to_string()))
}

/// Encode a typed payload (request params or response result) into its wire
/// value. Unit payloads become `{}`.
pub(crate) fn to_wire_value<P: Serialize>(payload: &P) -> Result<Value, Error> {
    let value =
        serde_json::to_value(payload).map_err(|err| Error::internal_error(err.to_string()))?;
    Ok(if value.is_null() { json!({}) } else { value })
}

/// Decode a wire value into a concrete type, treating absent, `null`, and
/// `{}` interchangeably so unit-parameter methods accept all three spellings.
fn lenient_from_value<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    let unit_like = value.is_null() || value.as_object().is_some_and(|map| map.is_empty());
    if !unit_like {
        return serde_json::from_value(value);
    }
    match serde_json::from_value::<T>(value.clone()) {
        Ok(decoded) => Ok(decoded),
        Err(err) => {
            let flipped = if value.is_null() { json!({}) } else { Value::Null };
            serde_json::from_value(flipped).map_err(|_| err)
        }
    }
}

/// Decode inbound request/notification parameters; failures are the
/// caller's `invalidParams`.
pub(crate) fn from_params_value<P: DeserializeOwned>(params: Option<Value>) -> Result<P, Error> {
    lenient_from_value(params.unwrap_or(Value::Null))
        .map_err(|err| Error::invalid_params(err.to_string()))
}

/// Decode an inbound result payload into the awaiter's concrete type.
pub(crate) fn from_result_value<R: DeserializeOwned>(value: Value) -> Result<R, Error> {
    lenient_from_value(value).map_err(|err| Error::parse_error(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_request() {
        let json = br#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"add"}}"#;
        match Frame::decode(json).unwrap() {
            Frame::Request(req) => {
                assert_eq!(req.id, RequestId::Number(1));
                assert_eq!(req.method, "tools/call");
                assert_eq!(req.params["name"], "add");
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn decode_request_string_id() {
        let json = br#"{"jsonrpc":"2.0","id":"abc-123","method":"ping"}"#;
        match Frame::decode(json).unwrap() {
            Frame::Request(req) => assert_eq!(req.id, RequestId::String("abc-123".to_string())),
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn decode_response_with_result() {
        let json = br#"{"jsonrpc":"2.0","id":1,"result":{"status":"ok"}}"#;
        match Frame::decode(json).unwrap() {
            Frame::Response(resp) => {
                assert!(resp.is_success());
                assert_eq!(resp.into_outcome().unwrap()["status"], "ok");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn decode_response_with_error() {
        let json = br#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"nope"}}"#;
        match Frame::decode(json).unwrap() {
            Frame::Response(resp) => {
                let err = resp.into_outcome().unwrap_err();
                assert_eq!(err.code(), -32601);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn decode_notification() {
        let json = br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        match Frame::decode(json).unwrap() {
            Frame::Notification(n) => {
                assert_eq!(n.method, "notifications/initialized");
                assert!(n.params.is_none());
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn decode_batch_of_responses() {
        let json = br#"[
            {"jsonrpc":"2.0","id":1,"result":{}},
            {"jsonrpc":"2.0","id":2,"error":{"code":-32603,"message":"boom"}}
        ]"#;
        match Frame::decode(json).unwrap() {
            Frame::Batch(responses) => {
                assert_eq!(responses.len(), 2);
                assert!(responses[0].is_success());
                assert!(!responses[1].is_success());
            }
            other => panic!("expected batch, got {other:?}"),
        }
    }

    #[test]
    fn rejects_wrong_version() {
        let json = br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#;
        let err = Frame::decode(json).unwrap_err();
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn rejects_missing_version() {
        let json = br#"{"id":1,"method":"ping"}"#;
        assert!(Frame::decode(json).is_err());
    }

    #[test]
    fn rejects_invalid_json() {
        let err = Frame::decode(b"{not json").unwrap_err();
        assert_eq!(err.code(), -32700);
    }

    #[test]
    fn rejects_scalar_frame() {
        assert!(Frame::decode(b"42").is_err());
    }

    #[test]
    fn response_shape_wins_over_request() {
        // Has both id and result, so must decode as a response even though
        // serde would also accept it as a request shape with extra fields.
        let json = br#"{"jsonrpc":"2.0","id":7,"result":{"method":"ghost"}}"#;
        assert!(matches!(Frame::decode(json).unwrap(), Frame::Response(_)));
    }

    #[test]
    fn request_always_emits_params() {
        let req = JsonRpcRequest::new(1i64, "ping", Value::Null);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""params":{}"#));
    }

    #[test]
    fn notification_omits_unit_params() {
        let n = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&n).unwrap();
        assert!(!json.contains("params"));
    }

    #[test]
    fn request_round_trip() {
        let req = JsonRpcRequest::new(
            RequestId::String("a".to_string()),
            "tools/call",
            json!({"name": "add", "arguments": {"a": 1}}),
        );
        let bytes = serde_json::to_vec(&req).unwrap();
        match Frame::decode(&bytes).unwrap() {
            Frame::Request(decoded) => {
                assert_eq!(decoded.id, req.id);
                assert_eq!(decoded.method, req.method);
                assert_eq!(decoded.params, req.params);
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn unit_params_accept_all_spellings() {
        assert!(from_params_value::<()>(None).is_ok());
        assert!(from_params_value::<()>(Some(Value::Null)).is_ok());
        assert!(from_params_value::<()>(Some(json!({}))).is_ok());
    }

    #[test]
    fn unit_result_accepts_empty_object() {
        assert!(from_result_value::<()>(json!({})).is_ok());
        assert!(from_result_value::<()>(Value::Null).is_ok());
    }

    #[test]
    fn missing_params_decode_as_defaulted_struct() {
        #[derive(Debug, Deserialize)]
        struct Cursor {
            cursor: Option<String>,
        }
        let decoded: Cursor = from_params_value(None).unwrap();
        assert!(decoded.cursor.is_none());
    }

    #[test]
    fn bad_params_fail_with_invalid_params() {
        #[derive(Debug, Deserialize)]
        struct Named {
            #[allow(dead_code)]
            name: String,
        }
        let err = from_params_value::<Named>(Some(json!({"name": 42}))).unwrap_err();
        assert_eq!(err.code(), -32602);
    }

    #[test]
    fn random_ids_are_numeric() {
        for _ in 0..8 {
            match RequestId::random() {
                RequestId::Number(n) => assert!(n >= 0),
                RequestId::String(s) => panic!("unexpected string id {s}"),
            }
        }
    }
}
