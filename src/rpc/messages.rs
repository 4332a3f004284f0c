//! JSON-RPC 2.0 message types
//!
//! This module defines the wire envelopes and the classification of inbound
//! messages into responses, reverse-call requests and notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CopilotError;
use crate::types::identifiers::RequestId;

/// Protocol version string carried in every envelope
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes
pub mod error_codes {
    /// Invalid JSON
    pub const PARSE_ERROR: i64 = -32700;
    /// Not a valid request object
    pub const INVALID_REQUEST: i64 = -32600;
    /// Method does not exist
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal error
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Error object of a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Error message
    pub message: String,
    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Create an error object without data
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

impl From<JsonRpcError> for CopilotError {
    fn from(err: JsonRpcError) -> Self {
        CopilotError::rpc(err.code, err.message, err.data)
    }
}

/// Outbound request envelope
#[derive(Debug, Serialize)]
pub(crate) struct OutboundRequest<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

/// Outbound notification envelope
#[derive(Debug, Serialize)]
pub(crate) struct OutboundNotification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a Value,
}

/// Outbound response to a reverse call
#[derive(Debug, Serialize)]
pub(crate) struct OutboundResponse<'a> {
    pub jsonrpc: &'static str,
    pub id: &'a RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a JsonRpcError>,
}

/// A reverse call issued by the CLI
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Id to echo in the reply
    pub id: RequestId,
    /// Method name
    pub method: String,
    /// Parameters (`null` when absent)
    pub params: Value,
}

/// An id-less message from the CLI
#[derive(Debug, Clone)]
pub struct Notification {
    /// Method name
    pub method: String,
    /// Parameters (`null` when absent)
    pub params: Value,
}

/// A reply to one of our requests
#[derive(Debug, Clone)]
pub struct Response {
    /// Id of the request being answered
    pub id: RequestId,
    /// `result` or decoded `error`
    pub outcome: Result<Value, JsonRpcError>,
}

/// Inbound message demultiplexed by shape
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Has `id` and `result`/`error`
    Response(Response),
    /// Has `id` and `method`
    Request(InboundRequest),
    /// Has `method` and no `id`
    Notification(Notification),
}

impl IncomingMessage {
    /// Classify a decoded JSON value
    ///
    /// # Errors
    /// Returns a description of the problem for malformed messages
    pub fn classify(value: Value) -> Result<Self, String> {
        let Value::Object(mut obj) = value else {
            return Err("message is not a JSON object".to_string());
        };

        let id = match obj.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw.clone())
                    .map_err(|_| format!("invalid id {raw}"))?,
            ),
        };
        let method = match obj.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(other) => return Err(format!("invalid method {other}")),
        };
        let params = obj.remove("params").unwrap_or(Value::Null);

        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request(InboundRequest { id, method, params })),
            (Some(method), None) => Ok(Self::Notification(Notification { method, params })),
            (None, Some(id)) => {
                let outcome = match obj.remove("error") {
                    Some(error) if !error.is_null() => Err(serde_json::from_value(error)
                        .map_err(|e| format!("malformed error object for id {id}: {e}"))?),
                    _ => Ok(obj.remove("result").unwrap_or(Value::Null)),
                };
                Ok(Self::Response(Response { id, outcome }))
            }
            (None, None) => match obj.get("error") {
                Some(error) => Err(format!("error response without id: {error}")),
                None => Err("message has neither id nor method".to_string()),
            },
        }
    }
}
