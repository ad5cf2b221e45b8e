//! JSON-RPC 2.0 envelope types used on the MCP stdio channel.
//!
//! A line from the MCP client is either a request (carries an `id`, gets
//! exactly one reply) or a notification (no `id`, never answered). Replies
//! are [`JsonRpcResponse`] on success and [`JsonRpcError`] otherwise.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The MCP protocol revision this server speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Name reported in `serverInfo`.
pub const SERVER_NAME: &str = "rhino-mcp-relay";

const JSONRPC_VERSION: &str = "2.0";

/// Identifier of a JSON-RPC request. MCP forbids `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// An incoming request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol marker, always `"2.0"` once parsed.
    pub jsonrpc: String,
    /// Request id echoed in the reply.
    pub id: RequestId,
    /// Method name, e.g. `tools/call`.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// An incoming notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol marker.
    pub jsonrpc: String,
    /// Notification name, e.g. `notifications/initialized`.
    pub method: String,
    /// Notification parameters.
    #[serde(default)]
    pub params: Option<Value>,
}

/// A parsed line from the MCP client.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    /// Expects a reply.
    Request(JsonRpcRequest),
    /// Fire-and-forget.
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    /// The method or notification name.
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(req) => &req.method,
            Self::Notification(notif) => &notif.method,
        }
    }

    /// The request id, if this is a request.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Notification(_) => None,
        }
    }
}

/// A successful reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Id of the request being answered.
    pub id: RequestId,
    /// Method result.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a success reply.
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result,
        }
    }
}

/// Reserved JSON-RPC error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// The line is not JSON.
    ParseError,
    /// The JSON is not a request or notification.
    InvalidRequest,
    /// Unknown method.
    MethodNotFound,
    /// Parameters do not match the method.
    InvalidParams,
    /// Failure inside the server.
    InternalError,
}

impl ErrorCode {
    /// Numeric wire value.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }

    const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
        }
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    /// Numeric code.
    pub code: i32,
    /// Human-readable message.
    pub message: String,
    /// Extra detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Id of the failed request, when it could be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    /// Error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates an error reply with a custom message.
    #[must_use]
    pub fn new(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            error: JsonRpcErrorData {
                code: code.code(),
                message: message.into(),
                data: None,
            },
        }
    }

    fn from_code(id: Option<RequestId>, code: ErrorCode) -> Self {
        Self::new(id, code, code.default_message())
    }

    /// The line could not be parsed as JSON.
    #[must_use]
    pub fn parse_error() -> Self {
        Self::from_code(None, ErrorCode::ParseError)
    }

    /// The message is not valid JSON-RPC.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::from_code(id, ErrorCode::InvalidRequest)
    }

    /// The method is unknown.
    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::new(
            Some(id),
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// The parameters are unusable.
    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(Some(id), ErrorCode::InvalidParams, message)
    }

    /// The server failed while handling the request.
    #[must_use]
    pub fn internal_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::new(Some(id), ErrorCode::InternalError, message)
    }
}

/// Parses one line from the MCP client.
///
/// # Errors
///
/// Returns a ready-to-send [`JsonRpcError`] if the line is not JSON or not a
/// JSON-RPC 2.0 message.
pub fn parse_message(line: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(line).map_err(|_| JsonRpcError::parse_error())?;
    let obj = value.as_object().ok_or_else(JsonRpcError::parse_error)?;

    if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(JsonRpcError::invalid_request(None));
    }

    if obj.contains_key("id") {
        let request: JsonRpcRequest =
            serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;
        if request.method.is_empty() {
            return Err(JsonRpcError::invalid_request(Some(request.id)));
        }
        Ok(IncomingMessage::Request(request))
    } else {
        serde_json::from_value(value)
            .map(IncomingMessage::Notification)
            .map_err(|_| JsonRpcError::invalid_request(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_and_notification() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert_eq!(msg.id(), Some(&RequestId::Number(7)));
        assert_eq!(msg.method(), "tools/list");

        let msg = parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        assert!(matches!(msg, IncomingMessage::Notification(_)));
    }

    #[test]
    fn string_ids_round_trip_display() {
        let msg = parse_message(r#"{"jsonrpc":"2.0","id":"req-1","method":"ping"}"#).unwrap();
        assert_eq!(msg.id().unwrap().to_string(), "req-1");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            parse_message("not json").unwrap_err().error.code,
            ErrorCode::ParseError.code()
        );
        assert_eq!(
            parse_message(r#"{"jsonrpc":"1.0","id":1,"method":"x"}"#)
                .unwrap_err()
                .error
                .code,
            ErrorCode::InvalidRequest.code()
        );

        let err = parse_message(r#"{"jsonrpc":"2.0","id":3,"method":""}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(3)));
    }

    #[test]
    fn error_reply_shape() {
        let error = JsonRpcError::method_not_found(RequestId::Number(1), "resources/list");
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 1);
        assert_eq!(value["error"]["code"], -32601);
        assert!(value["error"].get("data").is_none());
    }
}
