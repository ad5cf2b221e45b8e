//! Wire messages exchanged with Rhino clients.
//!
//! Every message is a single JSON object.
//!
//! Relay to client:
//!
//! ```json
//! { "correlationId": "…", "function": "createLayer", "arguments": { "name": "A" } }
//! ```
//!
//! Client to relay:
//!
//! ```json
//! { "correlationId": "…", "result": … }
//! { "correlationId": "…", "error": "…" }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::relay::error::MalformedResponse;
use crate::relay::pending::CorrelationId;

/// A function call forwarded to Rhino clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandMessage {
    correlation_id: CorrelationId,
    function: String,
    arguments: Map<String, Value>,
}

impl CommandMessage {
    /// Creates a command message.
    #[must_use]
    pub fn new(
        correlation_id: CorrelationId,
        function: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        Self {
            correlation_id,
            function: function.into(),
            arguments,
        }
    }

    /// The correlation id of this command.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// The function name.
    #[must_use]
    pub fn function(&self) -> &str {
        &self.function
    }

    /// The function arguments.
    #[must_use]
    pub const fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }

    /// Serialises the message to a single-line JSON string.
    #[must_use]
    pub fn to_json(&self) -> String {
        json!({
            "correlationId": self.correlation_id,
            "function": self.function,
            "arguments": self.arguments,
        })
        .to_string()
    }
}

/// A decoded client payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientReply {
    /// A successful result for a command.
    Result {
        /// The command being answered.
        correlation_id: CorrelationId,
        /// The result payload.
        value: Value,
    },
    /// An error answer for a command.
    Error {
        /// The command being answered.
        correlation_id: CorrelationId,
        /// Error text reported by the client.
        message: String,
    },
    /// A message without a usable correlation id, such as a status push.
    OutOfBand,
}

/// Parses one client payload.
///
/// A missing, non-string, or non-UUID `correlationId` yields
/// [`ClientReply::OutOfBand`]. When both `error` and `result` are present,
/// `error` wins.
///
/// # Errors
///
/// Returns [`MalformedResponse`] if the payload is not a JSON object, or if it
/// carries a correlation id but no usable outcome.
pub fn parse_reply(raw: &str) -> Result<ClientReply, MalformedResponse> {
    let value: Value = serde_json::from_str(raw).map_err(|_| MalformedResponse::InvalidJson)?;
    let Value::Object(mut obj) = value else {
        return Err(MalformedResponse::NotAnObject);
    };

    let Some(correlation_id) = obj
        .get("correlationId")
        .and_then(Value::as_str)
        .and_then(|s| CorrelationId::parse(s).ok())
    else {
        return Ok(ClientReply::OutOfBand);
    };

    if let Some(error) = obj.remove("error") {
        let Value::String(message) = error else {
            return Err(MalformedResponse::ErrorNotString);
        };
        return Ok(ClientReply::Error {
            correlation_id,
            message,
        });
    }

    obj.remove("result")
        .map(|value| ClientReply::Result {
            correlation_id,
            value,
        })
        .ok_or(MalformedResponse::MissingOutcome)
}
