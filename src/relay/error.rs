//! Error types for the command relay.

use std::time::Duration;

use thiserror::Error;

use crate::relay::pending::CorrelationId;

/// Result type for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// Errors a caller of [`CommandRelay::send_command`] can observe.
///
/// [`CommandRelay::send_command`]: crate::relay::CommandRelay::send_command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// No Rhino client is attached; nothing was sent.
    #[error("No Rhino clients connected")]
    NoClientsConnected,

    /// The transport rejected every delivery attempt.
    #[error("Failed to deliver command to any of {attempted} attached client(s)")]
    DeliveryFailed {
        /// Number of clients a delivery was attempted to.
        attempted: usize,
    },

    /// No matching response arrived before the deadline.
    #[error("No response to request {correlation_id} within {}ms", timeout.as_millis())]
    RequestTimeout {
        /// The request that timed out.
        correlation_id: CorrelationId,
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The client answered with an error payload.
    #[error("Rhino client reported an error: {message}")]
    Remote {
        /// Error text sent by the client.
        message: String,
    },

    /// The pending entry was cancelled before any response arrived.
    #[error("Request {correlation_id} was cancelled")]
    Cancelled {
        /// The request that was cancelled.
        correlation_id: CorrelationId,
    },
}

impl RelayError {
    /// Creates a remote error from the client's error text.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }
}

/// Errors raised by a [`Transport`] when pushing a payload to one client.
///
/// These never cross the relay boundary; the relay logs them and folds
/// them into [`RelayError::DeliveryFailed`] when no client accepted the
/// command.
///
/// [`Transport`]: crate::transport::Transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has no live connection for the client.
    #[error("Client not connected: {client}")]
    NotConnected {
        /// The client that could not be reached.
        client: String,
    },

    /// The connection exists but its outbound channel is closed.
    #[error("Outbound channel closed for client: {client}")]
    ChannelClosed {
        /// The client whose channel is closed.
        client: String,
    },

    /// Writing to the underlying connection failed.
    #[error("I/O error while sending to client")]
    Io(#[from] std::io::Error),
}

/// Reasons an inbound payload is discarded without resolving anything.
///
/// Only used for logging and for [`InboundDisposition`]; never returned to
/// a waiting caller.
///
/// [`InboundDisposition`]: crate::relay::InboundDisposition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedResponse {
    /// Payload is not valid JSON.
    #[error("payload is not valid JSON")]
    InvalidJson,

    /// Payload is JSON but not an object.
    #[error("payload is not a JSON object")]
    NotAnObject,

    /// Payload carries neither `result` nor `error`.
    #[error("payload has neither `result` nor `error`")]
    MissingOutcome,

    /// `error` is present but not a string.
    #[error("`error` field must be a string")]
    ErrorNotString,
}
