//! The command relay: fan-out of commands and correlation of responses.
//!
//! # Command lifecycle
//!
//! ```text
//! CREATED ──▶ SENT ──┬──▶ FULFILLED
//!    │               ├──▶ FAILED
//!    │               └──▶ TIMED_OUT
//!    └── (every delivery failed) ──▶ removed, DeliveryFailed
//! ```
//!
//! Dropping the future returned by [`CommandRelay::send_command`] before it
//! completes removes the pending entry.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::relay::error::{MalformedResponse, RelayError, RelayResult};
use crate::relay::message::{parse_reply, ClientReply, CommandMessage};
use crate::relay::pending::{CorrelationId, PendingRequestTable, Resolution};
use crate::relay::registry::{ClientId, ClientRegistry};
use crate::transport::Transport;

/// What the relay did with an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundDisposition {
    /// A pending command was fulfilled with a result.
    Resolved,
    /// A pending command was failed with the client's error.
    Failed,
    /// The matching command's caller had already gone away.
    Abandoned,
    /// The matching command was settled earlier; the payload was dropped.
    Duplicate,
    /// No correlation id, or no pending command with that id.
    Unmatched,
    /// The payload could not be decoded.
    Malformed(MalformedResponse),
}

/// Removes the pending entry if `send_command` is dropped mid-flight.
struct CancelOnDrop<'a> {
    pending: &'a PendingRequestTable,
    correlation_id: CorrelationId,
    armed: bool,
}

impl CancelOnDrop<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed && self.pending.cancel(self.correlation_id) {
            debug!(
                correlation_id = %self.correlation_id,
                "Caller dropped command before completion"
            );
        }
    }
}

/// Forwards commands to attached Rhino clients and matches their responses.
pub struct CommandRelay {
    registry: ClientRegistry,
    pending: PendingRequestTable,
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl CommandRelay {
    /// Creates a relay with an empty registry.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        Self {
            registry: ClientRegistry::new(),
            pending: PendingRequestTable::new(),
            transport,
            default_timeout,
        }
    }

    /// Deadline used when the caller does not pick one.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The client registry.
    #[must_use]
    pub const fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// The pending request table.
    #[must_use]
    pub const fn pending(&self) -> &PendingRequestTable {
        &self.pending
    }

    /// Records a client attach event.
    pub fn attach_client(&self, client: ClientId) -> bool {
        let name = client.to_string();
        let added = self.registry.attach(client);
        if added {
            info!(client = %name, attached = self.registry.len(), "Rhino client connected");
        } else {
            debug!(client = %name, "Rhino client already attached");
        }
        added
    }

    /// Records a client detach event. Detaching an unknown client is a no-op.
    pub fn detach_client(&self, client: &ClientId) -> bool {
        let removed = self.registry.detach(client);
        if removed {
            info!(client = %client, attached = self.registry.len(), "Rhino client disconnected");
        }
        removed
    }

    /// Snapshot of the attached clients.
    #[must_use]
    pub fn attached_clients(&self) -> Vec<ClientId> {
        self.registry.list_attached()
    }

    /// Sends a command to every attached client and waits for the first
    /// matching response.
    ///
    /// # Errors
    ///
    /// - [`RelayError::NoClientsConnected`] if the registry is empty
    /// - [`RelayError::DeliveryFailed`] if no client accepted the command
    /// - [`RelayError::RequestTimeout`] if nothing answered within `timeout`
    /// - [`RelayError::Remote`] if the client answered with an error
    /// - [`RelayError::Cancelled`] if the entry was cancelled externally
    pub async fn send_command(
        &self,
        function: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> RelayResult<Value> {
        let clients = self.registry.list_attached();
        if clients.is_empty() {
            warn!(function, "Command rejected: no Rhino clients connected");
            return Err(RelayError::NoClientsConnected);
        }

        let correlation_id = CorrelationId::new();
        let payload = CommandMessage::new(correlation_id, function, arguments).to_json();
        let mut handle = self.pending.register(correlation_id, function);
        let mut guard = CancelOnDrop {
            pending: &self.pending,
            correlation_id,
            armed: true,
        };

        let mut delivered = 0usize;
        for client in &clients {
            match self.transport.send(client, &payload).await {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    client = %client,
                    correlation_id = %correlation_id,
                    error = %e,
                    "Failed to deliver command to client"
                ),
            }
        }

        if delivered == 0 {
            guard.disarm();
            self.pending.cancel(correlation_id);
            return Err(RelayError::DeliveryFailed {
                attempted: clients.len(),
            });
        }

        debug!(
            correlation_id = %correlation_id,
            function,
            delivered,
            attempted = clients.len(),
            "Command sent"
        );

        let outcome = if let Ok(outcome) = tokio::time::timeout(timeout, &mut handle).await {
            outcome
        } else {
            // A response that beat the watchdog still wins.
            if self.pending.expire(correlation_id, timeout) == Resolution::Delivered {
                warn!(
                    correlation_id = %correlation_id,
                    function,
                    timeout_ms = timeout.as_millis(),
                    "Command timed out"
                );
            }
            handle.try_take().unwrap_or_else(|| {
                Err(RelayError::RequestTimeout {
                    correlation_id,
                    timeout,
                })
            })
        };

        guard.disarm();
        outcome
    }

    /// Handles one payload received from a client.
    ///
    /// Never fails: anything that does not resolve a pending command is
    /// logged and discarded.
    pub fn handle_inbound_message(&self, client: &ClientId, raw: &str) -> InboundDisposition {
        let reply = match parse_reply(raw) {
            Ok(reply) => reply,
            Err(reason) => {
                warn!(client = %client, reason = %reason, "Discarding malformed client payload");
                return InboundDisposition::Malformed(reason);
            }
        };

        let (correlation_id, resolution, success) = match reply {
            ClientReply::Result {
                correlation_id,
                value,
            } => (
                correlation_id,
                self.pending.resolve(correlation_id, value),
                true,
            ),
            ClientReply::Error {
                correlation_id,
                message,
            } => (
                correlation_id,
                self.pending.fail(correlation_id, message),
                false,
            ),
            ClientReply::OutOfBand => {
                debug!(client = %client, "Discarding out-of-band client message");
                return InboundDisposition::Unmatched;
            }
        };

        match resolution {
            Resolution::Delivered if success => InboundDisposition::Resolved,
            Resolution::Delivered => InboundDisposition::Failed,
            Resolution::Abandoned => InboundDisposition::Abandoned,
            Resolution::Duplicate => InboundDisposition::Duplicate,
            Resolution::Unknown => {
                info!(
                    client = %client,
                    correlation_id = %correlation_id,
                    "Discarding response for unknown request"
                );
                InboundDisposition::Unmatched
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::relay::message::CommandMessage;
    use crate::transport::{ChannelTransport, Outbound};

    fn relay() -> (Arc<CommandRelay>, Arc<ChannelTransport>, mpsc::UnboundedReceiver<Outbound>) {
        let (transport, rx) = ChannelTransport::new();
        let transport = Arc::new(transport);
        let relay = Arc::new(CommandRelay::new(
            transport.clone(),
            Duration::from_secs(30),
        ));
        (relay, transport, rx)
    }

    fn correlation_of(outbound: &Outbound) -> CorrelationId {
        let msg: CommandMessage = serde_json::from_str(&outbound.payload).unwrap();
        msg.correlation_id()
    }

    #[tokio::test]
    async fn empty_registry_fails_without_registering() {
        let (relay, _transport, mut rx) = relay();

        let result = relay
            .send_command("getLayers", Map::new(), Duration::from_secs(5))
            .await;

        assert_eq!(result, Err(RelayError::NoClientsConnected));
        assert!(relay.pending().is_empty());
        assert_eq!(relay.pending().stats().snapshot().registered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn result_is_returned_to_caller() {
        let (relay, _transport, mut rx) = relay();
        relay.attach_client(ClientId::from("clientA"));

        let responder = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                let outbound = rx.recv().await.unwrap();
                let id = correlation_of(&outbound);
                let reply = json!({"correlationId": id, "result": ["Layer0", "Layer1"]});
                relay.handle_inbound_message(&outbound.client, &reply.to_string())
            })
        };

        let result = relay
            .send_command("getLayers", Map::new(), Duration::from_secs(5))
            .await;

        assert_eq!(result, Ok(json!(["Layer0", "Layer1"])));
        assert_eq!(responder.await.unwrap(), InboundDisposition::Resolved);
        assert!(relay.pending().is_empty());
    }

    #[tokio::test]
    async fn client_error_is_returned_to_caller() {
        let (relay, _transport, mut rx) = relay();
        relay.attach_client(ClientId::from("clientA"));

        let responder = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                let outbound = rx.recv().await.unwrap();
                let id = correlation_of(&outbound);
                let reply = json!({"correlationId": id, "error": "Unknown function: frobnicate"});
                relay.handle_inbound_message(&outbound.client, &reply.to_string())
            })
        };

        let result = relay
            .send_command("frobnicate", Map::new(), Duration::from_secs(5))
            .await;

        assert_eq!(
            result,
            Err(RelayError::remote("Unknown function: frobnicate"))
        );
        assert_eq!(responder.await.unwrap(), InboundDisposition::Failed);
        assert!(relay.pending().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_expires_entry() {
        let (relay, _transport, _rx) = relay();
        relay.attach_client(ClientId::from("clientA"));

        let result = relay
            .send_command("getLayers", Map::new(), Duration::from_secs(1))
            .await;

        assert!(matches!(result, Err(RelayError::RequestTimeout { timeout, .. }) if timeout == Duration::from_secs(1)));
        assert!(relay.pending().is_empty());
        assert_eq!(relay.pending().stats().snapshot().timed_out, 1);
    }

    #[tokio::test]
    async fn partial_delivery_failure_still_succeeds() {
        let (relay, transport, mut rx) = relay();
        let broken = ClientId::from("broken");
        relay.attach_client(broken.clone());
        relay.attach_client(ClientId::from("healthy"));
        transport.set_reachable(&broken, false);

        let responder = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                let outbound = rx.recv().await.unwrap();
                assert_eq!(outbound.client, ClientId::from("healthy"));
                let id = correlation_of(&outbound);
                let reply = json!({"correlationId": id, "result": true});
                relay.handle_inbound_message(&outbound.client, &reply.to_string());
            })
        };

        let result = relay
            .send_command("getDocumentInfo", Map::new(), Duration::from_secs(5))
            .await;

        assert_eq!(result, Ok(json!(true)));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn total_delivery_failure_leaves_no_waiter() {
        let (relay, transport, _rx) = relay();
        for name in ["a", "b"] {
            let client = ClientId::from(name);
            transport.set_reachable(&client, false);
            relay.attach_client(client);
        }

        let result = relay
            .send_command("getLayers", Map::new(), Duration::from_secs(5))
            .await;

        assert_eq!(result, Err(RelayError::DeliveryFailed { attempted: 2 }));
        assert!(relay.pending().is_empty());
    }

    #[tokio::test]
    async fn fan_out_reaches_every_client_and_first_answer_wins() {
        let (relay, _transport, mut rx) = relay();
        relay.attach_client(ClientId::from("a"));
        relay.attach_client(ClientId::from("b"));

        let responder = {
            let relay = Arc::clone(&relay);
            tokio::spawn(async move {
                let first = rx.recv().await.unwrap();
                let second = rx.recv().await.unwrap();
                let id = correlation_of(&first);
                assert_eq!(correlation_of(&second), id);

                let from_b = json!({"correlationId": id, "result": "b"}).to_string();
                let from_a = json!({"correlationId": id, "result": "a"}).to_string();
                (
                    relay.handle_inbound_message(&second.client, &from_b),
                    relay.handle_inbound_message(&first.client, &from_a),
                )
            })
        };

        let result = relay
            .send_command("getLayers", Map::new(), Duration::from_secs(5))
            .await;

        assert_eq!(result, Ok(json!("b")));
        assert_eq!(
            responder.await.unwrap(),
            (InboundDisposition::Resolved, InboundDisposition::Duplicate)
        );
        assert_eq!(relay.pending().stats().snapshot().duplicates, 1);
    }

    #[tokio::test]
    async fn unmatched_and_malformed_payloads_are_discarded() {
        let (relay, _transport, _rx) = relay();
        let client = ClientId::from("clientA");

        assert_eq!(
            relay.handle_inbound_message(&client, r#"{"status":"ready"}"#),
            InboundDisposition::Unmatched
        );
        let stray = json!({"correlationId": CorrelationId::new(), "result": 1});
        assert_eq!(
            relay.handle_inbound_message(&client, &stray.to_string()),
            InboundDisposition::Unmatched
        );
        assert_eq!(
            relay.handle_inbound_message(&client, "{{{"),
            InboundDisposition::Malformed(MalformedResponse::InvalidJson)
        );
    }

    #[test]
    fn detach_of_unknown_client_is_noop() {
        let (relay, _transport, _rx) = relay();
        assert!(!relay.detach_client(&ClientId::from("ghost")));
        assert!(relay.attach_client(ClientId::from("clientA")));
        assert!(relay.detach_client(&ClientId::from("clientA")));
        assert!(relay.attached_clients().is_empty());
    }
}
