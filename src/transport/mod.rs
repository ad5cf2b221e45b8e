//! Transports carrying commands between the relay and Rhino clients.
//!
//! A transport has two directions:
//!
//! - **Outbound**: the relay calls [`Transport::send`] for every attached
//!   client when a command is issued.
//! - **Inbound**: the transport pushes attach/detach events and every
//!   received payload into the [`CommandRelay`].
//!
//! # Implementations
//!
//! - [`tcp`]: the direct TCP bridge (newline-delimited JSON, default port 1999)
//! - [`ChannelTransport`]: hands payloads to an in-process channel
//!
//! [`CommandRelay`]: crate::relay::CommandRelay

pub mod framing;
pub mod tcp;

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::relay::{ClientId, TransportError};

/// Outbound primitive used by the relay.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Pushes one serialised payload to one client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be reached.
    async fn send(&self, client: &ClientId, payload: &str) -> Result<(), TransportError>;
}

/// A payload handed to a [`ChannelTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination client.
    pub client: ClientId,
    /// Serialised command.
    pub payload: String,
}

/// In-process transport that forwards every payload to an unbounded channel.
///
/// The receiving side plays the role of the remote clients and answers by
/// calling [`CommandRelay::handle_inbound_message`].
///
/// [`CommandRelay::handle_inbound_message`]: crate::relay::CommandRelay::handle_inbound_message
#[derive(Debug)]
pub struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    unreachable: Mutex<HashSet<ClientId>>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver its payloads arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let transport = Self {
            outbound,
            unreachable: Mutex::new(HashSet::new()),
        };
        (transport, rx)
    }

    /// Marks a client as (un)reachable; sends to unreachable clients fail.
    pub fn set_reachable(&self, client: &ClientId, reachable: bool) {
        let mut unreachable = self.unreachable.lock();
        if reachable {
            unreachable.remove(client);
        } else {
            unreachable.insert(client.clone());
        }
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, client: &ClientId, payload: &str) -> Result<(), TransportError> {
        if self.unreachable.lock().contains(client) {
            return Err(TransportError::NotConnected {
                client: client.to_string(),
            });
        }

        self.outbound
            .send(Outbound {
                client: client.clone(),
                payload: payload.to_string(),
            })
            .map_err(|_| TransportError::ChannelClosed {
                client: client.to_string(),
            })
    }
}
