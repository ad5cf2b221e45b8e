//! Direct TCP links to Rhino plug-ins.
//!
//! Two ways to obtain a connection:
//!
//! - [`TcpConnector`] dials the plug-in's own listener (port 1999 by
//!   default) and redials after it goes away. Clients are named
//!   `rhino-<n>@<peer>`.
//! - [`TcpBridge`] accepts plug-ins that dial in. Clients are named
//!   `tcp-<n>@<peer>`.
//!
//! Either way inbound lines go straight to
//! [`CommandRelay::handle_inbound_message`] and outbound commands are queued
//! to a per-connection writer task so a slow socket never blocks the relay.
//! Lines that are not UTF-8 or are too long are logged and skipped. The
//! client is detached as soon as its read side reaches EOF or fails.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::relay::{ClientId, CommandRelay, TransportError};
use crate::transport::framing::{LineReader, LineWriter};
use crate::transport::Transport;

/// Default port of the direct TCP bridge.
pub const DEFAULT_PORT: u16 = 1999;

/// Outbound queues of the live TCP connections.
#[derive(Debug, Default)]
pub struct TcpClients {
    writers: Mutex<HashMap<ClientId, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl TcpClients {
    /// Creates an empty connection table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writers.lock().len()
    }

    /// Returns `true` if no connection is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writers.lock().is_empty()
    }

    fn register(
        &self,
        prefix: &str,
        peer: SocketAddr,
    ) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let client = ClientId::new(format!("{prefix}-{n}@{peer}"));
        let (tx, rx) = mpsc::unbounded_channel();
        self.writers.lock().insert(client.clone(), tx);
        (client, rx)
    }

    fn unregister(&self, client: &ClientId) {
        self.writers.lock().remove(client);
    }
}

#[async_trait]
impl Transport for TcpClients {
    async fn send(&self, client: &ClientId, payload: &str) -> Result<(), TransportError> {
        let writers = self.writers.lock();
        let tx = writers
            .get(client)
            .ok_or_else(|| TransportError::NotConnected {
                client: client.to_string(),
            })?;

        tx.send(payload.to_string())
            .map_err(|_| TransportError::ChannelClosed {
                client: client.to_string(),
            })
    }
}

/// Accept loop feeding TCP connections into a relay.
pub struct TcpBridge {
    listener: TcpListener,
    clients: Arc<TcpClients>,
    relay: Arc<CommandRelay>,
}

impl TcpBridge {
    /// Creates a bridge over a bound listener.
    ///
    /// `clients` must be the transport the relay was built with.
    #[must_use]
    pub const fn new(
        listener: TcpListener,
        clients: Arc<TcpClients>,
        relay: Arc<CommandRelay>,
    ) -> Self {
        Self {
            listener,
            clients,
            relay,
        }
    }

    /// The address the bridge listens on.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket address cannot be queried.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` completes.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(addr = ?self.listener.local_addr().ok(), "TCP bridge accepting Rhino clients");

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("TCP bridge shutting down");
                    return;
                }

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let (client, outbound) = self.clients.register("tcp", peer);
                        let clients = Arc::clone(&self.clients);
                        let relay = Arc::clone(&self.relay);
                        tokio::spawn(serve_connection(stream, client, outbound, clients, relay));
                    }
                    Err(e) => warn!(error = %e, "Failed to accept TCP connection"),
                },
            }
        }
    }
}

/// Default delay between attempts to reach the plug-in.
pub const DEFAULT_RECONNECT: Duration = Duration::from_secs(2);

/// Dials a Rhino plug-in listener and keeps one connection to it alive.
pub struct TcpConnector {
    addr: String,
    reconnect: Duration,
    clients: Arc<TcpClients>,
    relay: Arc<CommandRelay>,
}

impl TcpConnector {
    /// Creates a connector for the plug-in at `addr` (`host:port`).
    ///
    /// `clients` must be the transport the relay was built with.
    #[must_use]
    pub fn new(
        addr: impl Into<String>,
        reconnect: Duration,
        clients: Arc<TcpClients>,
        relay: Arc<CommandRelay>,
    ) -> Self {
        Self {
            addr: addr.into(),
            reconnect,
            clients,
            relay,
        }
    }

    /// Connects, serves the connection until it closes, waits `reconnect`
    /// and tries again, until `shutdown` completes.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        info!(addr = %self.addr, "Connecting to Rhino plug-in");
        let mut reported = false;

        loop {
            let connected = tokio::select! {
                () = &mut shutdown => break,
                connected = TcpStream::connect(&self.addr) => connected,
            };

            match connected.and_then(|stream| stream.peer_addr().map(|peer| (stream, peer))) {
                Ok((stream, peer)) => {
                    reported = false;
                    let (client, outbound) = self.clients.register("rhino", peer);
                    info!(client = %client, "Connected to Rhino plug-in");

                    let served = serve_connection(
                        stream,
                        client.clone(),
                        outbound,
                        Arc::clone(&self.clients),
                        Arc::clone(&self.relay),
                    );
                    tokio::select! {
                        () = &mut shutdown => {
                            self.clients.unregister(&client);
                            self.relay.detach_client(&client);
                            break;
                        }
                        () = served => info!(client = %client, "Rhino plug-in connection lost"),
                    }
                }
                Err(e) if !reported => {
                    warn!(addr = %self.addr, error = %e, "Rhino plug-in not reachable, retrying");
                    reported = true;
                }
                Err(e) => debug!(addr = %self.addr, error = %e, "Rhino plug-in still not reachable"),
            }

            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.reconnect) => {}
            }
        }

        info!("TCP connector shutting down");
    }
}

async fn serve_connection(
    stream: TcpStream,
    client: ClientId,
    outbound: mpsc::UnboundedReceiver<String>,
    clients: Arc<TcpClients>,
    relay: Arc<CommandRelay>,
) {
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(write_loop(client.clone(), write_half, outbound));
    relay.attach_client(client.clone());

    let mut reader = LineReader::new(read_half);
    loop {
        match reader.read_line().await {
            Ok(Some(line)) => {
                if !line.trim().is_empty() {
                    relay.handle_inbound_message(&client, &line);
                }
            }
            Ok(None) => {
                debug!(client = %client, "Connection closed by peer");
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(client = %client, error = %e, "Skipping unreadable line from client");
            }
            Err(e) => {
                warn!(client = %client, error = %e, "Read error on client connection");
                break;
            }
        }
    }

    // Dropping the queue ends the writer task.
    clients.unregister(&client);
    relay.detach_client(&client);
}

async fn write_loop(
    client: ClientId,
    write_half: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let mut writer = LineWriter::new(write_half);
    while let Some(payload) = outbound.recv().await {
        if let Err(e) = writer.write_line(&payload).await {
            warn!(client = %client, error = %e, "Write error on client connection");
            return;
        }
    }
}
