//! Command relay between callers and attached Rhino clients.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        CommandRelay                          │
//! │                                                              │
//! │  send_command ──▶ PendingRequestTable ◀── handle_inbound     │
//! │       │                (oneshot per id)          ▲           │
//! │       ▼                                          │           │
//! │  ClientRegistry ──▶ Transport::send ──▶ clients ─┘           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commands fan out to every attached client; responses are matched by
//! correlation id only, so several commands may be in flight at once and
//! their responses may arrive in any order.

pub mod command;
pub mod error;
pub mod message;
pub mod pending;
pub mod registry;

pub use command::{CommandRelay, InboundDisposition};
pub use error::{MalformedResponse, RelayError, RelayResult, TransportError};
pub use message::{parse_reply, ClientReply, CommandMessage};
pub use pending::{
    CorrelationId, Outcome, PendingHandle, PendingRequestTable, PendingStatsSnapshot, Resolution,
};
pub use registry::{ClientId, ClientRegistry};
