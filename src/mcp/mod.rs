//! Model Context Protocol (MCP) front end.
//!
//! The MCP client (an AI assistant) talks JSON-RPC 2.0 over stdin/stdout.
//! Each `tools/call` becomes one [`CommandRelay::send_command`] and the
//! plug-in's answer becomes the tool result.
//!
//! ```text
//!  MCP client ──stdio──▶ McpServer ──send_command──▶ CommandRelay ──▶ Rhino
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05.
//!
//! [`CommandRelay::send_command`]: crate::relay::CommandRelay::send_command

pub mod protocol;
pub mod server;
pub mod tools;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::{McpServer, ServerState};
pub use tools::{find_tool, RhinoTool, RHINO_TOOLS};
