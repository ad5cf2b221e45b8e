//! rhino-mcp-relay: routes MCP tool calls to Rhino plug-in instances.
//!
//! An AI assistant speaks MCP on stdio; Rhino plug-ins attach over TCP. The
//! relay broadcasts each command to every attached plug-in, tags it with a
//! correlation id and resolves the caller with the first matching answer.
//!
//! # Modules
//!
//! - [`relay`]: client registry, pending-request table and the command relay
//! - [`transport`]: outbound transports and the TCP connector and bridge
//! - [`mcp`]: MCP stdio front end
//! - [`codes`]: human-readable connection codes
//! - [`http`]: connection code and status routes
//! - [`config`]: configuration loading and validation
//! - [`error`]: configuration errors

pub mod codes;
pub mod config;
pub mod error;
pub mod http;
pub mod mcp;
pub mod relay;
pub mod transport;
