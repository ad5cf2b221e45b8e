//! MCP server lifecycle and request dispatch.
//!
//! 1. **Initialisation**: `initialize` then `notifications/initialized`
//! 2. **Operation**: `tools/list`, `tools/call` and `ping`
//! 3. **Shutdown**: input EOF or a termination signal
//!
//! Requests are handled one at a time. A `tools/call` blocks the loop until
//! the relay returns, which matches how MCP clients drive a stdio server.

use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};
use tracing::{debug, info, warn};

use crate::mcp::protocol::{
    parse_message, ErrorCode, IncomingMessage, JsonRpcError, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION, SERVER_NAME,
};
use crate::mcp::tools::{find_tool, ToolCallParams, ToolCallResult, ToolDefinition, RHINO_TOOLS};
use crate::relay::CommandRelay;
use crate::transport::framing::{LineReader, LineWriter};

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

#[derive(Debug, Serialize)]
struct ServerInfo {
    name: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    protocol_version: String,
    #[serde(default)]
    client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct ClientInfo {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

/// MCP front end forwarding tool calls to Rhino through a [`CommandRelay`].
pub struct McpServer<R, W> {
    state: ServerState,
    reader: LineReader<R>,
    writer: LineWriter<W>,
    relay: Arc<CommandRelay>,
}

impl McpServer<Stdin, Stdout> {
    /// Creates a server on the process's stdin and stdout.
    #[must_use]
    pub fn stdio(relay: Arc<CommandRelay>) -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout(), relay)
    }
}

impl<R, W> McpServer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a server over an arbitrary byte stream pair.
    pub fn new(reader: R, writer: W, relay: Arc<CommandRelay>) -> Self {
        Self {
            state: ServerState::AwaitingInit,
            reader: LineReader::new(reader),
            writer: LineWriter::new(writer),
            relay,
        }
    }

    /// Returns the current server state.
    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Serves requests until EOF or a termination signal.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the channel fails.
    #[cfg(unix)]
    pub async fn run(&mut self) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }

                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }

                line = self.reader.read_line() => {
                    if self.handle_read(line).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Serves requests until EOF or Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the channel fails.
    #[cfg(windows)]
    pub async fn run(&mut self) -> io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                    self.state = ServerState::ShuttingDown;
                    return Ok(());
                }

                line = self.reader.read_line() => {
                    if self.handle_read(line).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Serves requests until EOF, ignoring signals.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing the channel fails.
    pub async fn serve(&mut self) -> io::Result<()> {
        loop {
            let line = self.reader.read_line().await;
            if self.handle_read(line).await? {
                return Ok(());
            }
        }
    }

    /// Returns `true` once the server should stop.
    async fn handle_read(&mut self, line: io::Result<Option<String>>) -> io::Result<bool> {
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("MCP input closed");
                self.state = ServerState::ShuttingDown;
                return Ok(true);
            }
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(error = %e, "Discarding unreadable MCP input line");
                self.writer.write_json(&JsonRpcError::parse_error()).await?;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !line.trim().is_empty() {
            match parse_message(&line) {
                Ok(IncomingMessage::Request(req)) => self.handle_request(req).await?,
                Ok(IncomingMessage::Notification(notif)) => self.handle_notification(&notif),
                Err(error) => self.writer.write_json(&error).await?,
            }
        }

        Ok(self.state == ServerState::ShuttingDown)
    }

    async fn handle_request(&mut self, req: JsonRpcRequest) -> io::Result<()> {
        let reply = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "tools/list" => self.handle_tools_list(&req),
            "tools/call" => self.handle_tools_call(&req).await,
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        match reply {
            Ok(response) => self.writer.write_json(&response).await,
            Err(error) => self.writer.write_json(&error).await,
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        if notif.method == "notifications/initialized" && self.state == ServerState::Initialising {
            self.state = ServerState::Running;
            info!("MCP session ready");
        }
    }

    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::new(
                Some(req.id.clone()),
                ErrorCode::InvalidRequest,
                "Server already initialised",
            ));
        }

        let params: InitializeParams = parse_params(req, "initialize")?;
        if let Some(client) = &params.client_info {
            info!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                requested = %params.protocol_version,
                "MCP client initialising"
            );
        }

        self.state = ServerState::Initialising;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": ServerInfo {
                    name: SERVER_NAME,
                    version: env!("CARGO_PKG_VERSION"),
                },
            }),
        ))
    }

    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        let tools: Vec<ToolDefinition> = RHINO_TOOLS.iter().map(|t| t.definition()).collect();
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "tools": tools }),
        ))
    }

    async fn handle_tools_call(
        &self,
        req: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;

        let params: ToolCallParams = parse_params(req, "tool call")?;
        let arguments = match params.arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(JsonRpcError::invalid_params(
                    req.id.clone(),
                    "Tool arguments must be an object",
                ))
            }
        };

        let result = match find_tool(&params.name) {
            None => ToolCallResult::error(format!("Unknown tool: {}", params.name)),
            Some(tool) => {
                let timeout = self.relay.default_timeout();
                match self.relay.send_command(tool.function, arguments, timeout).await {
                    Ok(value) => ToolCallResult::from_value(&value),
                    Err(e) => {
                        warn!(tool = tool.name, error = %e, "Tool call failed");
                        ToolCallResult::error(e.to_string())
                    }
                }
            }
        };

        let value = serde_json::to_value(&result).map_err(|e| {
            JsonRpcError::internal_error(req.id.clone(), format!("Failed to encode result: {e}"))
        })?;
        Ok(JsonRpcResponse::success(req.id.clone(), value))
    }

    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state == ServerState::Running {
            Ok(())
        } else {
            Err(JsonRpcError::new(
                Some(id.clone()),
                ErrorCode::InvalidRequest,
                "Server not initialised",
            ))
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    req: &JsonRpcRequest,
    what: &str,
) -> Result<T, JsonRpcError> {
    let params = req.params.clone().ok_or_else(|| {
        JsonRpcError::invalid_params(req.id.clone(), format!("Missing {what} params"))
    })?;
    serde_json::from_value(params).map_err(|e| {
        JsonRpcError::invalid_params(req.id.clone(), format!("Invalid {what} params: {e}"))
    })
}
