//! rhino-mcp-relay: MCP server relaying tool calls to Rhino plug-ins.
//!
//! Serves MCP on stdio, reaches Rhino plug-ins over TCP (dialing their
//! listener, or accepting their connections with `--listen`) and optionally
//! exposes connection code and status routes over HTTP.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use rhino_mcp_relay::codes::{ConnectionCodeDirectory, FileCodeStore, MemoryCodeStore};
use rhino_mcp_relay::config::{self, Config, TcpMode};
use rhino_mcp_relay::http::{self, HttpState};
use rhino_mcp_relay::mcp::McpServer;
use rhino_mcp_relay::relay::CommandRelay;
use rhino_mcp_relay::transport::tcp::{TcpBridge, TcpClients, TcpConnector};

/// How long background listeners get to stop after the MCP session ends.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// MCP server relaying tool calls to Rhino plug-in instances.
///
/// Rhino plug-ins are reached over TCP; every MCP tool call is broadcast to
/// the attached plug-ins and the first answer is returned to the assistant.
#[derive(Parser, Debug)]
#[command(name = "rhino-mcp-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,

    /// Rhino plug-in host (or interface to listen on with --listen)
    #[arg(long)]
    host: Option<String>,

    /// Rhino plug-in port (or port to listen on with --listen)
    #[arg(long)]
    port: Option<u16>,

    /// Accept plug-in connections instead of dialing the plug-in
    #[arg(long)]
    listen: bool,

    /// Port for the HTTP status routes
    #[arg(long)]
    http_port: Option<u16>,

    /// Disable the HTTP status routes
    #[arg(long)]
    no_http: bool,
}

impl Args {
    fn apply(&self, cfg: &mut Config) {
        if let Some(host) = &self.host {
            cfg.tcp.host.clone_from(host);
        }
        if let Some(port) = self.port {
            cfg.tcp.port = port;
        }
        if self.listen {
            cfg.tcp.mode = TcpMode::Listen;
        }
        if let Some(port) = self.http_port {
            cfg.http.port = port;
        }
        if self.no_http {
            cfg.http.enabled = false;
        }
    }
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber. stdout carries MCP, so logs go to stderr.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves once `shutdown` flips to `true` or its sender is gone.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

async fn run(cfg: Config) -> std::io::Result<()> {
    let clients = Arc::new(TcpClients::new());
    let relay = Arc::new(CommandRelay::new(
        Arc::clone(&clients) as _,
        cfg.relay.default_timeout(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = Vec::new();

    let tcp_addr = match cfg.tcp.mode {
        TcpMode::Connect => {
            let connector = TcpConnector::new(
                cfg.tcp.addr(),
                cfg.tcp.reconnect(),
                clients,
                Arc::clone(&relay),
            );
            background.push(tokio::spawn(
                connector.run(wait_for_shutdown(shutdown_rx.clone())),
            ));
            cfg.tcp.addr()
        }
        TcpMode::Listen => {
            let listener = TcpListener::bind(cfg.tcp.addr()).await?;
            let bridge = TcpBridge::new(listener, clients, Arc::clone(&relay));
            let local = bridge.local_addr()?;
            background.push(tokio::spawn(
                bridge.run(wait_for_shutdown(shutdown_rx.clone())),
            ));
            local.to_string()
        }
    };

    let directory = match &cfg.codes.file {
        Some(path) => {
            info!(path = %path.display(), "Reading connection codes from file");
            ConnectionCodeDirectory::new(Arc::new(FileCodeStore::new(path)), cfg.codes.window())
        }
        None => {
            let store = MemoryCodeStore::new();
            if cfg.codes.announce {
                match store.issue(&format!("tcp://{tcp_addr}")) {
                    Ok(record) => eprintln!(
                        "Rhino connection code: {} (tcp://{tcp_addr})",
                        record.code
                    ),
                    Err(e) => warn!(error = %e, "Could not issue a connection code"),
                }
            }
            ConnectionCodeDirectory::new(Arc::new(store), cfg.codes.window())
        }
    };

    if cfg.http.enabled {
        let http_listener = TcpListener::bind(cfg.http.bind_addr()).await?;
        let state = HttpState {
            directory: Arc::new(directory),
            relay: Arc::clone(&relay),
        };
        let shutdown = wait_for_shutdown(shutdown_rx.clone());
        background.push(tokio::spawn(async move {
            if let Err(e) = http::serve(http_listener, state, shutdown).await {
                error!(error = %e, "HTTP status surface failed");
            }
        }));
    }

    info!(tcp = %tcp_addr, "MCP server ready, waiting for client connection...");

    let result = McpServer::stdio(relay).run().await;

    let _ = shutdown_tx.send(true);
    for task in background {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            warn!("Background listener did not stop in time");
        }
    }

    result
}

/// Entry point for the rhino-mcp-relay server.
fn main() -> ExitCode {
    let args = Args::parse();

    let config_path = args.config.as_deref();
    let mut cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return ExitCode::FAILURE;
        }
    };

    args.apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::FAILURE;
    }

    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting rhino-mcp-relay"
    );

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg)) {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn cli_overrides_config() {
        let args = Args::parse_from([
            "rhino-mcp-relay",
            "--host",
            "0.0.0.0",
            "--port",
            "2001",
            "--listen",
            "--http-port",
            "9001",
            "--no-http",
        ]);
        let mut cfg = Config::default();
        args.apply(&mut cfg);

        assert_eq!(cfg.tcp.addr(), "0.0.0.0:2001");
        assert_eq!(cfg.tcp.mode, TcpMode::Listen);
        assert_eq!(cfg.http.port, 9001);
        assert!(!cfg.http.enabled);
    }

    #[test]
    fn log_level_precedence() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(2, false, "error"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "loud"), Level::WARN);
    }
}
