//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Command relay settings.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Direct TCP bridge settings.
    #[serde(default)]
    pub tcp: TcpConfig,

    /// HTTP status surface settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Connection code settings.
    #[serde(default)]
    pub codes: CodesConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.default_timeout_secs == 0 {
            return Err(invalid("relay.default_timeout_secs must be greater than 0"));
        }

        if self.codes.window_hours == 0 {
            return Err(invalid("codes.window_hours must be greater than 0"));
        }

        validate_host("tcp.host", &self.tcp.host)?;

        if self.tcp.mode == TcpMode::Connect && self.tcp.reconnect_ms == 0 {
            return Err(invalid("tcp.reconnect_ms must be greater than 0"));
        }

        if self.http.enabled {
            validate_host("http.host", &self.http.host)?;
            if self.tcp.mode == TcpMode::Listen
                && self.http.port != 0
                && self.http.port == self.tcp.port
                && self.http.host == self.tcp.host
            {
                return Err(invalid(format!(
                    "http.port and tcp.port both use {}:{}",
                    self.tcp.host, self.tcp.port
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        message: message.into(),
    }
}

fn validate_host(field: &str, host: &str) -> Result<(), ConfigError> {
    if host == "localhost" || host.parse::<IpAddr>().is_ok() {
        Ok(())
    } else {
        Err(invalid(format!(
            "Invalid {field} '{host}'. Must be an IP address or 'localhost'"
        )))
    }
}

/// Command relay configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Seconds to wait for a Rhino client to answer a command.
    /// Default: 30
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl RelayConfig {
    /// The response timeout as a [`Duration`].
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

const fn default_timeout_secs() -> u64 {
    30
}

/// Which side of the TCP link opens the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    /// Dial the plug-in's listener at `host:port`.
    #[default]
    Connect,
    /// Listen on `host:port` for plug-ins that dial in.
    Listen,
}

/// Direct TCP link configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TcpConfig {
    /// Dial out to the plug-in or accept plug-in connections.
    /// Default: connect
    #[serde(default)]
    pub mode: TcpMode,

    /// Plug-in address (connect) or interface to listen on (listen).
    #[serde(default = "default_host")]
    pub host: String,

    /// Plug-in port (connect) or port to listen on (listen).
    #[serde(default = "default_tcp_port")]
    pub port: u16,

    /// Milliseconds between attempts to reach the plug-in in connect mode.
    /// Default: 2000
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
}

impl TcpConfig {
    /// The `host:port` string to bind or dial.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The redial delay as a [`Duration`].
    #[must_use]
    pub const fn reconnect(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mode: TcpMode::default(),
            host: default_host(),
            port: default_tcp_port(),
            reconnect_ms: default_reconnect_ms(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn default_reconnect_ms() -> u64 {
    crate::transport::tcp::DEFAULT_RECONNECT.as_millis() as u64
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_tcp_port() -> u16 {
    crate::transport::tcp::DEFAULT_PORT
}

/// HTTP status surface configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Serve `/codes`, `/codes-page` and `/status`.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Interface to listen on.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl HttpConfig {
    /// The `host:port` string to bind.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            host: default_host(),
            port: default_http_port(),
        }
    }
}

const fn default_http_port() -> u16 {
    8080
}

const fn default_true() -> bool {
    true
}

/// Connection code configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodesConfig {
    /// JSON file maintained by an external code registry.
    ///
    /// When unset, codes are kept in memory by this process.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Look-back window for active codes, in hours.
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,

    /// Issue and log a code for the TCP endpoint at startup.
    /// Ignored when `file` is set.
    #[serde(default = "default_true")]
    pub announce: bool,
}

impl CodesConfig {
    /// The look-back window as a [`chrono::Duration`].
    #[must_use]
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window_hours))
    }
}

impl Default for CodesConfig {
    fn default() -> Self {
        Self {
            file: None,
            window_hours: default_window_hours(),
            announce: default_true(),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
const fn default_window_hours() -> u32 {
    crate::codes::DEFAULT_WINDOW_HOURS as u32
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.tcp.port, 1999);
        assert_eq!(config.tcp.mode, TcpMode::Connect);
        assert_eq!(config.tcp.reconnect(), Duration::from_secs(2));
        assert_eq!(config.relay.default_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "relay": { "default_timeout_secs": 5 },
            "tcp": { "mode": "listen", "host": "0.0.0.0", "port": 2000, "reconnect_ms": 500 },
            "http": { "enabled": false, "host": "localhost", "port": 9000 },
            "codes": {
                "file": "/var/lib/rhino/codes.json",
                "window_hours": 48,
                "announce": false
            },
            "logging": { "level": "debug" }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.relay.default_timeout_secs, 5);
        assert_eq!(config.tcp.mode, TcpMode::Listen);
        assert_eq!(config.tcp.addr(), "0.0.0.0:2000");
        assert_eq!(config.tcp.reconnect_ms, 500);
        assert!(!config.http.enabled);
        assert_eq!(config.http.bind_addr(), "localhost:9000");
        assert_eq!(
            config.codes.file,
            Some(PathBuf::from("/var/lib/rhino/codes.json"))
        );
        assert_eq!(config.codes.window(), chrono::Duration::hours(48));
        assert!(!config.codes.announce);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn http_config_defaults() {
        let config = HttpConfig::default();
        assert!(config.enabled);
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn codes_config_defaults() {
        let config = CodesConfig::default();
        assert!(config.file.is_none());
        assert_eq!(config.window_hours, 24);
        assert!(config.announce);
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_zero_timeout() {
        let json = r#"{ "relay": { "default_timeout_secs": 0 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_window() {
        let json = r#"{ "codes": { "window_hours": 0 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_invalid_host() {
        let json = r#"{ "tcp": { "host": "not a host" } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tcp.host"));
    }

    #[test]
    fn reject_port_clash() {
        let json = r#"{ "tcp": { "mode": "listen", "port": 8080 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{ "tcp": { "mode": "listen", "port": 8080 }, "http": { "enabled": false } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());

        // Dialing a plug-in on 8080 does not occupy the local port.
        let json = r#"{ "tcp": { "port": 8080 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reject_zero_reconnect_delay() {
        let json = r#"{ "tcp": { "reconnect_ms": 0 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());

        let json = r#"{ "tcp": { "mode": "listen", "reconnect_ms": 0 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn reject_unknown_tcp_mode() {
        let json = r#"{ "tcp": { "mode": "both" } }"#;
        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
