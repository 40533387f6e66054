//! Application configuration
//!
//! Loaded from JSON. All fields have defaults so a `Config::default()` server
//! binds an ephemeral TCP port and logs to stderr.

use crate::error::Result;
use serde::Deserialize;
use std::path::Path;

/// Application config passed to every registered service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logger: LoggerConfig,
}

/// Listener configuration: tcp host/port, or a unix socket path.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP bind host.
    pub addr: String,
    /// TCP bind port; 0 requests an ephemeral port.
    pub port: u16,
    /// Unix domain socket path. When set, it takes precedence over tcp.
    pub unix: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1".to_string(),
            port: 0,
            unix: None,
        }
    }
}

/// Logger sink configuration.
///
/// `output` is one of `stdout`, `stderr`, `null`/`nil`, or a filesystem path.
/// A relative path is treated as a directory and joined with
/// `<filename>.log`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub output: String,
    pub filename: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            output: "stderr".to_string(),
            filename: "server".to_string(),
        }
    }
}

impl Config {
    /// Parse a config from a JSON string.
    pub fn from_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_str(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_ephemeral_stderr() {
        let config = Config::default();
        assert_eq!(config.server.addr, "127.0.0.1");
        assert_eq!(config.server.port, 0);
        assert!(config.server.unix.is_none());
        assert_eq!(config.logger.output, "stderr");
    }

    #[test]
    fn parses_partial_json() {
        let config = Config::from_str(
            r#"{"server": {"port": 8080}, "logger": {"output": "null"}}"#,
        )
        .unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.addr, "127.0.0.1");
        assert_eq!(config.logger.output, "null");
    }

    #[test]
    fn parses_unix_listener() {
        let config =
            Config::from_str(r#"{"server": {"unix": "/tmp/gantry.sock"}}"#).unwrap();
        assert_eq!(config.server.unix.as_deref(), Some("/tmp/gantry.sock"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(Config::from_str("{not json").is_err());
    }
}
