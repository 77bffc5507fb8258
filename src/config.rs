//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables (`NETCONF_*`)
//! - CLI arguments (for the `netconfd` binary)

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NetconfError, Result};

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server (listener) configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Capability advertisement configuration
    #[serde(default)]
    pub capabilities: CapabilityConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| NetconfError::Config(format!("Failed to read config file: {e}")))?;

        toml::from_str(&content)
            .map_err(|e| NetconfError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("NETCONF_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("NETCONF_PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(val) = std::env::var("NETCONF_HELLO_TIMEOUT_SECS") {
            if let Ok(val) = val.parse() {
                config.server.hello_timeout_secs = val;
            }
        }
        if let Ok(val) = std::env::var("NETCONF_EXI") {
            config.capabilities.exi = matches!(val.as_str(), "1" | "true" | "yes");
        }

        config
    }
}

/// Server (listener) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Seconds allowed for the hello exchange before teardown
    pub hello_timeout_secs: u64,

    /// Maximum accepted chunk size in bytes (RFC 6242 framing)
    pub max_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2830,
            hello_timeout_secs: 30,
            max_chunk_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl ServerConfig {
    /// Get the full listen address
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Hello exchange deadline as a [`Duration`]
    pub fn hello_timeout(&self) -> Duration {
        Duration::from_secs(self.hello_timeout_secs)
    }
}

/// Capability advertisement configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Advertise chunked framing (base:1.1) in addition to base:1.0
    pub chunked_framing: bool,

    /// Advertise the EXI capability
    pub exi: bool,

    /// EXI compression level advertised when `exi` is set (0-9)
    pub exi_compression: u32,

    /// Extra capability URNs to advertise verbatim
    #[serde(default)]
    pub extra: Vec<String>,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            chunked_framing: true,
            exi: true,
            exi_compression: 6,
            extra: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen_addr(), "127.0.0.1:2830");
        assert!(config.capabilities.chunked_framing);
        assert!(config.capabilities.exi);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[server]
host = "0.0.0.0"
port = 830
hello_timeout_secs = 10
max_chunk_size = 65536

[capabilities]
chunked_framing = false
exi = false
exi_compression = 0
extra = ["urn:example:capability:custom:1.0"]
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.listen_addr(), "0.0.0.0:830");
        assert_eq!(config.server.hello_timeout(), Duration::from_secs(10));
        assert!(!config.capabilities.chunked_framing);
        assert_eq!(config.capabilities.extra.len(), 1);
    }

    #[test]
    fn test_from_file_missing() {
        let result = Config::from_file("/nonexistent/netconf.toml");
        assert!(matches!(result, Err(NetconfError::Config(_))));
    }
}
