//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/livebridge/config.toml` by default. Every field is optional;
//! missing port-file paths fall back to the ones the bridge uses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use livebridge_protocol::chunking::DEFAULT_MAX_DATAGRAM_SIZE;
use livebridge_server::{CLIENT_PORT_FILE, SERVER_PORT_FILE, default_port_file};

use crate::error::{ClientError, ClientResult};

/// Configuration for the livebridge client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Debug mode.
    pub debug: bool,

    /// Bridge connection settings.
    #[serde(default)]
    pub bridge: BridgeSettings,
}

/// How to reach the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    /// Host the bridge listens on.
    pub host: String,

    /// File the bridge writes its port to.
    pub server_port_file: Option<PathBuf>,

    /// File this client writes its port to.
    pub client_port_file: Option<PathBuf>,

    /// Request timeout in seconds.
    pub timeout: u64,

    /// Largest datagram to send.
    pub max_datagram_size: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            server_port_file: None,
            client_port_file: None,
            timeout: 5,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }
}

impl BridgeSettings {
    /// Returns the bridge's port file.
    pub fn server_port_file(&self) -> PathBuf {
        self.server_port_file
            .clone()
            .unwrap_or_else(|| default_port_file(SERVER_PORT_FILE))
    }

    /// Returns this client's port file.
    pub fn client_port_file(&self) -> PathBuf {
        self.client_port_file
            .clone()
            .unwrap_or_else(|| default_port_file(CLIENT_PORT_FILE))
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("livebridge")
    }
}
