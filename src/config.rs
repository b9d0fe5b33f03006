//! Manager configuration loaded from YAML.
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Default JSON-RPC endpoint of the platform service host.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9998/jsonrpc";
/// Default callsign of the security manager plugin.
pub const DEFAULT_SECURITY_CALLSIGN: &str = "org.rdk.SecManager.1";
/// Default callsign of the watermark plugin.
pub const DEFAULT_WATERMARK_CALLSIGN: &str = "org.rdk.Watermark.1";

/// Tunables for [`SecManager`](crate::manager::SecManager) and the remote transport.
///
/// Every field has a default, so an empty YAML document is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client identifier sent with every remote call.
    pub client_id: String,
    /// Maximum open/update attempts per acquisition.
    pub max_attempts: u32,
    /// Backoff between attempts when the request does not carry its own.
    pub retry_delay_ms: u64,
    /// Timeout for a single remote call.
    pub call_timeout_ms: u64,
    /// Fixed aspect dimensions reported on open/update.
    pub aspect_width: u32,
    pub aspect_height: u32,
    /// JSON-RPC endpoint used by the remote transport.
    pub endpoint: String,
    pub security_callsign: String,
    pub watermark_callsign: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: "rssecmanager".to_string(),
            max_attempts: 2,
            retry_delay_ms: 500,
            call_timeout_ms: 10_000,
            aspect_width: 1920,
            aspect_height: 1080,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            security_callsign: DEFAULT_SECURITY_CALLSIGN.to_string(),
            watermark_callsign: DEFAULT_WATERMARK_CALLSIGN.to_string(),
        }
    }
}

impl Config {
    /// Load a config from a YAML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Parse a config from a YAML document.
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config =
            serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        if config.client_id.is_empty() {
            return Err(Error::Config("client_id must not be empty".to_string()));
        }
        Ok(config)
    }

    /// Attempt budget, never less than one.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}
