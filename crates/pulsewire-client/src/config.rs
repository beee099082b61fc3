//! Client configuration.

use crate::error::ConfigError;
use pulsewire_core::{ReconnectPolicy, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the default endpoint.
pub const URL_ENV: &str = "PULSEWIRE_WS_URL";

/// Endpoint used when neither config nor environment name one.
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws";

/// Settings consumed when a client is spawned. Every field has a default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub url: String,
    /// Connect as soon as the client is spawned.
    pub auto_connect: bool,
    /// Delay before the first retry; later retries double it.
    pub reconnect_interval_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// Consecutive failures tolerated before giving up.
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            url: default_url(),
            auto_connect: true,
            reconnect_interval_ms: policy.base_delay.as_millis() as u64,
            max_reconnect_delay_ms: policy.max_delay.as_millis() as u64,
            max_reconnect_attempts: policy.max_attempts,
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// `PULSEWIRE_WS_URL` if set and non-empty, else [`DEFAULT_URL`].
pub fn default_url() -> String {
    std::env::var(URL_ENV)
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_URL.to_string())
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect_interval_ms),
            max_delay: Duration::from_millis(self.max_reconnect_delay_ms),
            max_attempts: self.max_reconnect_attempts,
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            url: self.url.clone(),
            reconnect: self.reconnect_policy(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms.max(1)),
        }
    }
}
