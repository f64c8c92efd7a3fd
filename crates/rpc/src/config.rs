//! Client and server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration for RPC clients.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a call waits for its reply, in milliseconds.
    pub call_timeout_ms: u64,

    /// How long an availability probe waits, in milliseconds.
    pub probe_timeout_ms: u64,
}

impl ClientConfig {
    /// Call timeout as a [`Duration`].
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Probe timeout as a [`Duration`].
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            probe_timeout_ms: 5_000,
        }
    }
}

/// Configuration for RPC servers.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Maximum concurrent connections of a persistent server.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
        }
    }
}

/// Combined configuration, as loaded from a TOML file.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Client settings.
    pub client: ClientConfig,

    /// Server settings.
    pub server: ServerConfig,
}

impl RpcConfig {
    /// Parses a configuration from TOML. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the document is not valid TOML or
    /// a field has the wrong type.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RpcConfig::default();
        assert_eq!(config.client.call_timeout(), Duration::from_secs(30));
        assert_eq!(config.client.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.server.max_connections, 100);
    }

    #[test]
    fn test_partial_toml() {
        let config = RpcConfig::from_toml_str(
            r"
            [client]
            call_timeout_ms = 250
            ",
        )
        .unwrap();

        assert_eq!(config.client.call_timeout(), Duration::from_millis(250));
        assert_eq!(config.client.probe_timeout_ms, 5_000);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn test_empty_toml() {
        assert_eq!(RpcConfig::from_toml_str("").unwrap(), RpcConfig::default());
    }

    #[test]
    fn test_invalid_toml() {
        let result = RpcConfig::from_toml_str("[client]\ncall_timeout_ms = \"soon\"");
        assert!(matches!(result, Err(crate::Error::Config(_))));
    }
}
