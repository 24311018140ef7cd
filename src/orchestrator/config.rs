//! Orchestrator configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::channel::ChannelConfig;
use crate::registry::RegistryConfig;

/// Orchestrator configuration options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Correlated request deadlines
    pub channel: ChannelConfig,

    /// Registry and link settings
    pub registry: RegistryConfig,

    /// Signalling server for sessions whose settings name none
    pub default_server: String,

    /// How long to wait for a page context to report ready before sending
    /// anyway
    pub readiness_timeout: Duration,

    /// How long a freshly launched capture worker has to report ready
    pub worker_launch_timeout: Duration,

    /// Title for tab captures started without one
    pub default_tab_title: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            registry: RegistryConfig::default(),
            default_server: "vdo.ninja".to_string(),
            readiness_timeout: Duration::from_secs(5),
            worker_launch_timeout: Duration::from_secs(5),
            default_tab_title: "Tab Capture".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Set the channel configuration
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Set the registry configuration
    pub fn registry(mut self, registry: RegistryConfig) -> Self {
        self.registry = registry;
        self
    }

    /// Set the default server
    pub fn default_server(mut self, server: impl Into<String>) -> Self {
        self.default_server = server.into();
        self
    }

    /// Set the readiness timeout
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.readiness_timeout = timeout;
        self
    }

    /// Set the worker launch timeout
    pub fn worker_launch_timeout(mut self, timeout: Duration) -> Self {
        self.worker_launch_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = serde_json::json!({
            "default_server": "wss://signal.example",
            "channel": { "stop_timeout": { "secs": 1, "nanos": 0 } }
        });

        let config: OrchestratorConfig = serde_json::from_value(json).unwrap();

        assert_eq!(config.default_server, "wss://signal.example");
        assert_eq!(config.channel.stop_timeout, Duration::from_secs(1));
        assert_eq!(config.channel.publish_timeout, Duration::from_secs(10));
        assert_eq!(config.readiness_timeout, Duration::from_secs(5));
        assert_eq!(config.registry.reconcile_interval, Duration::from_secs(30));
    }
}
