//! Registry configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::links::LinkConfig;

/// Session registry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How viewer links are derived
    pub links: LinkConfig,

    /// Interval between reconciliation passes over live sessions
    pub reconcile_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            links: LinkConfig::default(),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Set the link configuration
    pub fn links(mut self, links: LinkConfig) -> Self {
        self.links = links;
        self
    }

    /// Set the reconciliation interval
    pub fn reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }
}
