//! Channel configuration

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Class of correlated request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    /// Element capture + publish (multi-step negotiation)
    Publish,
    /// Stop / unpublish
    Stop,
    /// Best-effort still capture
    Thumbnail,
    /// Tab capture + publish in the worker
    TabCapture,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Publish => "publish request",
            Operation::Stop => "stop request",
            Operation::Thumbnail => "thumbnail request",
            Operation::TabCapture => "tab capture request",
        };
        f.write_str(name)
    }
}

/// Per-operation deadlines for correlated requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Publish start, dominated by negotiation latency
    pub publish_timeout: Duration,

    /// Stop/unpublish, kept short so the registry stays responsive
    pub stop_timeout: Duration,

    /// Thumbnail capture
    pub thumbnail_timeout: Duration,

    /// Tab capture start in the worker
    pub tab_capture_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            publish_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(5),
            thumbnail_timeout: Duration::from_secs(2),
            tab_capture_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelConfig {
    /// Deadline for an operation
    pub fn timeout_for(&self, operation: Operation) -> Duration {
        match operation {
            Operation::Publish => self.publish_timeout,
            Operation::Stop => self.stop_timeout,
            Operation::Thumbnail => self.thumbnail_timeout,
            Operation::TabCapture => self.tab_capture_timeout,
        }
    }

    /// Set the publish timeout
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the thumbnail timeout
    pub fn thumbnail_timeout(mut self, timeout: Duration) -> Self {
        self.thumbnail_timeout = timeout;
        self
    }

    /// Set the tab capture timeout
    pub fn tab_capture_timeout(mut self, timeout: Duration) -> Self {
        self.tab_capture_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeouts() {
        let config = ChannelConfig::default();

        assert_eq!(config.timeout_for(Operation::Publish), Duration::from_secs(10));
        assert_eq!(config.timeout_for(Operation::Stop), Duration::from_secs(5));
        assert_eq!(config.timeout_for(Operation::Thumbnail), Duration::from_secs(2));
        assert_eq!(config.timeout_for(Operation::TabCapture), Duration::from_secs(10));
    }

    #[test]
    fn test_builder_chaining() {
        let config = ChannelConfig::default()
            .publish_timeout(Duration::from_millis(300))
            .stop_timeout(Duration::from_millis(100));

        assert_eq!(config.publish_timeout, Duration::from_millis(300));
        assert_eq!(config.stop_timeout, Duration::from_millis(100));
        assert_eq!(config.thumbnail_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::Publish.to_string(), "publish request");
        assert_eq!(Operation::TabCapture.to_string(), "tab capture request");
    }
}
