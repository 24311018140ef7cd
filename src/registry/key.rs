//! Session keys
//!
//! A session key names one capture target: an on-page media element, or a
//! whole tab. At most one live session exists per key.

use serde::{Deserialize, Serialize};

/// Kind of capture behind a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    /// An on-page media element, captured in its page context
    Video,
    /// A whole tab, captured in the worker context
    Tab,
}

/// Unique identifier for a capture target
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    /// Key for a media element, by its capture id
    pub fn element(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Key for a whole-tab capture
    pub fn tab(tab_id: u64) -> Self {
        Self(format!("tab-{}", tab_id))
    }

    /// Borrow the key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_key() {
        assert_eq!(SessionKey::tab(42).as_str(), "tab-42");
        assert_ne!(SessionKey::tab(42), SessionKey::element("42"));
    }

    #[test]
    fn test_transparent_serde() {
        let key = SessionKey::element("video-0-1700000000");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#""video-0-1700000000""#);
    }
}
