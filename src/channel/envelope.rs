//! Wire envelopes
//!
//! Envelopes are the only things that cross a context boundary. Bodies are
//! plain JSON values so that neither side can hand the other a reference into
//! its own memory.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Token tying a reply to the request that caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Request travelling into a context
///
/// A request without a correlation id is fire-and-forget: the bridge acts on
/// it but emits no reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Correlation id, absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
    /// Serialized request
    pub body: Value,
}

impl RequestEnvelope {
    /// Build a correlated request
    pub fn correlated<T: Serialize>(correlation_id: CorrelationId, body: &T) -> Result<Self> {
        Ok(Self {
            correlation_id: Some(correlation_id),
            body: serde_json::to_value(body)?,
        })
    }

    /// Build a fire-and-forget notification
    pub fn notification<T: Serialize>(body: &T) -> Result<Self> {
        Ok(Self {
            correlation_id: None,
            body: serde_json::to_value(body)?,
        })
    }
}

/// Reply travelling back to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    /// Correlation id copied from the request
    pub correlation_id: CorrelationId,
    /// Serialized reply
    pub body: Value,
}

impl ReplyEnvelope {
    /// Encode a reply body
    pub fn encode<T: Serialize>(correlation_id: CorrelationId, body: &T) -> Result<Self> {
        Ok(Self {
            correlation_id,
            body: serde_json::to_value(body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_has_no_id() {
        let env = RequestEnvelope::notification(&serde_json::json!({"type": "stop"})).unwrap();
        let json = serde_json::to_value(&env).unwrap();

        assert!(json.get("correlation_id").is_none());
        assert_eq!(json["body"]["type"], "stop");
    }

    #[test]
    fn test_correlated_wire_format() {
        let env = RequestEnvelope::correlated(CorrelationId(42), &serde_json::json!({})).unwrap();
        let json = serde_json::to_string(&env).unwrap();

        assert_eq!(json, r#"{"correlation_id":42,"body":{}}"#);
    }
}
