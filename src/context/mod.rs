//! Execution contexts
//!
//! An execution context is an isolated unit of running code: the orchestrator,
//! a page's script environment, or the dedicated capture worker. Contexts never
//! share memory; the orchestrator only holds a routing entry for each one in
//! the [`ContextDirectory`], and the context itself only holds the matching
//! [`BridgePort`].
//!
//! ```text
//!        Orchestrator                          Page / Worker task
//!   ┌──────────────────────┐               ┌──────────────────────┐
//!   │ ContextDirectory     │  RequestEnv   │ BridgePort           │
//!   │  ctx -> endpoint ────┼──────────────►│  mailbox             │
//!   │                      │               │                      │
//!   │ CorrelatedChannel ◄──┼───────────────┼─ replies             │
//!   │ LifecycleMonitor  ◄──┼───────────────┼─ signals             │
//!   │                   ◄──┼─── watch ─────┼─ ready               │
//!   └──────────────────────┘               └──────────────────────┘
//! ```

pub mod directory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use directory::{BridgePort, ContextDirectory, ContextEndpoint};

/// Context id reserved for the capture worker
pub const WORKER_CONTEXT_ID: u64 = 0;

/// Identifies an isolated execution context (a tab, optionally one frame in it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextRef {
    /// Top-level context (tab) id
    pub context_id: u64,
    /// Frame within the context, if the capture is bound to one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_context_id: Option<u64>,
}

impl ContextRef {
    /// Reference a whole top-level context
    pub fn new(context_id: u64) -> Self {
        Self {
            context_id,
            sub_context_id: None,
        }
    }

    /// Reference one frame inside a top-level context
    pub fn frame(context_id: u64, sub_context_id: u64) -> Self {
        Self {
            context_id,
            sub_context_id: Some(sub_context_id),
        }
    }

    /// The capture worker context
    pub fn worker() -> Self {
        Self::new(WORKER_CONTEXT_ID)
    }

    /// Whether this is the capture worker
    pub fn is_worker(&self) -> bool {
        self.context_id == WORKER_CONTEXT_ID
    }

    /// Whether tearing down `self` also tears down `other`
    ///
    /// A reference without a frame covers every frame of that context.
    pub fn covers(&self, other: &ContextRef) -> bool {
        match self.sub_context_id {
            None => self.context_id == other.context_id,
            Some(_) => self == other,
        }
    }
}

impl fmt::Display for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_worker() {
            return write!(f, "worker");
        }
        match self.sub_context_id {
            Some(frame) => write!(f, "ctx:{}/{}", self.context_id, frame),
            None => write!(f, "ctx:{}", self.context_id),
        }
    }
}

/// Kind of execution context behind an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    /// A page's script environment
    Page,
    /// The off-main capture worker
    Worker,
}

/// Creates the capture worker context on demand
///
/// The launcher receives the worker's freshly attached port and must start
/// whatever serves it (normally [`CaptureBridge::worker`](crate::bridge::CaptureBridge::worker)).
/// The orchestrator then waits for the port's readiness signal.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    /// Start serving the worker port
    async fn launch(&self, port: BridgePort) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers() {
        let tab = ContextRef::new(4);
        let frame = ContextRef::frame(4, 2);
        let other_frame = ContextRef::frame(4, 3);

        assert!(tab.covers(&frame));
        assert!(tab.covers(&tab));
        assert!(frame.covers(&frame));
        assert!(!frame.covers(&tab));
        assert!(!frame.covers(&other_frame));
        assert!(!ContextRef::new(5).covers(&frame));
    }

    #[test]
    fn test_display() {
        assert_eq!(ContextRef::new(3).to_string(), "ctx:3");
        assert_eq!(ContextRef::frame(3, 1).to_string(), "ctx:3/1");
        assert_eq!(ContextRef::worker().to_string(), "worker");
    }

    #[test]
    fn test_serde_omits_missing_frame() {
        let json = serde_json::to_value(ContextRef::new(9)).unwrap();
        assert_eq!(json, serde_json::json!({ "context_id": 9 }));

        let parsed: ContextRef = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, ContextRef::new(9));
    }
}
