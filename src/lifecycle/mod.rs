//! Lifecycle monitoring
//!
//! Contexts disappear without asking: tabs close, frames navigate, the
//! worker gets stopped, a publisher's connection drops. Each of those
//! arrives here as a [`LifecycleSignal`], and the [`LifecycleMonitor`] makes
//! the registry agree with reality again.

mod monitor;

use serde::{Deserialize, Serialize};

use crate::context::ContextRef;
use crate::registry::SessionKey;

pub use monitor::LifecycleMonitor;

/// Unsolicited event about a context or a publisher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LifecycleSignal {
    /// A context (and every frame it covers) is gone
    ContextTornDown { context: ContextRef },
    /// A bridge's publisher lost its connection on its own
    PublisherEnded {
        session_key: SessionKey,
        stream_id: String,
    },
}

impl LifecycleSignal {
    pub fn torn_down(context: ContextRef) -> Self {
        LifecycleSignal::ContextTornDown { context }
    }
}
