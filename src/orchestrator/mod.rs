//! Session orchestrator
//!
//! The privileged context that owns the registry and drives every session.
//!
//! ```text
//!   Command ──► Orchestrator ──admit──► SessionRegistry
//!                   │
//!                   ├── CorrelatedChannel ──► page / worker bridges
//!                   │
//!                   └── LifecycleMonitor ◄── teardown / publisher-ended signals
//! ```

pub mod command;
pub mod config;
mod engine;
pub mod service;

pub use command::{AckReply, CheckReply, Command, CommandReply, StartReply, Started, ThumbnailReply};
pub use config::OrchestratorConfig;
pub use engine::Orchestrator;
pub use service::{CommandClient, OrchestratorService};
