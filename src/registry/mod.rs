//! Session registry
//!
//! The registry is the one authoritative answer to "is this capture target
//! being published right now". It owns every [`Session`] and enforces that
//! each [`SessionKey`] has at most one live session.
//!
//! # Lifecycle
//!
//! ```text
//!            admit()                 start ok
//!   Absent ──────────► Starting ─────────────► Active
//!     ▲                   │                      │
//!     │    start failed   │                      │ begin_stop()
//!     ├───────────────────┘                      ▼
//!     └─────────────────────────────────────  Stopping
//!                ticket dropped
//! ```
//!
//! Callers that arrive while a key is Starting or Stopping wait for the
//! transition to settle instead of racing it.

pub mod config;
pub mod entry;
pub mod key;
pub mod links;
pub mod store;

pub use config::RegistryConfig;
pub use entry::{Session, SessionBuilder, SessionSummary};
pub use key::{SessionKey, SessionKind};
pub use links::{derive_links, LinkConfig, ViewerLink};
pub use store::{Admission, SessionRegistry, StopTicket};
