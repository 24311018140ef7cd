//! castbridge: cross-context publish session orchestration
//!
//! Coordinates live publish sessions whose capture runs in isolated
//! execution contexts (pages, a capture worker) that share no memory with
//! the orchestrator. The crate provides:
//!
//! - a correlated request/response channel with per-operation deadlines
//! - capture source bridges that run inside the contexts
//! - a session registry that admits at most one session per capture target
//! - a lifecycle monitor that reconciles sessions with context teardown
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use castbridge::loopback::{spawn_page_bridge, LoopbackCapture, LoopbackTransport};
//! use castbridge::{ContextRef, Orchestrator, OrchestratorConfig, PublishSettings, SessionKey};
//!
//! # async fn example() -> castbridge::Result<()> {
//! let orchestrator = Arc::new(Orchestrator::new(OrchestratorConfig::default()));
//! orchestrator.spawn_background();
//!
//! let source = Arc::new(LoopbackCapture::new());
//! source.add_element("video-0", LoopbackCapture::playing_video());
//! let transport = Arc::new(LoopbackTransport::new());
//!
//! let page = ContextRef::new(1);
//! spawn_page_bridge(orchestrator.attach_page(page), source, transport);
//!
//! let started = orchestrator
//!     .start_publish(
//!         &SessionKey::element("video-0"),
//!         page,
//!         PublishSettings::default().room_id("r1"),
//!         "My video".into(),
//!     )
//!     .await?;
//! for link in &started.links {
//!     println!("{}: {}", link.label, link.url);
//! }
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod channel;
pub mod context;
pub mod error;
pub mod lifecycle;
pub mod loopback;
pub mod media;
pub mod orchestrator;
pub mod registry;
pub mod session;

pub use bridge::{BridgeConfig, CaptureBridge, CaptureSource, CaptureTarget, PublishingTransport};
pub use channel::{BridgeReply, BridgeRequest, ChannelConfig, CorrelatedChannel};
pub use context::{BridgePort, ContextDirectory, ContextKind, ContextRef, WorkerLauncher};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleMonitor, LifecycleSignal};
pub use orchestrator::{Command, CommandClient, CommandReply, Orchestrator, OrchestratorConfig, OrchestratorService};
pub use registry::{LinkConfig, RegistryConfig, Session, SessionKey, SessionKind, SessionRegistry, SessionSummary, ViewerLink};
pub use session::{PublishSettings, QualitySettings};
