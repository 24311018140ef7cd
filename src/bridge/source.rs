//! Collaborator interfaces consumed by the bridges
//!
//! A [`CaptureSource`] turns a capture target into media; a
//! [`PublishingTransport`] carries that media to the signalling server. The
//! bridges own neither: hosts plug in real implementations, tests plug in
//! [`loopback`](crate::loopback) ones.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::context::ContextRef;
use crate::error::Result;
use crate::media::{canvas_size, MediaHandle, MediaTrack};

/// What to capture
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CaptureTarget {
    /// An on-page media element, by its capture id
    Element { id: String },
    /// A whole tab
    Tab {
        tab: ContextRef,
        audio: bool,
        video: bool,
    },
}

impl CaptureTarget {
    pub fn element(id: impl Into<String>) -> Self {
        CaptureTarget::Element { id: id.into() }
    }
}

impl std::fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureTarget::Element { id } => write!(f, "element:{}", id),
            CaptureTarget::Tab { tab, .. } => write!(f, "tab:{}", tab),
        }
    }
}

/// What a capture source knows about a target before capturing it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetProbe {
    /// Intrinsic video size
    pub width: u32,
    pub height: u32,
    /// Laid-out size on the page
    pub layout_width: u32,
    pub layout_height: u32,
    /// Whether the target carries an audio track
    pub has_audio: bool,
    /// Whether the target supports native stream capture
    pub native_capture: bool,
}

impl TargetProbe {
    /// A target with no picture and no sound
    pub fn is_dead(&self) -> bool {
        self.width == 0 && self.height == 0 && !self.has_audio
    }

    /// Size of the synthetic canvas for this target
    pub fn canvas_size(&self) -> (u32, u32) {
        canvas_size(
            (self.width, self.height),
            (self.layout_width, self.layout_height),
        )
    }
}

/// Capture source provider
#[async_trait]
pub trait CaptureSource: Send + Sync + 'static {
    /// Inspect a target; fails if the target does not exist
    async fn probe(&self, target: &CaptureTarget) -> Result<TargetProbe>;

    /// Natively capture a target
    async fn capture(&self, target: &CaptureTarget) -> Result<MediaHandle>;

    /// Audio tracks of a target whose picture cannot be captured natively
    async fn capture_audio(&self, target: &CaptureTarget) -> Result<Vec<MediaTrack>>;

    /// Draw one frame of a target into a `width` x `height` canvas
    async fn draw_frame(&self, target: &CaptureTarget, width: u32, height: u32) -> Result<Bytes>;

    /// Encode a JPEG still of a target
    async fn snapshot(&self, target: &CaptureTarget) -> Result<Bytes>;
}

/// Parameters for a publish call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub stream_id: String,
    pub room_id: Option<String>,
    pub password: Option<String>,
    /// Label shown to viewers
    pub label: String,
    pub bitrate: Option<u32>,
    pub codec: Option<String>,
}

/// Publishing transport
///
/// Connections are shared between the bridge and the task watching for the
/// remote side closing, so every operation takes `&Connection`.
#[async_trait]
pub trait PublishingTransport: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    /// Open a signalling connection
    async fn connect(&self, server: &str) -> Result<Self::Connection>;

    /// Join a room before publishing into it
    async fn join_room(
        &self,
        connection: &Self::Connection,
        room_id: &str,
        password: Option<&str>,
    ) -> Result<()>;

    /// Publish a stream
    async fn publish(
        &self,
        connection: &Self::Connection,
        media: &MediaHandle,
        options: &PublishOptions,
    ) -> Result<()>;

    /// Tell viewers the publisher is leaving
    async fn announce_departure(&self, connection: &Self::Connection) -> Result<()>;

    /// Close the connection
    async fn disconnect(&self, connection: &Self::Connection);

    /// Resolves when the remote side closes the connection on its own
    async fn closed(&self, _connection: &Self::Connection) {
        std::future::pending::<()>().await
    }
}
