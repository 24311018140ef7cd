//! Media frames
//!
//! Frames are what a synthetic capture loop pushes into its track. Payloads
//! are `Bytes`, so every subscriber of a handle shares one allocation.

use bytes::Bytes;

use super::track::TrackKind;

/// One encoded frame
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Track kind the frame belongs to
    pub kind: TrackKind,
    /// Milliseconds since the track started
    pub timestamp: u32,
    /// Frame payload
    pub data: Bytes,
}

impl MediaFrame {
    /// Create a video frame
    pub fn video(timestamp: u32, data: Bytes) -> Self {
        Self {
            kind: TrackKind::Video,
            timestamp,
            data,
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == TrackKind::Video
    }
}
