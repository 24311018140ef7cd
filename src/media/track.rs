//! Media tracks and handles

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::frame::MediaFrame;

/// Capacity of a handle's frame channel
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// One audio or video track
///
/// Clones share the ended flag, so stopping any clone stops the track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    ended: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ended: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Audio)
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Video)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// End the track; idempotent
    pub fn stop(&self) {
        self.ended.store(true, Ordering::Release);
    }

    pub fn is_live(&self) -> bool {
        !self.ended.load(Ordering::Acquire)
    }
}

/// A captured media stream
///
/// What a capture source hands back and what the transport publishes.
#[derive(Debug, Clone)]
pub struct MediaHandle {
    tracks: Vec<MediaTrack>,
    frames: broadcast::Sender<MediaFrame>,
}

impl MediaHandle {
    /// Create a handle over a set of tracks
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        Self { tracks, frames }
    }

    /// Create a handle with no tracks yet
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn add_track(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    /// Live tracks of one kind
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks
            .iter()
            .filter(move |t| t.kind() == kind && t.is_live())
    }

    pub fn audio_tracks(&self) -> usize {
        self.tracks_of(TrackKind::Audio).count()
    }

    pub fn video_tracks(&self) -> usize {
        self.tracks_of(TrackKind::Video).count()
    }

    pub fn is_empty(&self) -> bool {
        self.audio_tracks() == 0 && self.video_tracks() == 0
    }

    /// Receive frames pushed into this handle
    pub fn subscribe(&self) -> broadcast::Receiver<MediaFrame> {
        self.frames.subscribe()
    }

    /// Push a frame to subscribers
    ///
    /// Returns the number of subscribers that received it.
    pub fn push(&self, frame: MediaFrame) -> usize {
        self.frames.send(frame).unwrap_or(0)
    }

    /// Stop every track
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_track_counts_ignore_ended() {
        let mut handle = MediaHandle::new(vec![MediaTrack::video("v"), MediaTrack::audio("a")]);
        handle.add_track(MediaTrack::audio("a2"));

        assert_eq!(handle.audio_tracks(), 2);
        assert_eq!(handle.video_tracks(), 1);

        handle.tracks()[1].stop();
        assert_eq!(handle.audio_tracks(), 1);

        handle.stop_all();
        assert!(handle.is_empty());
    }

    #[test]
    fn test_clones_share_ended_flag() {
        let track = MediaTrack::video("v");
        let clone = track.clone();

        clone.stop();

        assert!(!track.is_live());
    }

    #[tokio::test]
    async fn test_push_reaches_subscribers() {
        let handle = MediaHandle::new(vec![MediaTrack::video("v")]);
        assert_eq!(handle.push(MediaFrame::video(0, Bytes::from_static(b"x"))), 0);

        let mut rx = handle.subscribe();
        assert_eq!(handle.push(MediaFrame::video(33, Bytes::from_static(b"y"))), 1);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.timestamp, 33);
        assert!(frame.is_video());
    }
}
