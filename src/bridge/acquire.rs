//! Stream acquisition for element targets
//!
//! Native capture when the target supports it; otherwise, or when native
//! capture yields no video, a synthetic draw loop plus the target's audio.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::media::{spawn_draw_loop, MediaHandle, MediaTrack, TrackKind};

use super::source::{CaptureSource, CaptureTarget};

/// Failure text for targets with nothing to publish
pub const DEAD_TARGET: &str = "Refusing to capture 0x0 video without audio";

/// Media obtained for a target
pub(crate) struct Acquired {
    pub media: MediaHandle,
    /// Synthetic draw loop, when one was needed
    pub renderer: Option<JoinHandle<()>>,
}

impl Acquired {
    /// Stop every track and the draw loop
    pub fn release(self) {
        self.media.stop_all();
        if let Some(renderer) = self.renderer {
            renderer.abort();
        }
    }
}

/// Capture a whole tab; there is no synthetic fallback for tabs
pub(crate) async fn acquire_tab<C: CaptureSource>(source: &Arc<C>, target: &CaptureTarget) -> Result<Acquired> {
    let media = source.capture(target).await?;
    if media.is_empty() {
        return Err(Error::RemoteFailure("Tab capture returned no tracks".to_string()));
    }
    Ok(Acquired {
        media,
        renderer: None,
    })
}

pub(crate) async fn acquire<C: CaptureSource>(
    source: &Arc<C>,
    target: &CaptureTarget,
    frame_rate: u32,
) -> Result<Acquired> {
    let probe = source.probe(target).await?;
    if probe.is_dead() {
        tracing::info!(target = %target, "Refusing dead capture target");
        return Err(Error::RemoteFailure(DEAD_TARGET.to_string()));
    }

    let mut audio = Vec::new();
    if probe.native_capture {
        match source.capture(target).await {
            Ok(media) if media.video_tracks() > 0 => {
                tracing::debug!(
                    target = %target,
                    audio = media.audio_tracks(),
                    video = media.video_tracks(),
                    "Native capture"
                );
                return Ok(Acquired {
                    media,
                    renderer: None,
                });
            }
            Ok(media) => {
                audio = media.tracks_of(TrackKind::Audio).cloned().collect();
            }
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Native capture failed, drawing instead");
            }
        }
    }

    if audio.is_empty() && probe.has_audio {
        match source.capture_audio(target).await {
            Ok(tracks) => audio = tracks,
            Err(e) => {
                tracing::warn!(target = %target, error = %e, "Audio capture failed, drawing without sound");
            }
        }
    }

    let (width, height) = probe.canvas_size();
    let video = MediaTrack::video(format!("{}-canvas", target));

    let mut media = MediaHandle::new(vec![video.clone()]);
    for track in audio {
        media.add_track(track);
    }

    let draw_source = Arc::clone(source);
    let draw_target = target.clone();
    let renderer = spawn_draw_loop(media.clone(), video, frame_rate, move || {
        let source = Arc::clone(&draw_source);
        let target = draw_target.clone();
        async move { source.draw_frame(&target, width, height).await }
    });

    tracing::debug!(
        target = %target,
        width,
        height,
        audio = media.audio_tracks(),
        "Synthetic capture"
    );

    Ok(Acquired {
        media,
        renderer: Some(renderer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::TargetProbe;
    use crate::loopback::LoopbackCapture;

    const FPS: u32 = 30;

    #[tokio::test]
    async fn test_refuses_dead_target() {
        let source = Arc::new(LoopbackCapture::new());
        source.add_element("dead", TargetProbe::default());

        let err = acquire(&source, &CaptureTarget::element("dead"), FPS)
            .await
            .err()
            .unwrap();

        assert_eq!(err, Error::RemoteFailure(DEAD_TARGET.into()));
    }

    #[tokio::test]
    async fn test_native_capture() {
        let source = Arc::new(LoopbackCapture::new());
        source.add_element("v", LoopbackCapture::playing_video());

        let acquired = acquire(&source, &CaptureTarget::element("v"), FPS).await.unwrap();

        assert!(acquired.renderer.is_none());
        assert_eq!(acquired.media.video_tracks(), 1);
        assert_eq!(acquired.media.audio_tracks(), 1);
    }

    #[tokio::test]
    async fn test_synthetic_fallback_keeps_audio() {
        let source = Arc::new(LoopbackCapture::new());
        source.add_element(
            "v",
            TargetProbe {
                width: 640,
                height: 360,
                has_audio: true,
                native_capture: false,
                ..Default::default()
            },
        );

        let acquired = acquire(&source, &CaptureTarget::element("v"), FPS).await.unwrap();

        assert!(acquired.renderer.is_some());
        assert_eq!(acquired.media.video_tracks(), 1);
        assert_eq!(acquired.media.audio_tracks(), 1);
        acquired.release();
    }

    #[tokio::test]
    async fn test_audio_only_target_is_not_silent() {
        let source = Arc::new(LoopbackCapture::new());
        source.add_element(
            "radio",
            TargetProbe {
                has_audio: true,
                ..Default::default()
            },
        );

        let acquired = acquire(&source, &CaptureTarget::element("radio"), FPS)
            .await
            .unwrap();

        assert!(acquired.renderer.is_some());
        assert_eq!(acquired.media.video_tracks(), 1);
        assert_eq!(acquired.media.audio_tracks(), 1);
        assert!(acquired.media.tracks_of(TrackKind::Audio).all(MediaTrack::is_live));
        acquired.release();
    }

    #[tokio::test]
    async fn test_missing_target() {
        let source = Arc::new(LoopbackCapture::new());

        let err = acquire(&source, &CaptureTarget::element("nope"), FPS)
            .await
            .err()
            .unwrap();

        assert!(matches!(err, Error::RemoteFailure(_)));
    }
}
