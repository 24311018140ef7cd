//! Synthetic video source
//!
//! Fallback for targets without a native capture API: a loop redraws the
//! target into a virtual canvas at a fixed frame rate and pushes each frame
//! into the handle. The loop ends when its video track is stopped or a draw
//! fails.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::Result;

use super::frame::MediaFrame;
use super::track::{MediaHandle, MediaTrack};

/// Default synthetic frame rate
pub const DEFAULT_FRAME_RATE: u32 = 30;

/// Canvas size used when the target reports no size at all
pub const FALLBACK_CANVAS: (u32, u32) = (640, 480);

/// Pick the canvas size for a target
///
/// The intrinsic size wins, then the laid-out size, then a fixed fallback.
pub fn canvas_size(intrinsic: (u32, u32), layout: (u32, u32)) -> (u32, u32) {
    let usable = |(w, h): (u32, u32)| w > 0 && h > 0;

    if usable(intrinsic) {
        intrinsic
    } else if usable(layout) {
        layout
    } else {
        FALLBACK_CANVAS
    }
}

/// Spawn the draw loop for `track`, pushing frames into `handle`
pub fn spawn_draw_loop<F, Fut>(
    handle: MediaHandle,
    track: MediaTrack,
    frame_rate: u32,
    mut draw: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Bytes>> + Send,
{
    let period = Duration::from_millis(1000 / u64::from(frame_rate.max(1)));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let started = tokio::time::Instant::now();
        let mut frames: u64 = 0;

        loop {
            ticker.tick().await;
            if !track.is_live() {
                break;
            }

            match draw().await {
                Ok(data) => {
                    let timestamp = started.elapsed().as_millis() as u32;
                    handle.push(MediaFrame::video(timestamp, data));
                    frames += 1;
                }
                Err(e) => {
                    tracing::warn!(track = %track.id(), error = %e, "Synthetic draw failed");
                    track.stop();
                    break;
                }
            }
        }

        tracing::debug!(track = %track.id(), frames, "Synthetic draw loop ended");
    })
}
