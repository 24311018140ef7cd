//! In-memory collaborators
//!
//! A capture source backed by a table of fake elements, a publishing
//! transport that records what it was asked to do, and a worker launcher
//! that serves the worker port with a [`CaptureBridge`]. Used by the tests
//! and the demo; also handy for hosts that want to dry-run a controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::bridge::{CaptureBridge, CaptureSource, CaptureTarget, PublishOptions, PublishingTransport, TargetProbe};
use crate::context::{BridgePort, WorkerLauncher};
use crate::error::{Error, Result};
use crate::media::{MediaHandle, MediaTrack};

/// JPEG start-of-image marker, enough to look like a JPEG
const JPEG_SOI: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

/// Capture source over a table of fake elements
#[derive(Debug, Default)]
pub struct LoopbackCapture {
    elements: Mutex<HashMap<String, TargetProbe>>,
    tab_failure: Mutex<Option<String>>,
}

impl LoopbackCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A 720p element with sound that supports native capture
    pub fn playing_video() -> TargetProbe {
        TargetProbe {
            width: 1280,
            height: 720,
            layout_width: 1280,
            layout_height: 720,
            has_audio: true,
            native_capture: true,
        }
    }

    /// Put an element on the page
    pub fn add_element(&self, id: impl Into<String>, probe: TargetProbe) {
        self.elements.lock().insert(id.into(), probe);
    }

    /// Take an element off the page
    pub fn remove_element(&self, id: &str) {
        self.elements.lock().remove(id);
    }

    /// Make every tab capture fail
    pub fn fail_tab_capture(&self, message: impl Into<String>) {
        *self.tab_failure.lock() = Some(message.into());
    }

    fn element(&self, id: &str) -> Result<TargetProbe> {
        self.elements
            .lock()
            .get(id)
            .copied()
            .ok_or_else(|| Error::RemoteFailure("Video element not found".to_string()))
    }
}

#[async_trait]
impl CaptureSource for LoopbackCapture {
    async fn probe(&self, target: &CaptureTarget) -> Result<TargetProbe> {
        match target {
            CaptureTarget::Element { id } => self.element(id),
            CaptureTarget::Tab { audio, video, .. } => Ok(TargetProbe {
                width: if *video { 1920 } else { 0 },
                height: if *video { 1080 } else { 0 },
                has_audio: *audio,
                native_capture: true,
                ..Default::default()
            }),
        }
    }

    async fn capture(&self, target: &CaptureTarget) -> Result<MediaHandle> {
        let mut media = MediaHandle::empty();

        match target {
            CaptureTarget::Element { id } => {
                let probe = self.element(id)?;
                if probe.width > 0 && probe.height > 0 {
                    media.add_track(MediaTrack::video(format!("{}-video", id)));
                }
                if probe.has_audio {
                    media.add_track(MediaTrack::audio(format!("{}-audio", id)));
                }
            }
            CaptureTarget::Tab { tab, audio, video } => {
                if let Some(message) = self.tab_failure.lock().clone() {
                    return Err(Error::RemoteFailure(message));
                }
                if *video {
                    media.add_track(MediaTrack::video(format!("tab-{}-video", tab.context_id)));
                }
                if *audio {
                    media.add_track(MediaTrack::audio(format!("tab-{}-audio", tab.context_id)));
                }
            }
        }

        Ok(media)
    }

    async fn capture_audio(&self, target: &CaptureTarget) -> Result<Vec<MediaTrack>> {
        let track = match target {
            CaptureTarget::Element { id } => self
                .element(id)?
                .has_audio
                .then(|| MediaTrack::audio(format!("{}-audio", id))),
            CaptureTarget::Tab { tab, audio, .. } => audio
                .then(|| MediaTrack::audio(format!("tab-{}-audio", tab.context_id))),
        };
        Ok(track.into_iter().collect())
    }

    async fn draw_frame(&self, target: &CaptureTarget, width: u32, height: u32) -> Result<Bytes> {
        if let CaptureTarget::Element { id } = target {
            self.element(id)
                .map_err(|_| Error::Collaborator(format!("{} detached", target)))?;
        }
        Ok(Bytes::from(format!("{}x{}", width, height)))
    }

    async fn snapshot(&self, target: &CaptureTarget) -> Result<Bytes> {
        if let CaptureTarget::Element { id } = target {
            self.element(id)?;
        }
        Ok(Bytes::from_static(JPEG_SOI))
    }
}

/// Connection handed out by [`LoopbackTransport`]
#[derive(Debug)]
pub struct LoopbackConnection {
    pub id: u64,
    pub server: String,
    closed: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct TransportState {
    publish_failure: Option<String>,
    publish_delay: Option<Duration>,
    published: Vec<PublishOptions>,
    rooms: Vec<String>,
    live: HashMap<String, Arc<watch::Sender<bool>>>,
}

/// Publishing transport that records every call
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    state: Mutex<TransportState>,
    next_connection: AtomicU64,
    open: AtomicUsize,
    departures: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following publish fail
    pub fn fail_publish(&self, message: impl Into<String>) {
        self.state.lock().publish_failure = Some(message.into());
    }

    /// Make every following publish take `delay`
    pub fn delay_publish(&self, delay: Duration) {
        self.state.lock().publish_delay = Some(delay);
    }

    /// Close a published stream's connection from the remote side
    pub fn close_remote(&self, stream_id: &str) -> bool {
        match self.state.lock().live.remove(stream_id) {
            Some(closed) => {
                closed.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// Number of successful publish calls
    pub fn publish_count(&self) -> usize {
        self.state.lock().published.len()
    }

    /// Options of the most recent successful publish
    pub fn last_publish(&self) -> Option<PublishOptions> {
        self.state.lock().published.last().cloned()
    }

    /// Rooms joined, in order
    pub fn rooms_joined(&self) -> Vec<String> {
        self.state.lock().rooms.clone()
    }

    /// Number of departure announcements
    pub fn departures(&self) -> usize {
        self.departures.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet disconnected
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishingTransport for LoopbackTransport {
    type Connection = LoopbackConnection;

    async fn connect(&self, server: &str) -> Result<LoopbackConnection> {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        self.open.fetch_add(1, Ordering::SeqCst);
        let (closed, _) = watch::channel(false);

        Ok(LoopbackConnection {
            id,
            server: server.to_string(),
            closed: Arc::new(closed),
        })
    }

    async fn join_room(
        &self,
        _connection: &LoopbackConnection,
        room_id: &str,
        _password: Option<&str>,
    ) -> Result<()> {
        self.state.lock().rooms.push(room_id.to_string());
        Ok(())
    }

    async fn publish(
        &self,
        connection: &LoopbackConnection,
        _media: &MediaHandle,
        options: &PublishOptions,
    ) -> Result<()> {
        let delay = self.state.lock().publish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(message) = state.publish_failure.clone() {
            return Err(Error::Collaborator(message));
        }
        state.published.push(options.clone());
        state
            .live
            .insert(options.stream_id.clone(), Arc::clone(&connection.closed));
        Ok(())
    }

    async fn announce_departure(&self, _connection: &LoopbackConnection) -> Result<()> {
        self.departures.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self, connection: &LoopbackConnection) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        self.state
            .lock()
            .live
            .retain(|_, closed| !Arc::ptr_eq(closed, &connection.closed));
    }

    async fn closed(&self, connection: &LoopbackConnection) {
        let mut closed = connection.closed.subscribe();
        let _closed = closed.wait_for(|c| *c).await.is_ok();
    }
}

/// Worker launcher that serves the worker port in-process
pub struct LoopbackLauncher<C: CaptureSource, T: PublishingTransport> {
    source: Arc<C>,
    transport: Arc<T>,
}

impl<C: CaptureSource, T: PublishingTransport> LoopbackLauncher<C, T> {
    pub fn new(source: Arc<C>, transport: Arc<T>) -> Self {
        Self { source, transport }
    }
}

#[async_trait]
impl<C: CaptureSource, T: PublishingTransport> WorkerLauncher for LoopbackLauncher<C, T> {
    async fn launch(&self, port: BridgePort) -> Result<()> {
        CaptureBridge::worker(port, Arc::clone(&self.source), Arc::clone(&self.transport)).spawn();
        Ok(())
    }
}

/// Serve a page port with a [`CaptureBridge`] on its own task
pub fn spawn_page_bridge<C: CaptureSource, T: PublishingTransport>(
    port: BridgePort,
    source: Arc<C>,
    transport: Arc<T>,
) -> tokio::task::JoinHandle<()> {
    CaptureBridge::page(port, source, transport).spawn()
}
