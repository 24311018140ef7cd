//! Active publishers held by a bridge

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::media::MediaHandle;
use crate::registry::SessionKey;

use super::acquire::Acquired;
use super::source::{CaptureTarget, PublishingTransport};

/// A stream this bridge is publishing
pub(crate) struct ActivePublisher<T: PublishingTransport> {
    pub session_key: SessionKey,
    pub stream_id: String,
    pub target: CaptureTarget,
    pub connection: Arc<T::Connection>,
    pub media: MediaHandle,
    renderer: Option<JoinHandle<()>>,
    watcher: JoinHandle<()>,
}

impl<T: PublishingTransport> ActivePublisher<T> {
    pub fn new(
        session_key: SessionKey,
        stream_id: String,
        target: CaptureTarget,
        connection: Arc<T::Connection>,
        acquired: Acquired,
        watcher: JoinHandle<()>,
    ) -> Self {
        Self {
            session_key,
            stream_id,
            target,
            connection,
            media: acquired.media,
            renderer: acquired.renderer,
            watcher,
        }
    }

    fn release_media(&mut self) {
        self.watcher.abort();
        self.media.stop_all();
        if let Some(renderer) = self.renderer.take() {
            renderer.abort();
        }
    }

    /// Announce departure, disconnect, stop every track
    ///
    /// Transport failures are logged; the tracks are stopped regardless.
    pub async fn shutdown(mut self, transport: &T) {
        self.watcher.abort();

        if let Err(e) = transport.announce_departure(&self.connection).await {
            tracing::debug!(stream = %self.stream_id, error = %e, "Departure announcement failed");
        }
        transport.disconnect(&self.connection).await;
        self.release_media();

        tracing::info!(session = %self.session_key, stream = %self.stream_id, "Publisher stopped");
    }

    /// Tear down after the remote side closed; there is nobody to say bye to
    pub fn abandon(mut self) {
        self.release_media();
        tracing::info!(session = %self.session_key, stream = %self.stream_id, "Publisher connection closed");
    }
}

/// Take down a connection that was published but will not be kept
pub(crate) async fn discard<T: PublishingTransport>(
    transport: &T,
    stream_id: &str,
    connection: &T::Connection,
    acquired: Acquired,
) {
    if let Err(e) = transport.announce_departure(connection).await {
        tracing::debug!(stream = %stream_id, error = %e, "Departure announcement failed");
    }
    transport.disconnect(connection).await;
    acquired.release();
    tracing::info!(stream = %stream_id, "Publisher stopped before it was kept");
}
