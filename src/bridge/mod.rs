//! Capture source bridges
//!
//! A bridge is the code that runs inside a page or worker context and serves
//! the orchestrator's correlated requests. It only ever sees what arrives in
//! its [`BridgePort`]: requests in, replies and lifecycle signals out.
//!
//! ```text
//!   BridgePort.recv() ──► BridgeRequest ──► acquire ──► transport.connect
//!                                                          │
//!   BridgePort.reply() ◄── BridgeReply ◄── publish ◄── join_room
//! ```
//!
//! The page flavour publishes on-page media elements; the worker flavour
//! publishes whole tabs. Both tolerate stop requests for streams they no
//! longer hold.

mod acquire;
mod page;
mod publisher;
pub mod source;
mod worker;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::{BridgeReply, BridgeRequest, CorrelationId, RequestEnvelope};
use crate::context::{BridgePort, ContextKind};
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleSignal;
use crate::media::DEFAULT_FRAME_RATE;
use crate::registry::SessionKey;

use acquire::{acquire, acquire_tab, Acquired};
use publisher::{discard, ActivePublisher};

pub use acquire::DEAD_TARGET;
pub use source::{CaptureSource, CaptureTarget, PublishOptions, PublishingTransport, TargetProbe};

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Frame rate of the synthetic draw loop
    pub frame_rate: u32,

    /// Tab capture bitrate (kbps) when the settings carry none
    pub default_bitrate: u32,

    /// Tab capture codec when the settings carry none
    pub default_codec: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            frame_rate: DEFAULT_FRAME_RATE,
            default_bitrate: 6000,
            default_codec: "h264".to_string(),
        }
    }
}

impl BridgeConfig {
    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    pub fn default_bitrate(mut self, kbps: u32) -> Self {
        self.default_bitrate = kbps;
        self
    }

    pub fn default_codec(mut self, codec: impl Into<String>) -> Self {
        self.default_codec = codec.into();
        self
    }
}

/// Request server running inside a page or worker context
///
/// Publish negotiations run on their own tasks so a slow one never holds up
/// stops, thumbnails or other publishes on the same context. Their outcomes
/// come back through a channel and are merged into `publishers` on the
/// request loop.
pub struct CaptureBridge<C: CaptureSource, T: PublishingTransport> {
    port: BridgePort,
    kind: ContextKind,
    source: Arc<C>,
    transport: Arc<T>,
    config: BridgeConfig,
    publishers: HashMap<String, ActivePublisher<T>>,
    negotiating: HashMap<String, Negotiating>,
    negotiated_tx: mpsc::UnboundedSender<Negotiated<T>>,
    negotiated_rx: mpsc::UnboundedReceiver<Negotiated<T>>,
    closed_tx: mpsc::UnboundedSender<String>,
    closed_rx: mpsc::UnboundedReceiver<String>,
}

/// Requests waiting on an in-flight negotiation
#[derive(Debug, Default)]
struct Negotiating {
    waiters: Vec<CorrelationId>,
    /// A stop arrived first; the publisher is taken down as soon as it exists
    cancelled: bool,
}

/// Outcome of a negotiation task
struct Negotiated<T: PublishingTransport> {
    session_key: SessionKey,
    target: CaptureTarget,
    options: PublishOptions,
    outcome: Result<(T::Connection, Acquired)>,
}

impl<C: CaptureSource, T: PublishingTransport> CaptureBridge<C, T> {
    fn new(port: BridgePort, kind: ContextKind, source: Arc<C>, transport: Arc<T>) -> Self {
        let (negotiated_tx, negotiated_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        Self {
            port,
            kind,
            source,
            transport,
            config: BridgeConfig::default(),
            publishers: HashMap::new(),
            negotiating: HashMap::new(),
            negotiated_tx,
            negotiated_rx,
            closed_tx,
            closed_rx,
        }
    }

    /// Bridge for a page context
    pub fn page(port: BridgePort, source: Arc<C>, transport: Arc<T>) -> Self {
        Self::new(port, ContextKind::Page, source, transport)
    }

    /// Bridge for the capture worker
    pub fn worker(port: BridgePort, source: Arc<C>, transport: Arc<T>) -> Self {
        Self::new(port, ContextKind::Worker, source, transport)
    }

    /// Replace the configuration
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Run the bridge on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Serve requests until the orchestrator detaches this context
    ///
    /// Every publisher still held when the mailbox closes is shut down, and
    /// negotiations still in flight are taken down as they finish.
    pub async fn run(mut self) {
        let context = self.port.context();
        self.port.mark_ready();
        tracing::debug!(context = %context, kind = ?self.kind, "Bridge ready");

        loop {
            tokio::select! {
                envelope = self.port.recv() => match envelope {
                    Some(envelope) => self.handle(envelope).await,
                    None => break,
                },
                Some(negotiated) = self.negotiated_rx.recv() => {
                    self.on_negotiated(negotiated).await;
                }
                Some(stream_id) = self.closed_rx.recv() => {
                    self.on_connection_closed(&stream_id);
                }
            }
        }

        self.stop_all().await;
        while !self.negotiating.is_empty() {
            match self.negotiated_rx.recv().await {
                Some(negotiated) => self.on_negotiated(negotiated).await,
                None => break,
            }
        }
        tracing::debug!(context = %context, "Bridge ended");
    }

    async fn handle(&mut self, envelope: RequestEnvelope) {
        let RequestEnvelope {
            correlation_id,
            body,
        } = envelope;

        let reply = match serde_json::from_value::<BridgeRequest>(body) {
            Ok(request) => match self.kind {
                ContextKind::Page => self.handle_page(request, correlation_id).await,
                ContextKind::Worker => self.handle_worker(request, correlation_id).await,
            },
            Err(e) => {
                tracing::warn!(context = %self.port.context(), error = %e, "Malformed request");
                Some(BridgeReply::failure(format!("malformed request: {}", e)))
            }
        };

        // `None` means the reply comes later, from the negotiation
        if let (Some(id), Some(reply)) = (correlation_id, reply) {
            self.port.reply(id, &reply);
        }
    }

    /// Start negotiating a publisher off the request loop
    ///
    /// Returns the reply when it is known right away: the stream is already
    /// published. A publish for a stream that is still negotiating joins the
    /// running negotiation and gets the same reply.
    fn begin_publish(
        &mut self,
        correlation_id: Option<CorrelationId>,
        session_key: SessionKey,
        target: CaptureTarget,
        server: String,
        options: PublishOptions,
    ) -> Option<BridgeReply> {
        if self.publishers.contains_key(&options.stream_id) {
            return Some(BridgeReply::ok());
        }
        if let Some(negotiating) = self.negotiating.get_mut(&options.stream_id) {
            negotiating.waiters.extend(correlation_id);
            return None;
        }

        self.negotiating.insert(
            options.stream_id.clone(),
            Negotiating {
                waiters: correlation_id.into_iter().collect(),
                cancelled: false,
            },
        );

        let source = Arc::clone(&self.source);
        let transport = Arc::clone(&self.transport);
        let frame_rate = self.config.frame_rate;
        let negotiated_tx = self.negotiated_tx.clone();

        tokio::spawn(async move {
            let outcome = negotiate(&source, &transport, &target, &server, &options, frame_rate).await;
            let negotiated = Negotiated {
                session_key,
                target,
                options,
                outcome,
            };

            if let Err(mpsc::error::SendError(negotiated)) = negotiated_tx.send(negotiated) {
                if let Ok((connection, acquired)) = negotiated.outcome {
                    discard(&*transport, &negotiated.options.stream_id, &connection, acquired).await;
                }
            }
        });
        None
    }

    /// Keep a finished negotiation's publisher and answer everyone waiting on it
    async fn on_negotiated(&mut self, negotiated: Negotiated<T>) {
        let Negotiated {
            session_key,
            target,
            options,
            outcome,
        } = negotiated;
        let stream_id = options.stream_id.clone();
        let negotiating = self.negotiating.remove(&stream_id).unwrap_or(Negotiating {
            waiters: Vec::new(),
            cancelled: true,
        });

        let reply = match outcome {
            Ok((connection, acquired)) if negotiating.cancelled => {
                discard(&*self.transport, &stream_id, &connection, acquired).await;
                BridgeReply::failure(format!("Stream {} was stopped while publishing", stream_id))
            }
            Ok((connection, acquired)) => {
                let (audio, video) = (acquired.media.audio_tracks(), acquired.media.video_tracks());
                let connection = Arc::new(connection);
                let watcher = self.spawn_watcher(stream_id.clone(), Arc::clone(&connection));

                tracing::info!(
                    context = %self.port.context(),
                    session = %session_key,
                    stream = %stream_id,
                    room = ?options.room_id,
                    audio,
                    video,
                    "Publishing"
                );

                let reply = match target {
                    CaptureTarget::Tab { .. } => BridgeReply::ok().with_tracks(audio, video),
                    CaptureTarget::Element { .. } => BridgeReply::ok(),
                };
                let publisher =
                    ActivePublisher::new(session_key, stream_id.clone(), target, connection, acquired, watcher);
                self.publishers.insert(stream_id, publisher);
                reply
            }
            Err(e) => failure_reply(e),
        };

        for id in negotiating.waiters {
            self.port.reply(id, &reply);
        }
    }

    fn spawn_watcher(&self, stream_id: String, connection: Arc<T::Connection>) -> JoinHandle<()> {
        let transport = Arc::clone(&self.transport);
        let closed_tx = self.closed_tx.clone();

        tokio::spawn(async move {
            transport.closed(&connection).await;
            if closed_tx.send(stream_id).is_err() {
                tracing::debug!("Connection closed after the bridge ended");
            }
        })
    }

    /// Stop one publisher; `false` if this bridge does not hold it
    ///
    /// A publisher still negotiating is taken down once the negotiation ends.
    async fn stop_publisher(&mut self, stream_id: &str) -> bool {
        if let Some(publisher) = self.publishers.remove(stream_id) {
            publisher.shutdown(&self.transport).await;
            return true;
        }
        if let Some(negotiating) = self.negotiating.get_mut(stream_id) {
            tracing::debug!(context = %self.port.context(), stream = %stream_id, "Stop while negotiating");
            negotiating.cancelled = true;
            return true;
        }

        tracing::debug!(context = %self.port.context(), stream = %stream_id, "Stop for unknown stream");
        false
    }

    async fn stop_all(&mut self) {
        for negotiating in self.negotiating.values_mut() {
            negotiating.cancelled = true;
        }
        let publishers: Vec<_> = self.publishers.drain().map(|(_, p)| p).collect();
        for publisher in publishers {
            publisher.shutdown(&self.transport).await;
        }
    }

    fn on_connection_closed(&mut self, stream_id: &str) {
        let Some(publisher) = self.publishers.remove(stream_id) else {
            return;
        };

        let session_key = publisher.session_key.clone();
        publisher.abandon();

        self.port.signal(LifecycleSignal::PublisherEnded {
            session_key,
            stream_id: stream_id.to_string(),
        });
    }

    /// Number of streams this bridge is publishing
    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }
}

/// Acquire media, connect, join the room and publish
///
/// On failure everything acquired so far is released.
async fn negotiate<C: CaptureSource, T: PublishingTransport>(
    source: &Arc<C>,
    transport: &Arc<T>,
    target: &CaptureTarget,
    server: &str,
    options: &PublishOptions,
    frame_rate: u32,
) -> Result<(T::Connection, Acquired)> {
    let acquired = match target {
        CaptureTarget::Element { .. } => acquire(source, target, frame_rate).await?,
        CaptureTarget::Tab { .. } => acquire_tab(source, target).await?,
    };

    let connection = match transport.connect(server).await {
        Ok(connection) => connection,
        Err(e) => {
            acquired.release();
            return Err(e);
        }
    };

    let published: Result<()> = async {
        if let Some(room_id) = options.room_id.as_deref() {
            transport
                .join_room(&connection, room_id, options.password.as_deref())
                .await?;
        }
        transport.publish(&connection, &acquired.media, options).await
    }
    .await;

    match published {
        Ok(()) => Ok((connection, acquired)),
        Err(e) => {
            transport.disconnect(&connection).await;
            acquired.release();
            Err(e)
        }
    }
}

/// Reply for a failed operation, keeping a bridge's own failure text as-is
fn failure_reply(error: Error) -> BridgeReply {
    match error {
        Error::RemoteFailure(message) => BridgeReply::failure(message),
        other => BridgeReply::failure(other.to_string()),
    }
}
