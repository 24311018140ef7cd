//! Context routing table
//!
//! The orchestrator's view of which contexts are attached and how to reach
//! them. Attaching a context hands the context side its [`BridgePort`];
//! detaching drops the orchestrator's sender so the port's mailbox drains and
//! closes.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};

use crate::channel::{BridgeReply, CorrelationId, ReplyEnvelope, RequestEnvelope};
use crate::error::{Error, Result};
use crate::lifecycle::LifecycleSignal;

use super::{ContextKind, ContextRef};

/// Sink replies travel on, back to the correlated channel
pub type ReplySink = mpsc::UnboundedSender<ReplyEnvelope>;

/// Sink lifecycle signals travel on, back to the lifecycle monitor
pub type SignalSink = mpsc::UnboundedSender<LifecycleSignal>;

/// Orchestrator-side handle to one attached context
#[derive(Debug, Clone)]
pub struct ContextEndpoint {
    context: ContextRef,
    kind: ContextKind,
    mailbox: mpsc::UnboundedSender<RequestEnvelope>,
    ready: watch::Receiver<bool>,
}

impl ContextEndpoint {
    /// The context this endpoint routes to
    pub fn context(&self) -> ContextRef {
        self.context
    }

    /// Kind of context
    pub fn kind(&self) -> ContextKind {
        self.kind
    }

    /// Whether the context side has gone away
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Whether the context has signalled readiness
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Push an envelope into the context's mailbox
    pub(crate) fn deliver(&self, envelope: RequestEnvelope) -> Result<()> {
        self.mailbox
            .send(envelope)
            .map_err(|_| Error::ContextUnreachable(self.context))
    }

    /// Wait until the context is ready to serve requests
    ///
    /// Returns `false` if the deadline passes or the context goes away first.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.clone();
        let became_ready = matches!(
            tokio::time::timeout(timeout, ready.wait_for(|r| *r)).await,
            Ok(Ok(_))
        );
        became_ready
    }
}

/// Context-side half of an attachment
///
/// Everything a bridge needs to serve requests: the inbound mailbox, the
/// reply sink, the lifecycle signal sink and its readiness flag.
#[derive(Debug)]
pub struct BridgePort {
    context: ContextRef,
    mailbox: mpsc::UnboundedReceiver<RequestEnvelope>,
    replies: ReplySink,
    signals: SignalSink,
    ready: watch::Sender<bool>,
}

impl BridgePort {
    /// The context this port belongs to
    pub fn context(&self) -> ContextRef {
        self.context
    }

    /// Announce that the bridge is installed and can take requests
    pub fn mark_ready(&self) {
        self.ready.send_replace(true);
    }

    /// Receive the next inbound request
    ///
    /// Returns `None` once the orchestrator has detached this context.
    pub async fn recv(&mut self) -> Option<RequestEnvelope> {
        self.mailbox.recv().await
    }

    /// Emit the reply for a correlated request
    pub fn reply(&self, correlation_id: CorrelationId, reply: &BridgeReply) {
        let envelope = match ReplyEnvelope::encode(correlation_id, reply) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(context = %self.context, error = %e, "Failed to encode reply");
                return;
            }
        };

        if self.replies.send(envelope).is_err() {
            tracing::debug!(
                context = %self.context,
                correlation_id = %correlation_id,
                "Reply dropped, orchestrator gone"
            );
        }
    }

    /// Emit an unsolicited lifecycle signal
    pub fn signal(&self, signal: LifecycleSignal) {
        if let Err(e) = self.signals.send(signal) {
            tracing::debug!(
                context = %self.context,
                signal = ?e.0,
                "Signal dropped, orchestrator gone"
            );
        }
    }
}

/// Routing table of attached contexts
pub struct ContextDirectory {
    endpoints: RwLock<HashMap<ContextRef, ContextEndpoint>>,
    replies: ReplySink,
    signals: SignalSink,
}

impl ContextDirectory {
    /// Create an empty directory whose ports reply and signal on the given sinks
    pub fn new(replies: ReplySink, signals: SignalSink) -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            replies,
            signals,
        }
    }

    /// Attach a context and return its port
    ///
    /// Re-attaching an existing context (e.g. after a navigation) replaces the
    /// previous endpoint; the old port's mailbox closes.
    pub fn attach(&self, context: ContextRef, kind: ContextKind) -> BridgePort {
        let (mailbox_tx, mailbox_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = watch::channel(false);

        let endpoint = ContextEndpoint {
            context,
            kind,
            mailbox: mailbox_tx,
            ready: ready_rx,
        };

        let replaced = self.endpoints.write().insert(context, endpoint).is_some();
        tracing::debug!(context = %context, kind = ?kind, replaced, "Context attached");

        BridgePort {
            context,
            mailbox: mailbox_rx,
            replies: self.replies.clone(),
            signals: self.signals.clone(),
            ready: ready_tx,
        }
    }

    /// Detach a context and every frame it covers
    ///
    /// Returns the references that were removed.
    pub fn detach(&self, context: &ContextRef) -> Vec<ContextRef> {
        let mut endpoints = self.endpoints.write();
        let removed: Vec<ContextRef> = endpoints
            .keys()
            .filter(|attached| context.covers(attached))
            .copied()
            .collect();

        for key in &removed {
            endpoints.remove(key);
        }

        if !removed.is_empty() {
            tracing::debug!(context = %context, count = removed.len(), "Context detached");
        }
        removed
    }

    /// Look up a live endpoint
    pub fn endpoint(&self, context: &ContextRef) -> Option<ContextEndpoint> {
        self.endpoints
            .read()
            .get(context)
            .filter(|endpoint| !endpoint.is_closed())
            .cloned()
    }

    /// Whether a context is attached and its bridge still running
    pub fn is_live(&self, context: &ContextRef) -> bool {
        self.endpoint(context).is_some()
    }

    /// Sink for lifecycle signals raised by the host (tab closed, worker stopped)
    pub fn signal_sink(&self) -> SignalSink {
        self.signals.clone()
    }

    /// Number of attached contexts
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Whether no context is attached
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> ContextDirectory {
        let (replies, _) = mpsc::unbounded_channel();
        let (signals, _) = mpsc::unbounded_channel();
        ContextDirectory::new(replies, signals)
    }

    #[test]
    fn test_attach_and_lookup() {
        let dir = directory();
        let ctx = ContextRef::new(1);

        let _port = dir.attach(ctx, ContextKind::Page);

        assert!(dir.is_live(&ctx));
        assert_eq!(dir.endpoint(&ctx).unwrap().kind(), ContextKind::Page);
        assert!(!dir.is_live(&ContextRef::new(2)));
    }

    #[test]
    fn test_dropped_port_is_not_live() {
        let dir = directory();
        let ctx = ContextRef::new(1);

        let port = dir.attach(ctx, ContextKind::Page);
        drop(port);

        assert!(!dir.is_live(&ctx));
        // Still present until detached
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_detach_covers_frames() {
        let dir = directory();
        let _a = dir.attach(ContextRef::frame(1, 0), ContextKind::Page);
        let _b = dir.attach(ContextRef::frame(1, 7), ContextKind::Page);
        let _c = dir.attach(ContextRef::new(2), ContextKind::Page);

        let removed = dir.detach(&ContextRef::new(1));

        assert_eq!(removed.len(), 2);
        assert_eq!(dir.len(), 1);
        assert!(dir.is_live(&ContextRef::new(2)));
    }

    #[test]
    fn test_port_wakes_on_delivery() {
        let dir = directory();
        let ctx = ContextRef::new(1);
        let mut port = dir.attach(ctx, ContextKind::Page);
        let endpoint = dir.endpoint(&ctx).unwrap();

        let mut recv = tokio_test::task::spawn(port.recv());
        tokio_test::assert_pending!(recv.poll());

        let envelope = RequestEnvelope::notification(&serde_json::json!({ "type": "stop" })).unwrap();
        endpoint.deliver(envelope.clone()).unwrap();

        assert!(recv.is_woken());
        let received = tokio_test::assert_ready!(recv.poll());
        assert_eq!(received, Some(envelope));
    }

    #[tokio::test]
    async fn test_detach_closes_mailbox() {
        let dir = directory();
        let ctx = ContextRef::new(1);
        let mut port = dir.attach(ctx, ContextKind::Page);

        dir.detach(&ctx);

        assert!(port.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready() {
        let dir = directory();
        let ctx = ContextRef::new(1);
        let port = dir.attach(ctx, ContextKind::Page);
        let endpoint = dir.endpoint(&ctx).unwrap();

        assert!(!endpoint.wait_ready(Duration::from_millis(50)).await);

        port.mark_ready();
        assert!(endpoint.is_ready());
        assert!(endpoint.wait_ready(Duration::from_millis(50)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_ready_gives_up_when_port_dropped() {
        let dir = directory();
        let ctx = ContextRef::new(1);
        let port = dir.attach(ctx, ContextKind::Page);
        let endpoint = dir.endpoint(&ctx).unwrap();

        drop(port);

        assert!(!endpoint.wait_ready(Duration::from_secs(5)).await);
    }

    #[test]
    fn test_signal_reaches_sink() {
        let (replies, _) = mpsc::unbounded_channel();
        let (signals, mut signal_rx) = mpsc::unbounded_channel();
        let dir = ContextDirectory::new(replies, signals);
        let ctx = ContextRef::new(1);
        let port = dir.attach(ctx, ContextKind::Page);

        port.signal(LifecycleSignal::torn_down(ctx));
        assert_eq!(signal_rx.try_recv().unwrap(), LifecycleSignal::torn_down(ctx));

        // Orchestrator gone: the signal is dropped, not a panic
        drop(signal_rx);
        port.signal(LifecycleSignal::torn_down(ctx));
    }
}
