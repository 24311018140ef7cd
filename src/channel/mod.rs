//! Correlated request/response channel
//!
//! Calls into a foreign context that the orchestrator cannot own or block on.
//! Every call carries a fresh correlation id and waits for exactly one
//! matching reply or for its deadline, whichever comes first.
//!
//! # Message Flow
//!
//! 1. Caller invokes [`CorrelatedChannel::send`] with an endpoint and request
//! 2. Channel allocates a correlation id and parks a oneshot in the pending table
//! 3. The request envelope is pushed into the target context's mailbox
//! 4. The bridge answers on the shared reply sink
//! 5. The dispatcher task takes the pending entry by id and completes the oneshot
//! 6. If the deadline passes first, the caller takes the entry itself and
//!    resolves with a synthetic timed-out reply
//!
//! A reply whose entry is already gone (late, or never issued) is dropped.

pub mod config;
pub mod envelope;
pub mod message;
mod pending;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::context::directory::ReplySink;
use crate::context::ContextEndpoint;
use crate::error::{Error, Result};

use pending::{PendingCorrelation, PendingGuard, PendingTable};

pub use config::{ChannelConfig, Operation};
pub use envelope::{CorrelationId, ReplyEnvelope, RequestEnvelope};
pub use message::{BridgeReply, BridgeRequest};

/// Request/response correlation over context mailboxes
pub struct CorrelatedChannel {
    config: ChannelConfig,
    next_id: AtomicU64,
    pending: PendingTable,
    reply_tx: ReplySink,
    reply_rx: Mutex<Option<mpsc::UnboundedReceiver<ReplyEnvelope>>>,
}

impl CorrelatedChannel {
    /// Create a channel with default timeouts
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    /// Create a channel with custom timeouts
    pub fn with_config(config: ChannelConfig) -> Self {
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        Self {
            config,
            next_id: AtomicU64::new(1),
            pending: PendingTable::default(),
            reply_tx,
            reply_rx: Mutex::new(Some(reply_rx)),
        }
    }

    /// Get the channel configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Sink that bridges emit replies on
    pub fn reply_sink(&self) -> ReplySink {
        self.reply_tx.clone()
    }

    /// Number of requests still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Send a request with the deadline configured for its operation
    pub async fn send(
        &self,
        endpoint: &ContextEndpoint,
        request: &BridgeRequest,
    ) -> Result<BridgeReply> {
        let timeout = self.config.timeout_for(request.operation());
        self.send_with_timeout(endpoint, request, timeout).await
    }

    /// Send a request and wait for its reply or the deadline
    ///
    /// A deadline expiry is not an error: it resolves with
    /// [`BridgeReply::timed_out`] and the caller decides what it means. The
    /// only errors are failing to serialize the request and the target
    /// context being gone before the request could be delivered.
    pub async fn send_with_timeout(
        &self,
        endpoint: &ContextEndpoint,
        request: &BridgeRequest,
        timeout: Duration,
    ) -> Result<BridgeReply> {
        let operation = request.operation();
        let id = CorrelationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let envelope = RequestEnvelope::correlated(id, request)?;

        let (tx, mut rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCorrelation {
                operation,
                context: endpoint.context(),
                issued_at: Instant::now(),
                resolve: tx,
            },
        );
        let _guard = PendingGuard::new(&self.pending, id);

        endpoint.deliver(envelope)?;

        tracing::trace!(
            correlation_id = %id,
            context = %endpoint.context(),
            operation = %operation,
            "Request sent"
        );

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(reply)) => Ok(reply),
            // Entry taken without a reply being sent: the channel is shutting down
            Ok(Err(_)) => Err(Error::ContextUnreachable(endpoint.context())),
            Err(_) => {
                // A reply that won the race to the entry is still honoured
                if self.pending.take(id).is_none() {
                    if let Ok(reply) = rx.try_recv() {
                        return Ok(reply);
                    }
                }

                tracing::debug!(
                    correlation_id = %id,
                    context = %endpoint.context(),
                    operation = %operation,
                    timeout_ms = timeout.as_millis() as u64,
                    "Request timed out"
                );
                Ok(BridgeReply::timed_out(operation))
            }
        }
    }

    /// Fire-and-forget: deliver a request that expects no reply
    pub fn notify(&self, endpoint: &ContextEndpoint, request: &BridgeRequest) -> Result<()> {
        endpoint.deliver(RequestEnvelope::notification(request)?)
    }

    /// Route one reply to its waiting caller
    ///
    /// Returns `false` when no caller is waiting for the id; the reply is
    /// dropped.
    pub fn dispatch(&self, reply: ReplyEnvelope) -> bool {
        let Some(pending) = self.pending.take(reply.correlation_id) else {
            tracing::debug!(
                correlation_id = %reply.correlation_id,
                "Dropping reply with no pending request"
            );
            return false;
        };

        let body = serde_json::from_value::<BridgeReply>(reply.body).unwrap_or_else(|e| {
            tracing::warn!(
                correlation_id = %reply.correlation_id,
                context = %pending.context,
                error = %e,
                "Malformed reply"
            );
            BridgeReply::failure(format!("malformed reply: {}", e))
        });

        tracing::trace!(
            correlation_id = %reply.correlation_id,
            context = %pending.context,
            operation = %pending.operation,
            elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
            "Reply received"
        );

        // Receiver may have been dropped by an abandoned caller
        let _ = pending.resolve.send(body);
        true
    }

    /// Spawn the task that routes replies to waiting callers
    ///
    /// Can only be called once per channel; later calls return `None`.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> Option<tokio::task::JoinHandle<()>> {
        let mut reply_rx = self.reply_rx.lock().take()?;
        let channel = Arc::clone(self);

        Some(tokio::spawn(async move {
            while let Some(reply) = reply_rx.recv().await {
                channel.dispatch(reply);
            }
            tracing::debug!("Reply dispatcher ended");
        }))
    }
}

impl Default for CorrelatedChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextDirectory, ContextKind, ContextRef};

    fn setup(channel: &CorrelatedChannel) -> ContextDirectory {
        let (signals, _) = mpsc::unbounded_channel();
        ContextDirectory::new(channel.reply_sink(), signals)
    }

    fn stop(stream_id: &str) -> BridgeRequest {
        BridgeRequest::Stop {
            stream_id: stream_id.into(),
        }
    }

    #[tokio::test]
    async fn test_reply_resolves_request() {
        let channel = Arc::new(CorrelatedChannel::new());
        let _dispatcher = channel.spawn_dispatcher().unwrap();
        let dir = setup(&channel);
        let ctx = ContextRef::new(1);
        let mut port = dir.attach(ctx, ContextKind::Page);

        tokio::spawn(async move {
            while let Some(env) = port.recv().await {
                let id = env.correlation_id.unwrap();
                port.reply(id, &BridgeReply::ok());
            }
        });

        let endpoint = dir.endpoint(&ctx).unwrap();
        let reply = channel.send(&endpoint, &stop("s1")).await.unwrap();

        assert!(reply.success);
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_resolves_with_synthetic_reply() {
        let channel = CorrelatedChannel::new();
        let dir = setup(&channel);
        let ctx = ContextRef::new(1);
        let _port = dir.attach(ctx, ContextKind::Page);
        let endpoint = dir.endpoint(&ctx).unwrap();

        let reply = channel
            .send_with_timeout(&endpoint, &stop("s1"), Duration::from_millis(100))
            .await
            .unwrap();

        assert!(reply.is_timed_out());
        assert_eq!(reply.error.as_deref(), Some("stop request timed out"));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_dropped() {
        let channel = CorrelatedChannel::new();
        let dir = setup(&channel);
        let ctx = ContextRef::new(1);
        let mut port = dir.attach(ctx, ContextKind::Page);
        let endpoint = dir.endpoint(&ctx).unwrap();

        let reply = channel
            .send_with_timeout(&endpoint, &stop("s1"), Duration::from_millis(10))
            .await
            .unwrap();
        assert!(reply.is_timed_out());

        let env = port.recv().await.unwrap();
        let late = ReplyEnvelope::encode(env.correlation_id.unwrap(), &BridgeReply::ok()).unwrap();

        assert!(!channel.dispatch(late));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_context() {
        let channel = CorrelatedChannel::new();
        let dir = setup(&channel);
        let ctx = ContextRef::new(1);
        let port = dir.attach(ctx, ContextKind::Page);
        let endpoint = dir.endpoint(&ctx).unwrap();
        drop(port);

        let err = channel.send(&endpoint, &stop("s1")).await.unwrap_err();

        assert_eq!(err, Error::ContextUnreachable(ctx));
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_notify_carries_no_correlation() {
        let channel = CorrelatedChannel::new();
        let dir = setup(&channel);
        let ctx = ContextRef::worker();
        let mut port = dir.attach(ctx, ContextKind::Worker);
        let endpoint = dir.endpoint(&ctx).unwrap();

        channel
            .notify(&endpoint, &BridgeRequest::StopTabCapture { stream_id: None })
            .unwrap();

        let env = port.recv().await.unwrap();
        assert!(env.correlation_id.is_none());
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_reply_is_a_failure() {
        let channel = Arc::new(CorrelatedChannel::new());
        let _dispatcher = channel.spawn_dispatcher().unwrap();
        let dir = setup(&channel);
        let ctx = ContextRef::new(1);
        let mut port = dir.attach(ctx, ContextKind::Page);
        let sink = channel.reply_sink();

        tokio::spawn(async move {
            let env = port.recv().await.unwrap();
            let _ = sink.send(ReplyEnvelope {
                correlation_id: env.correlation_id.unwrap(),
                body: serde_json::json!("garbage"),
            });
        });

        let endpoint = dir.endpoint(&ctx).unwrap();
        let reply = channel.send(&endpoint, &stop("s1")).await.unwrap();

        assert!(!reply.success);
        assert!(reply.error.unwrap().starts_with("malformed reply"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_timeouts_leave_no_pending_entries() {
        let channel = Arc::new(CorrelatedChannel::new());
        let _dispatcher = channel.spawn_dispatcher().unwrap();
        let dir = setup(&channel);
        let ctx = ContextRef::new(1);
        let mut port = dir.attach(ctx, ContextKind::Page);

        // Answer only even-numbered correlation ids
        tokio::spawn(async move {
            while let Some(env) = port.recv().await {
                let id = env.correlation_id.unwrap();
                if id.0 % 2 == 0 {
                    port.reply(id, &BridgeReply::ok());
                }
            }
        });

        let endpoint = dir.endpoint(&ctx).unwrap();
        let mut handles = Vec::with_capacity(1000);
        for i in 0..1000 {
            let channel = Arc::clone(&channel);
            let endpoint = endpoint.clone();
            handles.push(tokio::spawn(async move {
                channel
                    .send_with_timeout(
                        &endpoint,
                        &stop(&format!("s{}", i)),
                        Duration::from_millis(500),
                    )
                    .await
                    .unwrap()
            }));
        }

        let mut answered = 0;
        let mut timed_out = 0;
        for handle in handles {
            let reply = handle.await.unwrap();
            if reply.is_timed_out() {
                timed_out += 1;
            } else {
                assert!(reply.success);
                answered += 1;
            }
        }

        assert_eq!(answered, 500);
        assert_eq!(timed_out, 500);
        assert_eq!(channel.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_call_removes_entry() {
        let channel = CorrelatedChannel::new();
        let dir = setup(&channel);
        let ctx = ContextRef::new(1);
        let _port = dir.attach(ctx, ContextKind::Page);
        let endpoint = dir.endpoint(&ctx).unwrap();

        let request = stop("s1");
        let call = channel.send_with_timeout(&endpoint, &request, Duration::from_secs(60));
        let outcome = tokio::time::timeout(Duration::from_millis(10), call).await;

        assert!(outcome.is_err());
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn test_dispatcher_spawns_once() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let channel = Arc::new(CorrelatedChannel::new());
            assert!(channel.spawn_dispatcher().is_some());
            assert!(channel.spawn_dispatcher().is_none());
        });
    }
}
