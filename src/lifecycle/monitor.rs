//! Teardown handling and reconciliation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::{BridgeRequest, CorrelatedChannel};
use crate::context::{ContextDirectory, ContextRef};
use crate::registry::{Session, SessionKey, SessionRegistry};

use super::LifecycleSignal;

/// Keeps the registry consistent with the set of live contexts
pub struct LifecycleMonitor {
    registry: Arc<SessionRegistry>,
    channel: Arc<CorrelatedChannel>,
    directory: Arc<ContextDirectory>,
}

impl LifecycleMonitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        channel: Arc<CorrelatedChannel>,
        directory: Arc<ContextDirectory>,
    ) -> Self {
        Self {
            registry,
            channel,
            directory,
        }
    }

    /// Apply one signal; returns how many sessions it removed
    pub fn handle(&self, signal: LifecycleSignal) -> usize {
        match signal {
            LifecycleSignal::ContextTornDown { context } => self.on_teardown(&context).len(),
            LifecycleSignal::PublisherEnded {
                session_key,
                stream_id,
            } => usize::from(self.on_publisher_ended(&session_key, &stream_id).is_some()),
        }
    }

    /// Remove every session bound to `context` and detach it
    ///
    /// Each removed session's route gets a fire-and-forget stop while it is
    /// still reachable; for tab captures that is the worker.
    pub fn on_teardown(&self, context: &ContextRef) -> Vec<Arc<Session>> {
        let removed = self.registry.remove_bound_to(context);
        for session in &removed {
            self.notify_stop(session);
        }

        let detached = self.directory.detach(context);

        tracing::info!(
            context = %context,
            sessions = removed.len(),
            contexts = detached.len(),
            "Context torn down"
        );
        removed
    }

    /// Drop a session whose publisher ended on its own
    ///
    /// No stop is sent; the publisher is already gone. A newer session under
    /// the same key is left alone.
    pub fn on_publisher_ended(&self, key: &SessionKey, stream_id: &str) -> Option<Arc<Session>> {
        let removed = self.registry.remove_publisher(key, stream_id);
        match removed {
            Some(_) => tracing::info!(session = %key, stream = %stream_id, "Publisher ended"),
            None => tracing::debug!(session = %key, stream = %stream_id, "Publisher ended for unknown session"),
        }
        removed
    }

    /// One reconciliation pass
    ///
    /// Removes every Active session whose owner or route is no longer live.
    pub fn reconcile(&self) -> Vec<Arc<Session>> {
        let removed = self.registry.remove_where(|session| {
            !self.directory.is_live(&session.owner) || !self.directory.is_live(&session.route)
        });

        for session in &removed {
            tracing::info!(
                session = %session.key,
                stream = %session.stream_id,
                owner = %session.owner,
                "Session removed by reconciliation"
            );
            self.notify_stop(session);
        }
        removed
    }

    fn notify_stop(&self, session: &Session) {
        let Some(endpoint) = self.directory.endpoint(&session.route) else {
            return;
        };

        if let Err(e) = self.channel.notify(&endpoint, &BridgeRequest::stop_for(session)) {
            tracing::debug!(session = %session.key, error = %e, "Stop notification not delivered");
        }
    }

    /// Spawn the task that applies signals and runs periodic reconciliation
    ///
    /// Ends when every signal sender is gone.
    pub fn spawn(
        self: &Arc<Self>,
        mut signals: mpsc::UnboundedReceiver<LifecycleSignal>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick is immediate; nothing to reconcile yet
            ticker.tick().await;

            loop {
                tokio::select! {
                    signal = signals.recv() => match signal {
                        Some(signal) => {
                            monitor.handle(signal);
                        }
                        None => break,
                    },
                    _ = ticker.tick() => {
                        monitor.reconcile();
                    }
                }
            }

            tracing::debug!("Lifecycle monitor ended");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BridgePort, ContextKind};
    use crate::registry::SessionKind;

    struct Fixture {
        registry: Arc<SessionRegistry>,
        directory: Arc<ContextDirectory>,
        monitor: LifecycleMonitor,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(SessionRegistry::new());
        let channel = Arc::new(CorrelatedChannel::new());
        let (signals, _) = mpsc::unbounded_channel();
        let directory = Arc::new(ContextDirectory::new(channel.reply_sink(), signals));
        let monitor = LifecycleMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&channel),
            Arc::clone(&directory),
        );
        Fixture {
            registry,
            directory,
            monitor,
        }
    }

    async fn add(
        registry: &SessionRegistry,
        key: SessionKey,
        kind: SessionKind,
        owner: ContextRef,
        route: ContextRef,
    ) {
        let session = Session::builder(key.clone(), kind)
            .stream_id(format!("stream_{}", key))
            .owner(owner)
            .route(route)
            .build();
        registry
            .admit(&key, owner, route, move || async move { Ok(session) })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_teardown_removes_bound_sessions_and_notifies_worker() {
        let f = fixture();
        let tab = ContextRef::new(1);
        let _page = f.directory.attach(tab, ContextKind::Page);
        let mut worker: BridgePort = f.directory.attach(ContextRef::worker(), ContextKind::Worker);

        add(&f.registry, SessionKey::element("v1"), SessionKind::Video, tab, tab).await;
        add(&f.registry, SessionKey::tab(1), SessionKind::Tab, tab, ContextRef::worker()).await;
        add(&f.registry, SessionKey::element("v2"), SessionKind::Video, ContextRef::new(2), ContextRef::new(2)).await;

        let removed = f.monitor.on_teardown(&tab);

        assert_eq!(removed.len(), 2);
        assert_eq!(f.registry.len(), 1);
        assert!(!f.directory.is_live(&tab));

        let envelope = worker.recv().await.unwrap();
        assert!(envelope.correlation_id.is_none());
        let request: BridgeRequest = serde_json::from_value(envelope.body).unwrap();
        assert_eq!(
            request,
            BridgeRequest::StopTabCapture {
                stream_id: Some("stream_tab-1".into())
            }
        );
    }

    #[tokio::test]
    async fn test_reconcile_removes_orphans() {
        let f = fixture();
        let live = ContextRef::new(1);
        let _port = f.directory.attach(live, ContextKind::Page);

        add(&f.registry, SessionKey::element("kept"), SessionKind::Video, live, live).await;
        add(&f.registry, SessionKey::element("orphan"), SessionKind::Video, ContextRef::new(9), ContextRef::new(9)).await;

        let removed = f.monitor.reconcile();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].key, SessionKey::element("orphan"));
        assert!(f.registry.get(&SessionKey::element("kept")).is_some());
    }

    #[tokio::test]
    async fn test_publisher_ended() {
        let f = fixture();
        let ctx = ContextRef::new(1);
        add(&f.registry, SessionKey::element("v1"), SessionKind::Video, ctx, ctx).await;

        let signal = LifecycleSignal::PublisherEnded {
            session_key: SessionKey::element("v1"),
            stream_id: "stream_v1".into(),
        };

        assert_eq!(f.monitor.handle(signal.clone()), 1);
        assert_eq!(f.monitor.handle(signal), 0);
        assert!(f.registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_reconciles_on_interval() {
        let f = fixture();
        let ctx = ContextRef::new(1);
        let port = f.directory.attach(ctx, ContextKind::Page);
        add(&f.registry, SessionKey::element("v1"), SessionKind::Video, ctx, ctx).await;

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(f.monitor);
        let task = monitor.spawn(signal_rx, Duration::from_secs(30));

        drop(port);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(f.registry.is_empty());

        drop(signal_tx);
        task.await.unwrap();
    }
}
