//! Session registry implementation
//!
//! The single owner of session state. Every key moves through
//! Absent → Starting → Active → Stopping → Absent, and admission is the only
//! way into Starting, so two starts for one key can never both reach the
//! publish call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::context::ContextRef;
use crate::error::{Error, Result};

use super::config::RegistryConfig;
use super::entry::{Session, SessionSummary, Slot, StartOutcome};
use super::key::SessionKey;

/// Result of a successful admission
#[derive(Debug, Clone)]
pub struct Admission {
    /// The live session for the key
    pub session: Arc<Session>,
    /// `false` when the session already existed (or another caller's start
    /// produced it) and no new publish was made
    pub created: bool,
}

enum AdmitStep {
    Existing(Arc<Session>),
    AwaitStart(watch::Receiver<StartOutcome>),
    AwaitStop(watch::Receiver<bool>),
    Start {
        generation: u64,
        outcome: watch::Sender<StartOutcome>,
    },
}

enum StopStep {
    Missing,
    Begin(Arc<Session>, watch::Sender<bool>),
    AwaitStart(watch::Receiver<StartOutcome>),
    AwaitStop(watch::Receiver<bool>),
}

/// Central registry for all publish sessions
///
/// Locks are never held across an await; waiting on another caller's start
/// or stop goes through the slot's watch channel.
pub struct SessionRegistry {
    slots: RwLock<HashMap<SessionKey, Slot>>,
    next_generation: AtomicU64,
    config: RegistryConfig,
}

impl SessionRegistry {
    /// Create a new registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a new registry with custom configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            config,
        }
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Admit a session for `key`
    ///
    /// If the key already has a live session it is returned unchanged and
    /// `start` is never called. If another caller is starting the same key,
    /// this waits for and shares that caller's outcome. Otherwise the key
    /// enters Starting and `start` runs; its success makes the key Active,
    /// its failure leaves the key Absent. Dropping the returned future while
    /// `start` runs also leaves the key Absent.
    pub async fn admit<F, Fut>(
        &self,
        key: &SessionKey,
        owner: ContextRef,
        route: ContextRef,
        start: F,
    ) -> Result<Admission>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let mut start = Some(start);

        loop {
            match self.admit_step(key, owner, route) {
                AdmitStep::Existing(session) => {
                    tracing::debug!(session = %key, stream = %session.stream_id, "Session already active");
                    return Ok(Admission {
                        session,
                        created: false,
                    });
                }
                AdmitStep::AwaitStart(mut outcome) => {
                    tracing::debug!(session = %key, "Waiting for start in progress");
                    let outcome = outcome.wait_for(Option::is_some).await.map(|o| (*o).clone());
                    match outcome {
                        Ok(Some(Ok(session))) => {
                            return Ok(Admission {
                                session,
                                created: false,
                            })
                        }
                        Ok(Some(Err(e))) => return Err(e),
                        // Starter abandoned without an outcome; try again
                        Ok(None) | Err(_) => continue,
                    }
                }
                AdmitStep::AwaitStop(mut done) => {
                    tracing::debug!(session = %key, "Waiting for stop in progress");
                    let _stopped = done.wait_for(|d| *d).await.is_ok();
                }
                AdmitStep::Start {
                    generation,
                    outcome,
                } => {
                    let start = start
                        .take()
                        .ok_or_else(|| Error::AdmissionConflict(key.clone()))?;
                    return self.run_start(key, generation, outcome, start).await;
                }
            }
        }
    }

    fn admit_step(&self, key: &SessionKey, owner: ContextRef, route: ContextRef) -> AdmitStep {
        let mut slots = self.slots.write();

        match slots.get(key) {
            Some(Slot::Active(session)) => return AdmitStep::Existing(Arc::clone(session)),
            Some(Slot::Starting { outcome, .. }) => return AdmitStep::AwaitStart(outcome.clone()),
            Some(Slot::Stopping { done, .. }) => return AdmitStep::AwaitStop(done.clone()),
            None => {}
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = watch::channel(None);
        slots.insert(
            key.clone(),
            Slot::Starting {
                generation,
                owner,
                route,
                outcome: rx,
            },
        );

        tracing::debug!(session = %key, owner = %owner, route = %route, "Session starting");
        AdmitStep::Start {
            generation,
            outcome: tx,
        }
    }

    async fn run_start<F, Fut>(
        &self,
        key: &SessionKey,
        generation: u64,
        outcome: watch::Sender<StartOutcome>,
        start: F,
    ) -> Result<Admission>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session>>,
    {
        let guard = StartingGuard {
            registry: self,
            key,
            generation,
        };

        let result = match start().await {
            Ok(session) => self.commit(key, generation, session),
            Err(e) => Err(e),
        };

        // Clears the slot unless the commit made it Active
        drop(guard);

        if let Err(ref e) = result {
            tracing::info!(session = %key, error = %e, "Session start failed");
        }
        outcome.send_replace(Some(result.clone()));

        result.map(|session| Admission {
            session,
            created: true,
        })
    }

    /// Write the Active session, re-checking the slot first
    fn commit(&self, key: &SessionKey, generation: u64, session: Session) -> Result<Arc<Session>> {
        let session = Arc::new(session);
        let mut slots = self.slots.write();

        match slots.get(key) {
            Some(Slot::Starting { generation: g, .. }) if *g == generation => {}
            None => {
                // Torn down mid-start; the next reconcile pass removes it if
                // the owner is really gone
                tracing::warn!(
                    session = %key,
                    owner = %session.owner,
                    "Slot cleared during start, committing anyway"
                );
            }
            Some(_) => {
                tracing::warn!(session = %key, "Slot superseded during start");
                return Err(Error::AdmissionConflict(key.clone()));
            }
        }

        slots.insert(key.clone(), Slot::Active(Arc::clone(&session)));

        tracing::info!(
            session = %key,
            kind = ?session.kind,
            stream = %session.stream_id,
            room = ?session.room_id,
            owner = %session.owner,
            "Session active"
        );
        Ok(session)
    }

    fn clear_starting(&self, key: &SessionKey, generation: u64) {
        let mut slots = self.slots.write();
        if matches!(slots.get(key), Some(Slot::Starting { generation: g, .. }) if *g == generation)
        {
            slots.remove(key);
        }
    }

    /// Move an Active session to Stopping
    ///
    /// Waits out a start or stop already in flight for the key. Returns
    /// [`Error::NotFound`] when there is nothing to stop. The key becomes
    /// Absent when the returned ticket is dropped, whatever the stop round
    /// trip did.
    pub async fn begin_stop(&self, key: &SessionKey) -> Result<StopTicket<'_>> {
        loop {
            match self.stop_step(key) {
                StopStep::Missing => return Err(Error::NotFound(key.clone())),
                StopStep::Begin(session, done) => {
                    return Ok(StopTicket {
                        registry: self,
                        session,
                        done,
                    });
                }
                StopStep::AwaitStart(mut outcome) => {
                    let _settled = outcome.wait_for(Option::is_some).await.is_ok();
                }
                StopStep::AwaitStop(mut done) => {
                    let _stopped = done.wait_for(|d| *d).await.is_ok();
                }
            }
        }
    }

    fn stop_step(&self, key: &SessionKey) -> StopStep {
        let mut slots = self.slots.write();

        let session = match slots.get(key) {
            None => return StopStep::Missing,
            Some(Slot::Starting { outcome, .. }) => return StopStep::AwaitStart(outcome.clone()),
            Some(Slot::Stopping { done, .. }) => return StopStep::AwaitStop(done.clone()),
            Some(Slot::Active(session)) => Arc::clone(session),
        };

        let (done_tx, done_rx) = watch::channel(false);
        slots.insert(
            key.clone(),
            Slot::Stopping {
                session: Arc::clone(&session),
                done: done_rx,
            },
        );

        tracing::debug!(session = %key, stream = %session.stream_id, "Session stopping");
        StopStep::Begin(session, done_tx)
    }

    fn finish_stop(&self, session: &Arc<Session>) {
        let mut slots = self.slots.write();
        let ours = matches!(
            slots.get(&session.key),
            Some(Slot::Stopping { session: s, .. }) if Arc::ptr_eq(s, session)
        );
        if ours {
            slots.remove(&session.key);
            tracing::info!(session = %session.key, stream = %session.stream_id, "Session stopped");
        }
    }

    /// Get the Active session for a key
    pub fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        match self.slots.read().get(key) {
            Some(Slot::Active(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Snapshot of all Active sessions, oldest first
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        let mut sessions: Vec<Arc<Session>> = self
            .slots
            .read()
            .values()
            .filter_map(|slot| match slot {
                Slot::Active(session) => Some(Arc::clone(session)),
                _ => None,
            })
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.key.cmp(&b.key)));
        sessions
    }

    /// Summaries of all Active sessions with freshly derived links
    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions()
            .iter()
            .map(|session| session.summary(&self.config.links))
            .collect()
    }

    /// Remove a key whatever its state; absent keys are fine
    pub fn remove(&self, key: &SessionKey) -> Option<Arc<Session>> {
        match self.slots.write().remove(key)? {
            Slot::Active(session) | Slot::Stopping { session, .. } => {
                tracing::info!(session = %key, stream = %session.stream_id, "Session removed");
                Some(session)
            }
            Slot::Starting { .. } => {
                tracing::debug!(session = %key, "Starting session removed");
                None
            }
        }
    }

    /// Remove every session bound to a context, including starts in flight
    ///
    /// Returns the Active sessions that were removed. Stopping sessions are
    /// left to their stop ticket.
    pub fn remove_bound_to(&self, context: &ContextRef) -> Vec<Arc<Session>> {
        let mut slots = self.slots.write();
        let keys: Vec<SessionKey> = slots
            .iter()
            .filter(|(_, slot)| !matches!(slot, Slot::Stopping { .. }) && slot.is_bound_to(context))
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = Vec::new();
        for key in keys {
            if let Some(Slot::Active(session)) = slots.remove(&key) {
                removed.push(session);
            }
        }
        removed
    }

    /// Remove every Active session matching a predicate
    pub fn remove_where<P>(&self, mut predicate: P) -> Vec<Arc<Session>>
    where
        P: FnMut(&Session) -> bool,
    {
        let mut slots = self.slots.write();
        let keys: Vec<SessionKey> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Active(session) if predicate(session)))
            .map(|(key, _)| key.clone())
            .collect();

        keys.iter()
            .filter_map(|key| match slots.remove(key) {
                Some(Slot::Active(session)) => Some(session),
                _ => None,
            })
            .collect()
    }

    /// Remove an Active session only if it still publishes `stream_id`
    pub fn remove_publisher(&self, key: &SessionKey, stream_id: &str) -> Option<Arc<Session>> {
        let mut slots = self.slots.write();
        match slots.get(key) {
            Some(Slot::Active(session)) if session.stream_id == stream_id => {}
            _ => return None,
        }
        match slots.remove(key) {
            Some(Slot::Active(session)) => Some(session),
            _ => None,
        }
    }

    /// Number of keys in any state
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// Whether no key is tracked
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears a Starting slot if its start never committed
struct StartingGuard<'a> {
    registry: &'a SessionRegistry,
    key: &'a SessionKey,
    generation: u64,
}

impl Drop for StartingGuard<'_> {
    fn drop(&mut self) {
        self.registry.clear_starting(self.key, self.generation);
    }
}

/// Exclusive right to stop one session
///
/// Dropping the ticket makes the key Absent and releases anyone waiting to
/// start it again.
pub struct StopTicket<'a> {
    registry: &'a SessionRegistry,
    session: Arc<Session>,
    done: watch::Sender<bool>,
}

impl StopTicket<'_> {
    /// The session being stopped
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for StopTicket<'_> {
    fn drop(&mut self) {
        self.registry.finish_stop(&self.session);
        self.done.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::registry::SessionKind;

    fn session(key: &SessionKey, owner: ContextRef) -> Session {
        Session::builder(key.clone(), SessionKind::Video)
            .stream_id(format!("stream_{}", key))
            .server("vdo.ninja")
            .owner(owner)
            .build()
    }

    async fn admit_now(registry: &SessionRegistry, key: &SessionKey, owner: ContextRef) -> Arc<Session> {
        registry
            .admit(key, owner, owner, move || async move { Ok(session(key, owner)) })
            .await
            .unwrap()
            .session
    }

    #[tokio::test]
    async fn test_admit_existing_skips_factory() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("v1");
        let owner = ContextRef::new(1);

        let first = admit_now(&registry, &key, owner).await;

        let calls = &AtomicUsize::new(0);
        let again = registry
            .admit(&key, owner, owner, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(session(&SessionKey::element("other"), owner))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!again.created);
        assert!(Arc::ptr_eq(&first, &again.session));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_admission_starts_once() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("v1");
        let owner = ContextRef::new(1);
        let calls = &AtomicUsize::new(0);
        let key_ref = &key;

        let start = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(session(key_ref, owner))
        };

        let (a, b) = tokio::join!(
            registry.admit(&key, owner, owner, start),
            registry.admit(&key, owner, owner, start),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(a.created ^ b.created);
        assert!(Arc::ptr_eq(&a.session, &b.session));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_is_shared_and_leaves_absent() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("v1");
        let owner = ContextRef::new(1);

        let failing = || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err::<Session, _>(Error::RemoteFailure("Refusing to capture".into()))
        };

        let (a, b) = tokio::join!(
            registry.admit(&key, owner, owner, failing),
            registry.admit(&key, owner, owner, failing),
        );

        assert!(matches!(a, Err(Error::RemoteFailure(_))));
        assert!(matches!(b, Err(Error::RemoteFailure(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_start_clears_slot() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("v1");
        let owner = ContextRef::new(1);

        let key_ref = &key;
        let slow = registry.admit(&key, owner, owner, move || async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(session(key_ref, owner))
        });
        assert!(tokio::time::timeout(Duration::from_millis(10), slow).await.is_err());
        assert!(registry.is_empty());

        let admitted = registry
            .admit(&key, owner, owner, move || async move { Ok(session(key_ref, owner)) })
            .await
            .unwrap();
        assert!(admitted.created);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_during_start_still_commits() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("v1");
        let owner = ContextRef::new(1);

        let key_ref = &key;
        let start = registry.admit(&key, owner, owner, move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(session(key_ref, owner))
        });
        let teardown = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            registry.remove_bound_to(&owner)
        };

        let (admitted, removed) = tokio::join!(start, teardown);

        assert!(removed.is_empty());
        assert!(admitted.unwrap().created);
        // Left for the reconcile pass
        assert!(registry.get(&key).is_some());
    }

    #[tokio::test]
    async fn test_stop_unknown_is_not_found() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("missing");

        let err = registry.begin_stop(&key).await.err().unwrap();

        assert_eq!(err, Error::NotFound(key));
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ticket_lifecycle() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("v1");
        let owner = ContextRef::new(1);
        admit_now(&registry, &key, owner).await;

        let ticket = registry.begin_stop(&key).await.unwrap();
        assert_eq!(ticket.session().key, key);
        assert!(registry.get(&key).is_none());
        assert!(registry.list().is_empty());
        assert_eq!(registry.len(), 1);

        // A restart waits for the stop to finish
        let key_ref = &key;
        let restart =
            registry.admit(&key, owner, owner, move || async move { Ok(session(key_ref, owner)) });
        let finish = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(ticket);
        };
        let (admitted, _) = tokio::join!(restart, finish);

        assert!(admitted.unwrap().created);
        assert!(registry.get(&key).is_some());
    }

    #[tokio::test]
    async fn test_remove_bound_to_context() {
        let registry = SessionRegistry::new();
        let a = ContextRef::new(1);
        let b = ContextRef::new(2);

        admit_now(&registry, &SessionKey::element("a1"), a).await;
        admit_now(&registry, &SessionKey::element("a2"), ContextRef::frame(1, 4)).await;
        admit_now(&registry, &SessionKey::element("b1"), b).await;

        let removed = registry.remove_bound_to(&a);

        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&SessionKey::element("b1")).is_some());
    }

    #[tokio::test]
    async fn test_remove_publisher_checks_stream() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("v1");
        let session = admit_now(&registry, &key, ContextRef::new(1)).await;

        assert!(registry.remove_publisher(&key, "stream_other").is_none());
        assert!(registry.remove_publisher(&key, &session.stream_id).is_some());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_list_derives_links() {
        let registry = SessionRegistry::new();
        let key = SessionKey::element("v1");
        admit_now(&registry, &key, ContextRef::new(1)).await;

        let list = registry.list();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, key);
        assert_eq!(list[0].links.len(), 1);
        assert_eq!(list[0].links[0].url, "https://vdo.ninja/?view=stream_v1");
    }

    #[test]
    fn test_remove_absent_is_fine() {
        let registry = SessionRegistry::new();
        assert!(registry.remove(&SessionKey::element("nope")).is_none());
    }
}
