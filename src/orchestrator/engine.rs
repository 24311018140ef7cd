//! Session orchestrator
//!
//! Drives every session through Absent → Starting → Active → Stopping →
//! Absent. Admission goes through the registry, remote work goes through the
//! correlated channel, and context loss goes through the lifecycle monitor.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::channel::{BridgeReply, BridgeRequest, CorrelatedChannel};
use crate::context::{BridgePort, ContextDirectory, ContextEndpoint, ContextKind, ContextRef, WorkerLauncher};
use crate::error::{Error, Result};
use crate::lifecycle::{LifecycleMonitor, LifecycleSignal};
use crate::registry::{Session, SessionKey, SessionKind, SessionRegistry, SessionSummary};
use crate::session::{generate_stream_id, PublishSettings};

use super::command::{AckReply, CheckReply, Command, CommandReply, StartReply, Started, ThumbnailReply};
use super::config::OrchestratorConfig;

/// The orchestrator context
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: Arc<SessionRegistry>,
    channel: Arc<CorrelatedChannel>,
    directory: Arc<ContextDirectory>,
    monitor: Arc<LifecycleMonitor>,
    launcher: Option<Arc<dyn WorkerLauncher>>,
    /// Serializes worker launches
    worker_gate: tokio::sync::Mutex<()>,
    signals: Mutex<Option<mpsc::UnboundedReceiver<LifecycleSignal>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator
    ///
    /// Call [`spawn_background`](Self::spawn_background) before sending any
    /// request, or replies and lifecycle signals are never processed.
    pub fn new(config: OrchestratorConfig) -> Self {
        let registry = Arc::new(SessionRegistry::with_config(config.registry.clone()));
        let channel = Arc::new(CorrelatedChannel::with_config(config.channel.clone()));
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let directory = Arc::new(ContextDirectory::new(channel.reply_sink(), signal_tx));
        let monitor = Arc::new(LifecycleMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&channel),
            Arc::clone(&directory),
        ));

        Self {
            config,
            registry,
            channel,
            directory,
            monitor,
            launcher: None,
            worker_gate: tokio::sync::Mutex::new(()),
            signals: Mutex::new(Some(signal_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Use a launcher to create the capture worker on demand
    pub fn with_worker_launcher(mut self, launcher: impl WorkerLauncher) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    /// Start the reply dispatcher and the lifecycle monitor
    ///
    /// Only the first call spawns anything.
    pub fn spawn_background(&self) {
        let mut tasks = self.tasks.lock();

        if let Some(dispatcher) = self.channel.spawn_dispatcher() {
            tasks.push(dispatcher);
        }
        if let Some(signals) = self.signals.lock().take() {
            tasks.push(
                self.monitor
                    .spawn(signals, self.config.registry.reconcile_interval),
            );
        }
    }

    /// Abort the background tasks
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!(sessions = self.registry.len(), "Orchestrator shut down");
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<ContextDirectory> {
        &self.directory
    }

    pub fn channel(&self) -> &Arc<CorrelatedChannel> {
        &self.channel
    }

    /// Attach a page context and get the port its bridge serves
    pub fn attach_page(&self, context: ContextRef) -> BridgePort {
        self.directory.attach(context, ContextKind::Page)
    }

    /// Process one command
    pub async fn handle(&self, command: Command) -> CommandReply {
        match command {
            Command::StartPublish {
                session_key,
                context,
                settings,
                title,
            } => CommandReply::Start(StartReply::from(
                self.start_publish(&session_key, context, settings, title).await,
            )),
            Command::StopPublish {
                session_key,
                context,
            } => CommandReply::Ack(AckReply::from(self.stop_publish(&session_key, context).await)),
            Command::StartTabCapture {
                context,
                audio,
                video,
                settings,
                title,
            } => CommandReply::Start(StartReply::from(
                self.start_tab_capture(context, audio, video, settings, title)
                    .await,
            )),
            Command::StopTabCapture { context } => {
                CommandReply::Ack(AckReply::from(self.stop_tab_capture(context).await))
            }
            Command::CheckExisting { session_key } => {
                CommandReply::Check(CheckReply::from(self.check_existing(&session_key)))
            }
            Command::ListActive => CommandReply::List(self.list_active()),
            Command::CaptureThumbnail { session_key } => CommandReply::Thumbnail(
                ThumbnailReply::from(self.capture_thumbnail(&session_key).await),
            ),
        }
    }

    /// Start publishing an on-page media element
    ///
    /// Returns the existing session without any remote call if the key is
    /// already live.
    pub async fn start_publish(
        &self,
        key: &SessionKey,
        context: ContextRef,
        settings: PublishSettings,
        title: String,
    ) -> Result<Started> {
        let stream_id = settings
            .effective_stream_id()
            .map(str::to_string)
            .unwrap_or_else(generate_stream_id);

        let session = Session::builder(key.clone(), SessionKind::Video)
            .stream_id(stream_id)
            .room_id(settings.effective_room_id().map(str::to_string))
            .server(settings.effective_server(&self.config.default_server))
            .owner(context)
            .title(title)
            .quality(settings.quality)
            .build();

        let request = BridgeRequest::Publish {
            session_key: key.clone(),
            target: key.as_str().to_string(),
            stream_id: session.stream_id.clone(),
            room_id: session.room_id.clone(),
            title: session.title.clone(),
            password: session.quality.effective_password().map(str::to_string),
            server: session.server.clone(),
        };

        self.admit(key, session, request).await
    }

    /// Start capturing a whole tab in the capture worker
    pub async fn start_tab_capture(
        &self,
        context: ContextRef,
        audio: bool,
        video: bool,
        settings: PublishSettings,
        title: Option<String>,
    ) -> Result<Started> {
        let tab = ContextRef::new(context.context_id);
        let key = SessionKey::tab(tab.context_id);

        if !self.directory.is_live(&tab) {
            return Err(Error::ContextUnreachable(tab));
        }

        let stream_id = settings
            .effective_stream_id()
            .map(str::to_string)
            .unwrap_or_else(generate_stream_id);
        let title = title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| self.config.default_tab_title.clone());

        let session = Session::builder(key.clone(), SessionKind::Tab)
            .stream_id(stream_id)
            .room_id(settings.effective_room_id().map(str::to_string))
            .server(settings.effective_server(&self.config.default_server))
            .owner(tab)
            .route(ContextRef::worker())
            .title(title)
            .quality(settings.quality)
            .build();

        let request = BridgeRequest::StartTabCapture {
            session_key: key.clone(),
            tab,
            audio,
            video,
            stream_id: session.stream_id.clone(),
            room_id: session.room_id.clone(),
            server: session.server.clone(),
            quality: session.quality.clone(),
            title: session.title.clone(),
        };

        self.admit(&key, session, request).await
    }

    /// Admit `session`, making the start round trip if the key is Absent
    async fn admit(&self, key: &SessionKey, session: Session, request: BridgeRequest) -> Result<Started> {
        let owner = session.owner;
        let route = session.route;
        let stop = BridgeRequest::stop_for(&session);
        let request = &request;
        let stop_ref = &stop;

        let admitted = self
            .registry
            .admit(key, owner, route, move || async move {
                let endpoint = self.route_endpoint(&route).await?;
                let reply = self.channel.send(&endpoint, request).await?;

                if reply.is_timed_out() {
                    // The publisher may still come up late; make sure it does not linger
                    self.notify_stop(&endpoint, key, stop_ref);
                }
                reply.into_result()?;
                Ok::<_, Error>(session)
            })
            .await;

        match admitted {
            Ok(admission) => Ok(self.started(admission.session, admission.created)),
            Err(Error::AdmissionConflict(_)) => {
                // Published, then lost the slot to another session
                if let Some(endpoint) = self.directory.endpoint(&route) {
                    self.notify_stop(&endpoint, key, &stop);
                }
                let existing = self
                    .registry
                    .get(key)
                    .ok_or_else(|| Error::AdmissionConflict(key.clone()))?;
                Ok(self.started(existing, false))
            }
            Err(e) => {
                tracing::warn!(session = %key, context = %owner, error = %e, "Start failed");
                Err(e)
            }
        }
    }

    fn started(&self, session: Arc<Session>, created: bool) -> Started {
        Started {
            links: session.links(&self.config.registry.links),
            session,
            created,
        }
    }

    /// Endpoint for a route, launching the worker or waiting for page
    /// readiness as needed
    async fn route_endpoint(&self, route: &ContextRef) -> Result<ContextEndpoint> {
        if route.is_worker() {
            return self.ensure_worker().await;
        }

        let endpoint = self
            .directory
            .endpoint(route)
            .ok_or(Error::ContextUnreachable(*route))?;

        if !endpoint.wait_ready(self.config.readiness_timeout).await {
            tracing::warn!(context = %route, "Context not ready, proceeding anyway");
        }
        Ok(endpoint)
    }

    async fn ensure_worker(&self) -> Result<ContextEndpoint> {
        let worker = ContextRef::worker();
        let _gate = self.worker_gate.lock().await;

        if let Some(endpoint) = self.directory.endpoint(&worker) {
            if !endpoint.wait_ready(self.config.readiness_timeout).await {
                tracing::warn!("Capture worker not ready, proceeding anyway");
            }
            return Ok(endpoint);
        }

        let launcher = self
            .launcher
            .as_ref()
            .ok_or(Error::ContextUnreachable(worker))?;

        tracing::info!("Launching capture worker");
        let port = self.directory.attach(worker, ContextKind::Worker);
        if let Err(e) = launcher.launch(port).await {
            self.directory.detach(&worker);
            return Err(e);
        }

        let endpoint = self
            .directory
            .endpoint(&worker)
            .ok_or(Error::ContextUnreachable(worker))?;
        if !endpoint.wait_ready(self.config.worker_launch_timeout).await {
            self.directory.detach(&worker);
            return Err(Error::Timeout("capture worker launch".to_string()));
        }

        Ok(endpoint)
    }

    /// Stop a session
    ///
    /// Unknown keys are [`Error::NotFound`]. Every other failure is logged
    /// and the session is removed anyway.
    pub async fn stop_publish(&self, key: &SessionKey, context: Option<ContextRef>) -> Result<()> {
        let ticket = self.registry.begin_stop(key).await?;
        let session = Arc::clone(ticket.session());

        if let Some(context) = context {
            if !context.covers(&session.owner) && !session.owner.covers(&context) {
                tracing::debug!(session = %key, context = %context, owner = %session.owner, "Stop from a context other than the owner");
            }
        }

        let outcome = match self.directory.endpoint(&session.route) {
            Some(endpoint) => self
                .channel
                .send(&endpoint, &BridgeRequest::stop_for(&session))
                .await
                .and_then(BridgeReply::into_result)
                .map(|_| ()),
            None => Err(Error::ContextUnreachable(session.route)),
        };

        if let Err(e) = outcome {
            tracing::warn!(session = %key, stream = %session.stream_id, error = %e, "Stop failed, removing anyway");
        }

        drop(ticket);
        Ok(())
    }

    /// Stop a tab capture
    pub async fn stop_tab_capture(&self, context: ContextRef) -> Result<()> {
        self.stop_publish(&SessionKey::tab(context.context_id), Some(context))
            .await
    }

    /// The live session for a key, with links
    pub fn check_existing(&self, key: &SessionKey) -> Option<SessionSummary> {
        self.registry
            .get(key)
            .map(|session| session.summary(&self.config.registry.links))
    }

    /// Every live session, oldest first
    pub fn list_active(&self) -> Vec<SessionSummary> {
        self.registry.list()
    }

    /// Grab a still of a live session as a JPEG data URL
    pub async fn capture_thumbnail(&self, key: &SessionKey) -> Result<String> {
        let session = self
            .registry
            .get(key)
            .ok_or_else(|| Error::NotFound(key.clone()))?;
        let endpoint = self
            .directory
            .endpoint(&session.route)
            .ok_or(Error::ContextUnreachable(session.route))?;

        let reply = self
            .channel
            .send(
                &endpoint,
                &BridgeRequest::Thumbnail {
                    stream_id: session.stream_id.clone(),
                },
            )
            .await?
            .into_result()?;

        reply
            .data_url
            .ok_or_else(|| Error::RemoteFailure("thumbnail reply carried no image".to_string()))
    }

    /// Handle a context teardown immediately
    ///
    /// Hosts can also send [`LifecycleSignal::ContextTornDown`] on the
    /// directory's signal sink; this is the synchronous form.
    pub fn context_torn_down(&self, context: ContextRef) -> usize {
        self.monitor.on_teardown(&context).len()
    }

    /// Run one reconciliation pass now
    pub fn reconcile(&self) -> usize {
        self.monitor.reconcile().len()
    }

    fn notify_stop(&self, endpoint: &ContextEndpoint, key: &SessionKey, stop: &BridgeRequest) {
        if let Err(e) = self.channel.notify(endpoint, stop) {
            tracing::debug!(session = %key, error = %e, "Stop notification not delivered");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
