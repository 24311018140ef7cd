//! Session entries
//!
//! A [`Session`] is immutable once admitted; the registry replaces it, never
//! patches it. The registry stores each key's [`Slot`], which is where the
//! per-key lifecycle (Starting, Active, Stopping) lives.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::context::ContextRef;
use crate::error::Result;
use crate::session::QualitySettings;

use super::key::{SessionKey, SessionKind};
use super::links::{derive_links, LinkConfig, ViewerLink};

/// A live publish session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub key: SessionKey,
    pub kind: SessionKind,
    pub stream_id: String,
    pub room_id: Option<String>,
    pub server: String,
    /// Context the capture target lives in; its teardown ends the session
    pub owner: ContextRef,
    /// Context that runs the publisher and receives stop requests
    pub route: ContextRef,
    pub title: String,
    pub quality: QualitySettings,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Start building a session for a key
    pub fn builder(key: SessionKey, kind: SessionKind) -> SessionBuilder {
        SessionBuilder::new(key, kind)
    }

    /// Viewer links, derived fresh on every call
    pub fn links(&self, config: &LinkConfig) -> Vec<ViewerLink> {
        derive_links(
            config,
            &self.server,
            self.room_id.as_deref(),
            &self.stream_id,
            &self.quality,
        )
    }

    /// Whether tearing down `context` orphans this session
    pub fn is_bound_to(&self, context: &ContextRef) -> bool {
        context.covers(&self.owner) || context.covers(&self.route)
    }

    /// Read-only snapshot with derived links
    pub fn summary(&self, config: &LinkConfig) -> SessionSummary {
        SessionSummary {
            id: self.key.clone(),
            kind: self.kind,
            title: self.title.clone(),
            stream_id: self.stream_id.clone(),
            room_id: self.room_id.clone(),
            server: self.server.clone(),
            owner: self.owner,
            quality: self.quality.clone(),
            created_at: self.created_at,
            links: self.links(config),
        }
    }
}

/// Builder for [`Session`]
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    session: Session,
}

impl SessionBuilder {
    fn new(key: SessionKey, kind: SessionKind) -> Self {
        Self {
            session: Session {
                key,
                kind,
                stream_id: String::new(),
                room_id: None,
                server: String::new(),
                owner: ContextRef::worker(),
                route: ContextRef::worker(),
                title: String::new(),
                quality: QualitySettings::default(),
                created_at: Utc::now(),
            },
        }
    }

    pub fn stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.session.stream_id = stream_id.into();
        self
    }

    pub fn room_id(mut self, room_id: Option<String>) -> Self {
        self.session.room_id = room_id;
        self
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.session.server = server.into();
        self
    }

    /// Bind to an owner context, which also routes requests
    pub fn owner(mut self, owner: ContextRef) -> Self {
        self.session.owner = owner;
        self.session.route = owner;
        self
    }

    /// Route requests to a context other than the owner
    pub fn route(mut self, route: ContextRef) -> Self {
        self.session.route = route;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.session.title = title.into();
        self
    }

    pub fn quality(mut self, quality: QualitySettings) -> Self {
        self.session.quality = quality;
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}

/// What `list-active` returns per session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionKey,
    pub kind: SessionKind,
    pub title: String,
    pub stream_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub server: String,
    pub owner: ContextRef,
    pub quality: QualitySettings,
    pub created_at: DateTime<Utc>,
    pub links: Vec<ViewerLink>,
}

/// Outcome broadcast to callers waiting on a start in progress
pub(super) type StartOutcome = Option<Result<Arc<Session>>>;

/// Registry state for one key
#[derive(Debug)]
pub(super) enum Slot {
    /// Admission won; the publish round trip is in flight
    Starting {
        generation: u64,
        owner: ContextRef,
        route: ContextRef,
        outcome: watch::Receiver<StartOutcome>,
    },
    /// Publish confirmed
    Active(Arc<Session>),
    /// Stop round trip in flight; the slot goes away when it completes
    Stopping {
        session: Arc<Session>,
        done: watch::Receiver<bool>,
    },
}

impl Slot {
    pub fn is_bound_to(&self, context: &ContextRef) -> bool {
        match self {
            Slot::Starting { owner, route, .. } => context.covers(owner) || context.covers(route),
            Slot::Active(session) | Slot::Stopping { session, .. } => {
                session.is_bound_to(context)
            }
        }
    }
}
