//! Command surface
//!
//! The serialisable form of every orchestrator operation. Controllers that
//! live in another context send a [`Command`] and get a [`CommandReply`]
//! back; in-process callers can use the typed methods on
//! [`Orchestrator`](super::Orchestrator) directly.

use serde::{Deserialize, Serialize};

use crate::context::ContextRef;
use crate::error::{Error, Result};
use crate::registry::{Session, SessionKey, SessionSummary, ViewerLink};
use crate::session::PublishSettings;

fn enabled() -> bool {
    true
}

/// A request to the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
    StartPublish {
        session_key: SessionKey,
        context: ContextRef,
        #[serde(default)]
        settings: PublishSettings,
        #[serde(default)]
        title: String,
    },
    StopPublish {
        session_key: SessionKey,
        #[serde(default)]
        context: Option<ContextRef>,
    },
    StartTabCapture {
        context: ContextRef,
        #[serde(default = "enabled")]
        audio: bool,
        #[serde(default = "enabled")]
        video: bool,
        #[serde(default)]
        settings: PublishSettings,
        #[serde(default)]
        title: Option<String>,
    },
    StopTabCapture {
        context: ContextRef,
    },
    CheckExisting {
        session_key: SessionKey,
    },
    ListActive,
    CaptureThumbnail {
        session_key: SessionKey,
    },
}

/// Outcome of a start command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<ViewerLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a stop command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of check-existing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReply {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<ViewerLink>>,
}

/// Outcome of capture-thumbnail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThumbnailReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Reply to any [`Command`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandReply {
    Start(StartReply),
    Ack(AckReply),
    Check(CheckReply),
    Thumbnail(ThumbnailReply),
    List(Vec<SessionSummary>),
}

/// A session as handed back by a start
#[derive(Debug, Clone)]
pub struct Started {
    pub session: std::sync::Arc<Session>,
    pub links: Vec<ViewerLink>,
    /// `false` when an existing session was returned
    pub created: bool,
}

impl From<Result<Started>> for StartReply {
    fn from(result: Result<Started>) -> Self {
        match result {
            Ok(started) => StartReply {
                success: true,
                stream_id: Some(started.session.stream_id.clone()),
                room_id: started.session.room_id.clone(),
                links: started.links,
                error: None,
            },
            Err(e) => StartReply {
                success: false,
                stream_id: None,
                room_id: None,
                links: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

impl From<Result<()>> for AckReply {
    fn from(result: Result<()>) -> Self {
        AckReply {
            success: result.is_ok(),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

impl From<Option<SessionSummary>> for CheckReply {
    fn from(summary: Option<SessionSummary>) -> Self {
        match summary {
            Some(summary) => CheckReply {
                exists: true,
                stream_id: Some(summary.stream_id),
                room_id: summary.room_id,
                links: Some(summary.links),
            },
            None => CheckReply {
                exists: false,
                stream_id: None,
                room_id: None,
                links: None,
            },
        }
    }
}

impl From<Result<String>> for ThumbnailReply {
    fn from(result: Result<String>) -> Self {
        match result {
            Ok(data_url) => ThumbnailReply {
                success: true,
                data_url: Some(data_url),
                error: None,
            },
            Err(e) => ThumbnailReply {
                success: false,
                data_url: None,
                error: Some(e.to_string()),
            },
        }
    }
}

impl CommandReply {
    /// Whether the command succeeded (or, for checks, found a session)
    pub fn is_success(&self) -> bool {
        match self {
            CommandReply::Start(reply) => reply.success,
            CommandReply::Ack(reply) => reply.success,
            CommandReply::Check(reply) => reply.exists,
            CommandReply::Thumbnail(reply) => reply.success,
            CommandReply::List(_) => true,
        }
    }

    /// Failure text, if any
    pub fn error(&self) -> Option<&str> {
        match self {
            CommandReply::Start(reply) => reply.error.as_deref(),
            CommandReply::Ack(reply) => reply.error.as_deref(),
            CommandReply::Thumbnail(reply) => reply.error.as_deref(),
            CommandReply::Check(_) | CommandReply::List(_) => None,
        }
    }
}

/// Parse a command from its JSON form
pub fn parse_command(value: serde_json::Value) -> Result<Command> {
    serde_json::from_value(value).map_err(Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_start_publish() {
        let json = serde_json::json!({
            "type": "start-publish",
            "session_key": "video-0",
            "context": { "context_id": 3, "sub_context_id": 1 },
            "settings": { "room_id": "r1", "bitrate": 4000 },
            "title": "Lecture"
        });

        let command = parse_command(json).unwrap();

        match command {
            Command::StartPublish {
                session_key,
                context,
                settings,
                title,
            } => {
                assert_eq!(session_key, SessionKey::element("video-0"));
                assert_eq!(context, ContextRef::frame(3, 1));
                assert_eq!(settings.effective_room_id(), Some("r1"));
                assert_eq!(settings.quality.bitrate, Some(4000));
                assert_eq!(title, "Lecture");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_tab_capture_defaults_to_audio_and_video() {
        let json = serde_json::json!({
            "type": "start-tab-capture",
            "context": { "context_id": 5 }
        });

        let command = parse_command(json).unwrap();

        assert_eq!(
            command,
            Command::StartTabCapture {
                context: ContextRef::new(5),
                audio: true,
                video: true,
                settings: PublishSettings::default(),
                title: None,
            }
        );
    }

    #[test]
    fn test_unknown_command_is_serialization_error() {
        let err = parse_command(serde_json::json!({ "type": "reboot" })).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_soft_failure_shapes() {
        let reply = AckReply::from(Err(Error::NotFound(SessionKey::element("x"))));
        let json = serde_json::to_value(CommandReply::Ack(reply)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "success": false, "error": "session not found: x" })
        );

        let json = serde_json::to_value(CommandReply::Check(CheckReply::from(None))).unwrap();
        assert_eq!(json, serde_json::json!({ "exists": false }));
    }
}
