//! Bridge protocol messages
//!
//! Requests the orchestrator sends into page and worker contexts, and the
//! reply shape every bridge answers with.

use serde::{Deserialize, Serialize};

use crate::context::ContextRef;
use crate::error::{Error, Result};
use crate::registry::{Session, SessionKey, SessionKind};
use crate::session::QualitySettings;

use super::config::Operation;

/// Request handled by a capture source bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BridgeRequest {
    /// Capture an on-page media element and publish it
    Publish {
        session_key: SessionKey,
        target: String,
        stream_id: String,
        #[serde(default)]
        room_id: Option<String>,
        title: String,
        #[serde(default)]
        password: Option<String>,
        server: String,
    },

    /// Announce departure and stop an element publisher
    Stop { stream_id: String },

    /// Grab a still of a published element
    Thumbnail { stream_id: String },

    /// Capture a whole tab inside the worker and publish it
    StartTabCapture {
        session_key: SessionKey,
        tab: ContextRef,
        audio: bool,
        video: bool,
        stream_id: String,
        #[serde(default)]
        room_id: Option<String>,
        server: String,
        quality: QualitySettings,
        title: String,
    },

    /// Stop a worker publisher; `None` stops every tab capture in the worker
    StopTabCapture {
        #[serde(default)]
        stream_id: Option<String>,
    },
}

impl BridgeRequest {
    /// The stop request that ends a session's publisher
    pub fn stop_for(session: &Session) -> Self {
        let stream_id = session.stream_id.clone();
        match session.kind {
            SessionKind::Video => BridgeRequest::Stop { stream_id },
            SessionKind::Tab => BridgeRequest::StopTabCapture {
                stream_id: Some(stream_id),
            },
        }
    }

    /// Operation class, which selects the timeout
    pub fn operation(&self) -> Operation {
        match self {
            BridgeRequest::Publish { .. } => Operation::Publish,
            BridgeRequest::Stop { .. } => Operation::Stop,
            BridgeRequest::Thumbnail { .. } => Operation::Thumbnail,
            BridgeRequest::StartTabCapture { .. } => Operation::TabCapture,
            BridgeRequest::StopTabCapture { .. } => Operation::Stop,
        }
    }
}

/// Reply emitted by a bridge
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Still image as a data URL (thumbnail replies)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_tracks: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_tracks: Option<usize>,
    /// Set only on the synthetic reply produced when the deadline passes
    #[serde(skip)]
    timed_out: Option<Operation>,
}

impl BridgeReply {
    /// A plain success
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    /// A structured failure
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Synthetic reply for a request whose deadline passed
    pub fn timed_out(operation: Operation) -> Self {
        Self {
            success: false,
            error: Some(format!("{} timed out", operation)),
            timed_out: Some(operation),
            ..Default::default()
        }
    }

    /// Attach a data URL
    pub fn with_data_url(mut self, data_url: String) -> Self {
        self.data_url = Some(data_url);
        self
    }

    /// Attach track counts
    pub fn with_tracks(mut self, audio: usize, video: usize) -> Self {
        self.audio_tracks = Some(audio);
        self.video_tracks = Some(video);
        self
    }

    /// Whether this is the synthetic timeout reply
    pub fn is_timed_out(&self) -> bool {
        self.timed_out.is_some()
    }

    /// Classify a soft failure into the crate error taxonomy
    pub fn into_result(self) -> Result<Self> {
        if let Some(operation) = self.timed_out {
            return Err(Error::Timeout(operation.to_string()));
        }
        if !self.success {
            return Err(Error::RemoteFailure(
                self.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tagging() {
        let req = BridgeRequest::Stop {
            stream_id: "stream_abc".into(),
        };
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["type"], "stop");
        assert_eq!(json["stream_id"], "stream_abc");
        assert_eq!(req.operation(), Operation::Stop);

        let json = serde_json::json!({ "type": "stop-tab-capture" });
        let req: BridgeRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req, BridgeRequest::StopTabCapture { stream_id: None });
    }

    #[test]
    fn test_timeout_does_not_cross_the_wire() {
        let reply = BridgeReply::timed_out(Operation::Publish);
        assert!(reply.is_timed_out());

        let json = serde_json::to_value(&reply).unwrap();
        let back: BridgeReply = serde_json::from_value(json).unwrap();
        assert!(!back.is_timed_out());
        assert!(!back.success);
    }

    #[test]
    fn test_into_result() {
        assert!(BridgeReply::ok().into_result().is_ok());

        let err = BridgeReply::failure("Video element not found")
            .into_result()
            .unwrap_err();
        assert_eq!(err, Error::RemoteFailure("Video element not found".into()));

        let err = BridgeReply::timed_out(Operation::Stop)
            .into_result()
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
