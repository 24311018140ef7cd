//! Publish settings
//!
//! What a caller hands the orchestrator when it starts a publish: optional
//! fixed identifiers, the signalling server, and the quality knobs that end
//! up both in the publish call and in the derived viewer links.

use serde::{Deserialize, Serialize};

/// Quality settings attached to a session
///
/// Immutable once the session is admitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    /// Target bitrate in kbps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,

    /// Preferred video codec (e.g. "h264", "vp9")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,

    /// Ask viewers to favour sharpness over motion
    pub sharper: bool,

    /// Ask viewers for high-fidelity audio processing
    pub proaudio: bool,

    /// Ask viewers to overlay the stream label
    pub showlabel: bool,

    /// Stream password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl QualitySettings {
    /// Set the bitrate
    pub fn bitrate(mut self, kbps: u32) -> Self {
        self.bitrate = Some(kbps);
        self
    }

    /// Set the codec
    pub fn codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    /// Enable the sharpening flag
    pub fn sharper(mut self) -> Self {
        self.sharper = true;
        self
    }

    /// Enable the pro-audio flag
    pub fn proaudio(mut self) -> Self {
        self.proaudio = true;
        self
    }

    /// Enable the show-label flag
    pub fn showlabel(mut self) -> Self {
        self.showlabel = true;
        self
    }

    /// Set the stream password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Password, treating an empty string as none
    pub fn effective_password(&self) -> Option<&str> {
        non_blank(self.password.as_deref())
    }
}

/// Settings for a start command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Fixed stream id; generated when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,

    /// Room to publish into; blank means no room
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,

    /// Signalling server; the configured default when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Quality settings
    #[serde(flatten)]
    pub quality: QualitySettings,
}

impl PublishSettings {
    /// Set a fixed stream id
    pub fn stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = Some(stream_id.into());
        self
    }

    /// Set the room
    pub fn room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    /// Set the server
    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Set the quality settings
    pub fn quality(mut self, quality: QualitySettings) -> Self {
        self.quality = quality;
        self
    }

    /// Caller-supplied stream id, if any
    pub fn effective_stream_id(&self) -> Option<&str> {
        non_blank(self.stream_id.as_deref())
    }

    /// Room id, trimmed; blank means none
    pub fn effective_room_id(&self) -> Option<&str> {
        non_blank(self.room_id.as_deref())
    }

    /// Server, falling back to `default`
    pub fn effective_server<'a>(&'a self, default: &'a str) -> &'a str {
        non_blank(self.server.as_deref()).unwrap_or(default)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_room_is_none() {
        let settings = PublishSettings::default().room_id("   ");
        assert_eq!(settings.effective_room_id(), None);

        let settings = PublishSettings::default().room_id(" r1 ");
        assert_eq!(settings.effective_room_id(), Some("r1"));
    }

    #[test]
    fn test_server_fallback() {
        let settings = PublishSettings::default();
        assert_eq!(settings.effective_server("vdo.ninja"), "vdo.ninja");

        let settings = PublishSettings::default().server("wss://example.org");
        assert_eq!(settings.effective_server("vdo.ninja"), "wss://example.org");
    }

    #[test]
    fn test_flattened_wire_format() {
        let json = serde_json::json!({
            "stream_id": "s1",
            "room_id": "r1",
            "bitrate": 4000,
            "sharper": true
        });
        let settings: PublishSettings = serde_json::from_value(json).unwrap();

        assert_eq!(settings.effective_stream_id(), Some("s1"));
        assert_eq!(settings.quality.bitrate, Some(4000));
        assert!(settings.quality.sharper);
        assert!(!settings.quality.proaudio);
    }

    #[test]
    fn test_empty_password() {
        let quality = QualitySettings::default().password("");
        assert_eq!(quality.effective_password(), None);
    }
}
