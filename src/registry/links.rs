//! Viewer link derivation
//!
//! Links are never stored. They are recomputed from a session's server,
//! stream id, room id and quality settings every time they are requested.

use serde::{Deserialize, Serialize};

use crate::session::QualitySettings;

/// Viewer link configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Viewer used when no server is configured
    pub default_viewer: String,

    /// Scheme prefixed to servers configured without one
    pub default_scheme: String,

    /// Host prefix that marks a backup signalling server
    pub backup_alias_prefix: String,

    /// Host prefix of the viewer that serves backup-server sessions
    pub backup_viewer_prefix: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            default_viewer: "https://vdo.ninja".to_string(),
            default_scheme: "https".to_string(),
            backup_alias_prefix: "apibackup.".to_string(),
            backup_viewer_prefix: "backup.".to_string(),
        }
    }
}

impl LinkConfig {
    /// Set the default viewer
    pub fn default_viewer(mut self, viewer: impl Into<String>) -> Self {
        self.default_viewer = viewer.into();
        self
    }

    /// Set the backup alias mapping
    pub fn backup_alias(mut self, alias_prefix: impl Into<String>, viewer_prefix: impl Into<String>) -> Self {
        self.backup_alias_prefix = alias_prefix.into();
        self.backup_viewer_prefix = viewer_prefix.into();
        self
    }

    /// Normalize a configured server into an absolute viewer base URL
    ///
    /// - unset: the default viewer
    /// - backup alias (`apibackup.<domain>`, any scheme): `https://backup.<domain>`
    /// - with a scheme: used as-is
    /// - bare host: the default scheme is prefixed
    ///
    /// The result never has a trailing slash.
    pub fn viewer_base(&self, server: &str) -> String {
        let server = server.trim();
        if server.is_empty() {
            return self.default_viewer.trim_end_matches('/').to_string();
        }

        let (scheme, rest) = match server.split_once("://") {
            Some((scheme, rest)) => (Some(scheme), rest),
            None => (None, server),
        };

        if !self.backup_alias_prefix.is_empty() {
            if let Some(domain) = rest.strip_prefix(&self.backup_alias_prefix) {
                let domain = domain.split('/').next().unwrap_or(domain);
                return format!(
                    "{}://{}{}",
                    self.default_scheme, self.backup_viewer_prefix, domain
                );
            }
        }

        let base = match scheme {
            Some(_) => server.to_string(),
            None => format!("{}://{}", self.default_scheme, server),
        };
        base.trim_end_matches('/').to_string()
    }
}

/// A derived viewer URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewerLink {
    /// Human label ("Direct View", "Room View")
    pub label: String,
    /// Absolute URL
    pub url: String,
}

impl ViewerLink {
    fn new(label: &str, url: String) -> Self {
        Self {
            label: label.to_string(),
            url,
        }
    }
}

/// Query suffix for the quality settings that are explicitly enabled
fn quality_params(quality: &QualitySettings) -> String {
    let mut params = String::new();

    if let Some(bitrate) = quality.bitrate.filter(|b| *b > 0) {
        params.push_str(&format!("&bitrate={}", bitrate));
    }
    if let Some(codec) = quality.codec.as_deref().filter(|c| !c.is_empty()) {
        params.push_str(&format!("&codec={}", codec));
    }
    if quality.sharper {
        params.push_str("&sharper");
    }
    if quality.proaudio {
        params.push_str("&proaudio");
    }
    if quality.showlabel {
        params.push_str("&showlabel");
    }

    params
}

/// Derive the viewer links for a session
///
/// With a room: a direct solo view and a room scene view. Without: a single
/// direct view.
pub fn derive_links(
    config: &LinkConfig,
    server: &str,
    room_id: Option<&str>,
    stream_id: &str,
    quality: &QualitySettings,
) -> Vec<ViewerLink> {
    let base = config.viewer_base(server);
    let params = quality_params(quality);

    match room_id.map(str::trim).filter(|r| !r.is_empty()) {
        Some(room) => vec![
            ViewerLink::new(
                "Direct View",
                format!("{}/?view={}&room={}&solo{}", base, stream_id, room, params),
            ),
            ViewerLink::new(
                "Room View",
                format!("{}/?room={}&scene{}", base, room, params),
            ),
        ],
        None => vec![ViewerLink::new(
            "Direct View",
            format!("{}/?view={}{}", base, stream_id, params),
        )],
    }
}
