//! Error types
//!
//! Every failure the orchestrator can observe falls into one of a handful of
//! kinds. Start-path errors are surfaced to the caller; stop-path errors are
//! logged and swallowed by the orchestrator itself.

use crate::context::ContextRef;
use crate::registry::SessionKey;

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for orchestration operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A session already exists for the key.
    ///
    /// Callers of the command surface never see this: admission returns the
    /// existing session instead.
    #[error("session already exists: {0}")]
    AdmissionConflict(SessionKey),

    /// The target context was gone before the request could be delivered
    #[error("context unreachable: {0}")]
    ContextUnreachable(ContextRef),

    /// No reply within the operation's deadline
    #[error("{0} timed out")]
    Timeout(String),

    /// The bridge replied with a structured failure
    #[error("remote failure: {0}")]
    RemoteFailure(String),

    /// Stop/check/thumbnail on an unknown session key
    #[error("session not found: {0}")]
    NotFound(SessionKey),

    /// A payload could not cross the context boundary
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A capture source or publishing transport failed locally
    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl Error {
    /// Whether this error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
