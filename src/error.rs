//! Error types for coordination store operations.
//!
//! Every failure is surfaced as a distinct, matchable variant. Nothing at
//! this layer is retried or swallowed.

use thiserror::Error;

/// Errors that can occur while operating on a coordination session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordError {
    /// The addressed node does not exist.
    #[error("no node: {0}")]
    NoNode(String),

    /// `create` addressed a node that already exists.
    #[error("node exists: {0}")]
    NodeExists(String),

    /// Expected version does not match the stored version.
    #[error("bad version for {path}: expected {expected}, found {found}")]
    BadVersion {
        path: String,
        expected: i32,
        found: i32,
    },

    /// The session is not connected.
    #[error("connection closed")]
    ConnectionClosed,

    /// The session was expired and must be replaced by a new one.
    #[error("session expired")]
    SessionExpired,

    /// The caller asked for a feature this emulator does not provide.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Malformed path or otherwise invalid argument.
    #[error("bad arguments: {0}")]
    BadArguments(String),

    /// A transaction object was committed more than once.
    #[error("transaction already committed")]
    AlreadyCommitted,

    /// The producer of an async result went away without completing it.
    #[error("operation cancelled")]
    Cancelled,

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for coordination operations.
pub type Result<T> = std::result::Result<T, CoordError>;

impl CoordError {
    /// Returns true if retrying the same call on a healthy session may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordError::ConnectionClosed | CoordError::Cancelled)
    }

    /// Returns true if the error comes from the session lifecycle rather than
    /// the node tree.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            CoordError::ConnectionClosed | CoordError::SessionExpired
        )
    }
}

impl From<serde_json::Error> for CoordError {
    fn from(err: serde_json::Error) -> Self {
        CoordError::Serialization(err.to_string())
    }
}
