//! Error types for agent-git

use std::path::PathBuf;

/// Result type for agent-git operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in agent-git operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Not a git working copy: {path}")]
    NotARepository { path: PathBuf },

    #[error("Release '{id}' not found")]
    ReleaseNotFound { id: String },

    #[error("Release '{id}' has an out-of-range creation time ({seconds})")]
    InvalidTimestamp { id: String, seconds: i64 },

    #[error("Remote '{remote}' unavailable: {message}")]
    RemoteUnavailable { remote: String, message: String },

    #[error("Background git task failed: {message}")]
    Blocking { message: String },
}

impl Error {
    /// Whether retrying the same request later may succeed without any
    /// change on the operator's side.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteUnavailable { .. } | Self::Blocking { .. })
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Blocking {
            message: e.to_string(),
        }
    }
}
