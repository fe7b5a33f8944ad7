//! Error types for agent-core

use std::path::PathBuf;

use crate::RequesterId;

/// Result type for agent-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the orchestrator and the handoff process
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("User {requester} is not authorized for this command")]
    Unauthorized { requester: RequesterId },

    #[error("Another update or restart is already in progress")]
    Busy,

    #[error(transparent)]
    Catalog(#[from] agent_git::Error),

    #[error(transparent)]
    Supervisor(#[from] agent_supervisor::Error),

    #[error(transparent)]
    Fs(#[from] agent_fs::Error),

    #[error("Journal entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Handoff failed: {message}")]
    HandoffFailed { message: String },

    #[error("Another handoff holds {}", lock.display())]
    HandoffInProgress { lock: PathBuf },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Background task failed: {message}")]
    Blocking { message: String },
}

impl Error {
    /// Whether the same request may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Catalog(e) => e.is_transient(),
            Self::Supervisor(e) => e.is_transient(),
            Self::Busy | Self::Blocking { .. } => true,
            _ => false,
        }
    }

    pub(crate) fn handoff(message: impl Into<String>) -> Self {
        Self::HandoffFailed {
            message: message.into(),
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Blocking {
            message: e.to_string(),
        }
    }
}
