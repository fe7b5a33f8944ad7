//! Error types for agent-supervisor

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to the supervisor
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The supervisor itself could not be reached or answered garbage.
    /// A stopped service is not an error.
    #[error("Supervisor unavailable for {service}: {message}")]
    SupervisorUnavailable { service: String, message: String },

    /// The supervisor refused or failed to restart the service
    #[error("Restart of {service} failed: {message}")]
    RestartFailed { service: String, message: String },
}

impl Error {
    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SupervisorUnavailable { .. })
    }
}
