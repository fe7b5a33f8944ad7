//! Error types for agent-cli

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

/// Errors that end the process with exit code 1
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] agent_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Reply could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    /// User-facing error with a message
    #[error("{message}")]
    User { message: String },
}

impl CliError {
    pub fn user(message: impl Into<String>) -> Self {
        Self::User {
            message: message.into(),
        }
    }
}
