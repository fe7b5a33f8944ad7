//! Supervisor capability trait

use async_trait::async_trait;

use crate::{Result, ServiceStatus};

/// What the agent needs from the external process supervisor.
#[async_trait]
pub trait SupervisorBridge: Send + Sync {
    /// Fresh status snapshot of the supervised service.
    ///
    /// Fails only when the supervisor cannot be reached; a stopped or failed
    /// service is reported through [`ServiceStatus`].
    async fn status(&self) -> Result<ServiceStatus>;

    /// Ask the supervisor to restart the service.
    async fn restart(&self) -> Result<()>;
}
