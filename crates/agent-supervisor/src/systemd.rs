//! systemd implementation of the supervisor bridge

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{Error, Result, ServiceStatus, SupervisorBridge};

/// Properties requested from `systemctl show`
const STATUS_PROPERTIES: &str = "ActiveState,SubState,LoadState,ActiveEnterTimestamp";
/// Default bound on status queries
const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
/// Default bound on restarts, which wait for the unit to come back up
const DEFAULT_RESTART_TIMEOUT: Duration = Duration::from_secs(60);

/// Which systemd instance manages the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemdScope {
    /// Per-user manager (`systemctl --user`)
    #[default]
    User,
    /// System manager
    System,
}

/// Supervisor bridge that drives `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemdBridge {
    service: String,
    scope: SystemdScope,
    query_timeout: Duration,
    restart_timeout: Duration,
}

impl SystemdBridge {
    /// Bridge for the unit `service` in the user scope.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            scope: SystemdScope::User,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            restart_timeout: DEFAULT_RESTART_TIMEOUT,
        }
    }

    /// Select the systemd instance.
    pub fn with_scope(mut self, scope: SystemdScope) -> Self {
        self.scope = scope;
        self
    }

    /// Bound status queries by `timeout`.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Bound restarts by `timeout`.
    pub fn with_restart_timeout(mut self, timeout: Duration) -> Self {
        self.restart_timeout = timeout;
        self
    }

    /// Unit name.
    pub fn service(&self) -> &str {
        &self.service
    }

    fn systemctl(&self) -> Command {
        let mut cmd = Command::new("systemctl");
        if self.scope == SystemdScope::User {
            cmd.arg("--user");
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// `systemctl show` for the status properties. Timestamps come back in
    /// the default human format.
    fn status_command(&self) -> Command {
        let mut cmd = self.systemctl();
        cmd.arg("show")
            .arg(&self.service)
            .arg(format!("--property={STATUS_PROPERTIES}"));
        cmd
    }

    /// Run a systemctl command under a timeout. The error string is the
    /// reason, for the caller to wrap in its own variant.
    async fn run(&self, mut cmd: Command, timeout: Duration) -> std::result::Result<Output, String> {
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(format!("failed to run systemctl: {e}")),
            Err(_) => Err(format!("systemctl timed out after {}s", timeout.as_secs())),
        }
    }
}

#[async_trait]
impl SupervisorBridge for SystemdBridge {
    async fn status(&self) -> Result<ServiceStatus> {
        let cmd = self.status_command();

        let unavailable = |message: String| Error::SupervisorUnavailable {
            service: self.service.clone(),
            message,
        };

        let output = self.run(cmd, self.query_timeout).await.map_err(unavailable)?;
        if !output.status.success() {
            return Err(unavailable(stderr_of(&output)));
        }

        let status = ServiceStatus::from_show_output(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(
            service = %self.service,
            active = status.is_active,
            state = %status.active_state,
            "Queried service status"
        );
        Ok(status)
    }

    async fn restart(&self) -> Result<()> {
        tracing::info!(service = %self.service, "Requesting service restart");

        let mut cmd = self.systemctl();
        cmd.arg("restart").arg(&self.service);

        let failed = |message: String| Error::RestartFailed {
            service: self.service.clone(),
            message,
        };

        let output = self.run(cmd, self.restart_timeout).await.map_err(failed)?;
        if !output.status.success() {
            return Err(failed(stderr_of(&output)));
        }
        Ok(())
    }
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exit status {}", output.status)
    } else {
        stderr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_user_scope() {
        let bridge = SystemdBridge::new("printer-bot.service");
        assert_eq!(bridge.scope, SystemdScope::User);
        assert_eq!(bridge.service(), "printer-bot.service");
    }

    #[test]
    fn scope_deserializes_lowercase() {
        let scope: SystemdScope = serde_json::from_str("\"system\"").unwrap();
        assert_eq!(scope, SystemdScope::System);
    }

    #[test]
    fn status_query_uses_arguments_older_systemd_accepts() {
        let bridge = SystemdBridge::new("printer-bot.service").with_scope(SystemdScope::System);
        let cmd = bridge.status_command();
        let args: Vec<_> = cmd.as_std().get_args().collect();

        assert_eq!(
            args,
            vec![
                "show",
                "printer-bot.service",
                "--property=ActiveState,SubState,LoadState,ActiveEnterTimestamp",
            ]
        );
    }

    #[tokio::test]
    async fn unreachable_supervisor_is_an_error_not_a_status() {
        // A unit name systemctl will reject outright, or no systemctl at all:
        // either way the bridge must report SupervisorUnavailable.
        let bridge = SystemdBridge::new("--definitely-not-a-unit")
            .with_query_timeout(Duration::from_secs(2));

        match bridge.status().await {
            Err(Error::SupervisorUnavailable { service, .. }) => {
                assert_eq!(service, "--definitely-not-a-unit");
            }
            // Some systemctl builds answer `show` for any name; that still
            // must not be reported as active.
            Ok(status) => assert!(!status.is_active),
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
