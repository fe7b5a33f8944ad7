//! The agent configuration artifact
//!
//! Loaded once at startup; any change requires a restart of the agent, which
//! is exactly what the agent itself can do.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_fs::ConfigStore;
use agent_git::GitCatalog;
use agent_supervisor::{SystemdBridge, SystemdScope};
use serde::Deserialize;

use crate::{AccessPolicy, Error, RequesterId, Result};

fn default_remote() -> String {
    "origin".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_supervisor_timeout_secs() -> u64 {
    5
}

fn default_list_limit() -> usize {
    100
}

fn default_spawn_attempts() -> u32 {
    3
}

/// Agent configuration.
///
/// Relative paths are resolved against the directory holding the
/// configuration file. Every stored path is absolute, including the source.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Working copy whose checked-out tag is the running release
    pub project_path: PathBuf,

    /// Supervised service unit, e.g. `release-bot.service`
    pub service_name: String,

    /// Requesters allowed to update and restart
    #[serde(default)]
    pub allowed_users: Vec<RequesterId>,

    /// Optional privileged requester, always allowed
    #[serde(default)]
    pub admin_id: Option<RequesterId>,

    /// Append-only handoff log, defaults to `<project_path>/logs/handoff.log`
    #[serde(default)]
    pub journal_path: Option<PathBuf>,

    /// Remote tags are synchronized from
    #[serde(default = "default_remote")]
    pub remote: String,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_supervisor_timeout_secs")]
    pub supervisor_timeout_secs: u64,

    /// Supervisor instance the service lives in
    #[serde(default)]
    pub supervisor_scope: SystemdScope,

    /// Maximum number of releases shown by a listing
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,

    #[serde(default)]
    pub handoff: HandoffSettings,

    /// File this configuration was loaded from
    #[serde(skip)]
    source: Option<PathBuf>,
}

/// How the detached handoff process is launched.
#[derive(Debug, Clone, Deserialize)]
pub struct HandoffSettings {
    /// External program invoked as `<program> <target|restart>` instead of
    /// this binary's `handoff` subcommand
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Argv prefix, e.g. `["systemd-run", "--user", "--collect"]`
    #[serde(default)]
    pub launcher: Vec<String>,

    /// Spawn attempts once the handoff record is written
    #[serde(default = "default_spawn_attempts")]
    pub spawn_attempts: u32,
}

impl Default for HandoffSettings {
    fn default() -> Self {
        Self {
            program: None,
            launcher: Vec::new(),
            spawn_attempts: default_spawn_attempts(),
        }
    }
}

impl AgentConfig {
    /// Load and validate the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let path = std::path::absolute(path).map_err(|e| agent_fs::Error::io(path, e))?;
        let mut config: Self = ConfigStore::new().load(&path)?;

        let base = path.parent().unwrap_or(Path::new("/"));
        config.project_path = base.join(&config.project_path);
        config.journal_path = config.journal_path.take().map(|p| base.join(p));
        if let Some(program) = config.handoff.program.take() {
            config.handoff.program = Some(if program.components().count() > 1 {
                base.join(program)
            } else {
                program
            });
        }
        config.source = Some(path.clone());

        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            project = %config.project_path.display(),
            service = %config.service_name,
            allowed = config.allowed_users.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |message: &str| -> Result<()> {
            Err(Error::InvalidConfig {
                message: message.to_string(),
            })
        };

        if self.service_name.trim().is_empty() {
            return invalid("service_name must not be empty");
        }
        if self.handoff.spawn_attempts == 0 {
            return invalid("handoff.spawn_attempts must be at least 1");
        }
        if self.list_limit == 0 {
            return invalid("list_limit must be at least 1");
        }
        Ok(())
    }

    /// File this configuration was loaded from, if it came from a file.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Resolved journal location.
    pub fn journal_path(&self) -> PathBuf {
        self.journal_path
            .clone()
            .unwrap_or_else(|| self.project_path.join("logs").join("handoff.log"))
    }

    /// Lock file serializing handoff processes.
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.journal_path().into_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// The immutable access policy for this process.
    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.allowed_users.iter().copied(), self.admin_id)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn supervisor_timeout(&self) -> Duration {
        Duration::from_secs(self.supervisor_timeout_secs)
    }

    /// Git catalog over the configured working copy.
    pub fn catalog(&self) -> GitCatalog {
        GitCatalog::new(&self.project_path)
            .with_remote(&self.remote)
            .with_fetch_timeout(self.fetch_timeout())
    }

    /// Supervisor bridge for the configured service.
    pub fn supervisor(&self) -> SystemdBridge {
        SystemdBridge::new(&self.service_name)
            .with_scope(self.supervisor_scope)
            .with_query_timeout(self.supervisor_timeout())
    }
}
