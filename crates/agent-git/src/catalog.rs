//! Release catalog trait and the git-backed implementation

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{Error, Release, Result, TargetToken, resolve_in, tags};

/// Default remote to synchronize tags from
const DEFAULT_REMOTE: &str = "origin";
/// Default bound on a tag synchronization
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Read-only view of the releases available to the agent.
///
/// Implementations must not cache the current release: every call reads the
/// working copy fresh.
#[async_trait]
pub trait ReleaseCatalog: Send + Sync {
    /// All known releases, oldest first.
    ///
    /// Tags are synchronized from the remote before the local set is read.
    /// A failed synchronization degrades to the local set; only when that is
    /// empty as well does the call fail with [`Error::RemoteUnavailable`].
    async fn list_releases(&self) -> Result<Vec<Release>>;

    /// The working copy's nearest reachable tag, or `None` for an untagged
    /// working copy.
    async fn current_release(&self) -> Result<Option<Release>>;

    /// Whether `id` is still present in the local tag set. Never contacts
    /// the remote.
    async fn is_present(&self, id: &str) -> Result<bool>;

    /// Resolve a target token against a fresh listing.
    async fn resolve(&self, token: &TargetToken) -> Result<Release> {
        let releases = self.list_releases().await?;
        resolve_in(&releases, token)
    }
}

/// Release catalog backed by a local git working copy.
///
/// Local reads go through git2 on the blocking pool. Tag synchronization
/// shells out to `git fetch` so that the operator's credential helpers and
/// SSH configuration apply.
#[derive(Debug, Clone)]
pub struct GitCatalog {
    root: PathBuf,
    remote: String,
    fetch_timeout: Duration,
}

impl GitCatalog {
    /// Create a catalog for the working copy at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            remote: DEFAULT_REMOTE.to_string(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Use a different remote name.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Bound tag synchronization by `timeout`.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Working copy root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fetch all tags from the remote, overwriting moved local tags.
    pub async fn sync_tags(&self) -> Result<()> {
        tracing::debug!(remote = %self.remote, root = %self.root.display(), "Synchronizing tags");

        let mut cmd = Command::new("git");
        cmd.current_dir(&self.root)
            .args(["fetch", "--tags", "--force", "--quiet"])
            .arg(&self.remote)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.fetch_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(self.unavailable(format!("failed to run git: {e}"))),
            Err(_) => {
                return Err(self.unavailable(format!(
                    "tag synchronization timed out after {}s",
                    self.fetch_timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(self.unavailable(stderr));
        }

        Ok(())
    }

    /// Local tag set with the current release marked. No network access.
    pub async fn local_releases(&self) -> Result<Vec<Release>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Release>> {
            let repo = tags::open(&root)?;
            let current = tags::nearest_tag(&repo)?;
            let releases = tags::local_releases(&repo)?
                .into_iter()
                .map(|r| {
                    let is_current = current.as_deref() == Some(r.id.as_str());
                    r.with_current(is_current)
                })
                .collect();
            Ok(releases)
        })
        .await?
    }

    fn unavailable(&self, message: String) -> Error {
        Error::RemoteUnavailable {
            remote: self.remote.clone(),
            message,
        }
    }
}

#[async_trait]
impl ReleaseCatalog for GitCatalog {
    async fn list_releases(&self) -> Result<Vec<Release>> {
        let sync_error = match self.sync_tags().await {
            Ok(()) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Tag synchronization failed, using local tags");
                Some(e)
            }
        };

        let releases = self.local_releases().await?;

        match sync_error {
            Some(e) if releases.is_empty() => Err(e),
            _ => Ok(releases),
        }
    }

    async fn current_release(&self) -> Result<Option<Release>> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Release>> {
            let repo = tags::open(&root)?;
            let Some(id) = tags::nearest_tag(&repo)? else {
                return Ok(None);
            };
            let created_at = tags::tag_created_at(&repo, &id)?;
            Ok(Some(Release::new(id, created_at).with_current(true)))
        })
        .await?
    }

    async fn is_present(&self, id: &str) -> Result<bool> {
        let root = self.root.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool> {
            let repo = tags::open(&root)?;
            Ok(tags::has_tag(&repo, &id))
        })
        .await?
    }
}
