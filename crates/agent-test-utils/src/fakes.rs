//! In-memory stand-ins for the release catalog and the supervisor.
//!
//! Both count their calls so tests can assert that a rejected request never
//! reached them.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use agent_git::{Release, ReleaseCatalog};
use agent_supervisor::{ServiceStatus, SupervisorBridge};

/// `secs` since the epoch as a UTC timestamp.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(|| panic!("at: {secs} is not a valid timestamp"))
}

#[derive(Debug, Default)]
struct CatalogState {
    releases: Vec<Release>,
    current: Option<String>,
    vanished: Vec<String>,
    remote_down: bool,
}

/// A catalog whose tag set is fixed by the test.
#[derive(Debug, Default)]
pub struct FakeCatalog {
    state: Mutex<CatalogState>,
    list_calls: AtomicUsize,
    present_calls: AtomicUsize,
}

impl FakeCatalog {
    /// Catalog with `(id, secs)` releases and `current` as the working copy's tag.
    pub fn new(releases: &[(&str, i64)], current: Option<&str>) -> Self {
        let state = CatalogState {
            releases: releases
                .iter()
                .map(|(id, secs)| Release::new(*id, at(*secs)))
                .collect(),
            current: current.map(str::to_string),
            ..CatalogState::default()
        };
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Listed by `list_releases` but reported absent by `is_present`, as if
    /// the tag was deleted between resolution and validation.
    pub fn with_vanished(self, id: &str) -> Self {
        self.state.lock().unwrap().vanished.push(id.to_string());
        self
    }

    /// Every listing fails with `RemoteUnavailable`.
    pub fn with_remote_down(self) -> Self {
        self.state.lock().unwrap().remote_down = true;
        self
    }

    /// Number of `list_releases` calls so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `is_present` calls so far.
    pub fn present_calls(&self) -> usize {
        self.present_calls.load(Ordering::SeqCst)
    }

    /// Total catalog calls so far.
    pub fn total_calls(&self) -> usize {
        self.list_calls() + self.present_calls()
    }
}

#[async_trait]
impl ReleaseCatalog for FakeCatalog {
    async fn list_releases(&self) -> agent_git::Result<Vec<Release>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.remote_down {
            return Err(agent_git::Error::RemoteUnavailable {
                remote: "origin".to_string(),
                message: "connection refused".to_string(),
            });
        }
        let current = state.current.clone();
        Ok(state
            .releases
            .iter()
            .cloned()
            .map(|r| {
                let is_current = current.as_deref() == Some(r.id.as_str());
                r.with_current(is_current)
            })
            .collect())
    }

    async fn current_release(&self) -> agent_git::Result<Option<Release>> {
        let state = self.state.lock().unwrap();
        let Some(current) = state.current.as_deref() else {
            return Ok(None);
        };
        Ok(state
            .releases
            .iter()
            .find(|r| r.id == current)
            .cloned()
            .map(|r| r.with_current(true)))
    }

    async fn is_present(&self, id: &str) -> agent_git::Result<bool> {
        self.present_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.vanished.iter().any(|v| v == id) {
            return Ok(false);
        }
        Ok(state.releases.iter().any(|r| r.id == id))
    }
}

/// A supervisor that reports a fixed status and records restarts.
#[derive(Debug)]
pub struct FakeSupervisor {
    status: Mutex<Option<ServiceStatus>>,
    restart_fails: bool,
    status_calls: AtomicUsize,
    restart_calls: AtomicUsize,
}

impl FakeSupervisor {
    /// A supervisor reporting `active (running)` since `since`.
    pub fn running_since(since: DateTime<Utc>) -> Self {
        Self::with_status(Some(ServiceStatus {
            is_active: true,
            active_state: "active".to_string(),
            sub_state: "running".to_string(),
            load_state: "loaded".to_string(),
            active_since: Some(since),
        }))
    }

    /// A supervisor that cannot be queried.
    pub fn unreachable() -> Self {
        Self::with_status(None)
    }

    fn with_status(status: Option<ServiceStatus>) -> Self {
        Self {
            status: Mutex::new(status),
            restart_fails: false,
            status_calls: AtomicUsize::new(0),
            restart_calls: AtomicUsize::new(0),
        }
    }

    /// Every restart request fails.
    pub fn with_failing_restart(mut self) -> Self {
        self.restart_fails = true;
        self
    }

    /// Number of `status` calls so far.
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    /// Number of `restart` calls so far.
    pub fn restart_calls(&self) -> usize {
        self.restart_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SupervisorBridge for FakeSupervisor {
    async fn status(&self) -> agent_supervisor::Result<ServiceStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| agent_supervisor::Error::SupervisorUnavailable {
                service: "release-agent-test".to_string(),
                message: "bus connection refused".to_string(),
            })
    }

    async fn restart(&self) -> agent_supervisor::Result<()> {
        self.restart_calls.fetch_add(1, Ordering::SeqCst);
        if self.restart_fails {
            return Err(agent_supervisor::Error::RestartFailed {
                service: "release-agent-test".to_string(),
                message: "unit entered failed state".to_string(),
            });
        }
        Ok(())
    }
}
