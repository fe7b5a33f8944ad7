//! The update/restart state machine
//!
//! ```text
//! Idle -> Authorizing -> Resolving -> Validating -> HandoffPending -> Terminating -> HandedOff
//!              |             |            |               |
//!           Rejected    ResolutionFailed  |          HandoffFailed
//!              |                    ResolutionFailed
//!            Busy
//! ```
//!
//! At most one request is in `Resolving` or later at any time; a second one
//! ends in `Busy` instead of waiting. `HandedOff` means the caller must end
//! the process: the in-flight permit is never returned, so every later
//! request is `Busy` until the process is gone.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_git::{Release, ReleaseCatalog, TargetToken};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use crate::handoff::spawn_with_retry;
use crate::{
    AccessGuard, Error, HandoffAborted, HandoffKind, HandoffRecord, HandoffRequest,
    HandoffRunner, Journal, JournalEntry, RequesterId, Result,
};

/// First delay between spawn attempts
const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(250);
/// Spawn attempts unless configured otherwise
const DEFAULT_SPAWN_ATTEMPTS: u32 = 3;

/// A mutating command, consumed by [`Orchestrator::handle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub requester: RequesterId,
    pub kind: HandoffKind,
    /// Ignored for restarts, which always target the current release
    pub target: TargetToken,
    pub submitted_at: DateTime<Utc>,
}

impl UpdateRequest {
    /// `update [target]`; a missing target means the newest release.
    pub fn update(requester: RequesterId, target: Option<&str>) -> Self {
        Self {
            requester,
            kind: HandoffKind::Update,
            target: TargetToken::parse(target),
            submitted_at: Utc::now(),
        }
    }

    /// `restart`: a handoff to the release that is already checked out.
    pub fn restart(requester: RequesterId) -> Self {
        Self {
            requester,
            kind: HandoffKind::Restart,
            target: TargetToken::Latest,
            submitted_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Authorizing,
    Resolving,
    Validating,
    HandoffPending,
    Terminating,
    Rejected,
    Busy,
    ResolutionFailed,
    HandoffFailed,
    HandedOff,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected
                | Self::Busy
                | Self::ResolutionFailed
                | Self::HandoffFailed
                | Self::HandedOff
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a request ended.
#[derive(Debug)]
pub enum LifecycleOutcome {
    Rejected { requester: RequesterId },
    Busy,
    ResolutionFailed(Error),
    HandoffFailed(Error),
    /// The record is durable and the handoff process is running; the caller
    /// ends the process with exit code 0.
    HandedOff { record: HandoffRecord, pid: u32 },
}

/// The states a request passed through and how it ended.
#[derive(Debug)]
pub struct LifecycleReport {
    pub trace: Vec<LifecycleState>,
    pub outcome: LifecycleOutcome,
}

impl LifecycleReport {
    pub fn final_state(&self) -> LifecycleState {
        self.trace.last().copied().unwrap_or(LifecycleState::Idle)
    }

    /// Whether the caller must now end the process.
    pub fn must_terminate(&self) -> bool {
        matches!(self.outcome, LifecycleOutcome::HandedOff { .. })
    }
}

/// Trace of one request through the machine
struct Run {
    requester: RequesterId,
    kind: HandoffKind,
    trace: Vec<LifecycleState>,
}

impl Run {
    fn new(request: &UpdateRequest) -> Self {
        Self {
            requester: request.requester,
            kind: request.kind,
            trace: vec![LifecycleState::Idle],
        }
    }

    fn enter(&mut self, state: LifecycleState) {
        tracing::debug!(requester = self.requester, kind = %self.kind, %state, "Lifecycle transition");
        self.trace.push(state);
    }

    fn finish(mut self, state: LifecycleState, outcome: LifecycleOutcome) -> LifecycleReport {
        self.enter(state);
        match &outcome {
            LifecycleOutcome::Rejected { requester } => {
                tracing::warn!(requester, kind = %self.kind, "Request rejected");
            }
            LifecycleOutcome::Busy => {
                tracing::warn!(requester = self.requester, kind = %self.kind, "Request refused, another one is in flight");
            }
            LifecycleOutcome::ResolutionFailed(e) => {
                tracing::warn!(requester = self.requester, kind = %self.kind, error = %e, "Resolution failed");
            }
            LifecycleOutcome::HandoffFailed(e) => {
                tracing::error!(requester = self.requester, kind = %self.kind, error = %e, "Handoff failed, agent stays up");
            }
            LifecycleOutcome::HandedOff { record, pid } => {
                tracing::info!(
                    requester = self.requester,
                    kind = %self.kind,
                    target = record.target.as_deref().unwrap_or("-"),
                    id = %record.id,
                    pid,
                    "Handed off"
                );
            }
        }
        LifecycleReport {
            trace: self.trace,
            outcome,
        }
    }
}

/// Drives update and restart requests to a handoff.
pub struct Orchestrator {
    guard: AccessGuard,
    catalog: Arc<dyn ReleaseCatalog>,
    journal: Journal,
    runner: Arc<dyn HandoffRunner>,
    working_dir: PathBuf,
    spawn_attempts: u32,
    retry_interval: Duration,
    in_flight: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        guard: AccessGuard,
        catalog: Arc<dyn ReleaseCatalog>,
        journal: Journal,
        runner: Arc<dyn HandoffRunner>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            guard,
            catalog,
            journal,
            runner,
            working_dir: working_dir.into(),
            spawn_attempts: DEFAULT_SPAWN_ATTEMPTS,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            in_flight: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn with_spawn_attempts(mut self, attempts: u32) -> Self {
        self.spawn_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    /// Whether a request is currently past authorization, or the process
    /// has already handed off.
    pub fn is_busy(&self) -> bool {
        self.in_flight.available_permits() == 0
    }

    /// Run `request` to a terminal state. Errors are part of the report,
    /// never returned.
    pub async fn handle(&self, request: UpdateRequest) -> LifecycleReport {
        let mut run = Run::new(&request);

        run.enter(LifecycleState::Authorizing);
        if !self.guard.authorize(request.requester) {
            return run.finish(
                LifecycleState::Rejected,
                LifecycleOutcome::Rejected {
                    requester: request.requester,
                },
            );
        }

        let Ok(permit) = self.in_flight.clone().try_acquire_owned() else {
            return run.finish(LifecycleState::Busy, LifecycleOutcome::Busy);
        };

        run.enter(LifecycleState::Resolving);
        let target = match self.resolve(&request).await {
            Ok(target) => target,
            Err(e) => {
                return run.finish(
                    LifecycleState::ResolutionFailed,
                    LifecycleOutcome::ResolutionFailed(e),
                );
            }
        };

        run.enter(LifecycleState::Validating);
        if let Some(release) = &target
            && let Err(e) = self.validate(release).await
        {
            return run.finish(
                LifecycleState::ResolutionFailed,
                LifecycleOutcome::ResolutionFailed(e),
            );
        }

        run.enter(LifecycleState::HandoffPending);
        let record = HandoffRecord::new(
            request.kind,
            target.map(|r| r.id),
            request.requester,
            request.submitted_at,
        );

        match self.hand_off(&record).await {
            Ok(pid) => {
                run.enter(LifecycleState::Terminating);
                permit.forget();
                run.finish(
                    LifecycleState::HandedOff,
                    LifecycleOutcome::HandedOff { record, pid },
                )
            }
            Err(e) => run.finish(
                LifecycleState::HandoffFailed,
                LifecycleOutcome::HandoffFailed(e),
            ),
        }
    }

    /// Concrete release for the request; `None` is a restart of an untagged
    /// working copy.
    async fn resolve(&self, request: &UpdateRequest) -> Result<Option<Release>> {
        match request.kind {
            HandoffKind::Update => Ok(Some(self.catalog.resolve(&request.target).await?)),
            HandoffKind::Restart => Ok(self.catalog.current_release().await?),
        }
    }

    /// Re-read the local tag set right before acting.
    async fn validate(&self, release: &Release) -> Result<()> {
        if self.catalog.is_present(&release.id).await? {
            Ok(())
        } else {
            Err(agent_git::Error::ReleaseNotFound {
                id: release.id.clone(),
            }
            .into())
        }
    }

    /// Write the record, then spawn. Once the record is written a failed
    /// spawn is retried, never unwound; if every attempt fails the journal
    /// gets an abort entry.
    async fn hand_off(&self, record: &HandoffRecord) -> Result<u32> {
        let journal = self.journal.clone();
        let entry = JournalEntry::Record(record.clone());
        tokio::task::spawn_blocking(move || journal.append(&entry)).await??;

        let request = HandoffRequest {
            id: record.id,
            kind: record.kind,
            target: record.target.clone(),
            working_dir: self.working_dir.clone(),
        };
        let runner = Arc::clone(&self.runner);
        let attempts = self.spawn_attempts;
        let interval = self.retry_interval;
        let spawned = tokio::task::spawn_blocking(move || {
            spawn_with_retry(runner.as_ref(), &request, attempts, interval)
        })
        .await?;

        if let Err(e) = &spawned {
            let aborted = JournalEntry::Aborted(HandoffAborted {
                id: record.id,
                reason: e.to_string(),
                at: Utc::now(),
            });
            let journal = self.journal.clone();
            match tokio::task::spawn_blocking(move || journal.append(&aborted)).await {
                Ok(Ok(())) => {}
                Ok(Err(append_err)) => {
                    tracing::error!(id = %record.id, error = %append_err, "Could not record aborted handoff");
                }
                Err(join_err) => {
                    tracing::error!(id = %record.id, error = %join_err, "Could not record aborted handoff");
                }
            }
        }

        spawned
    }
}
