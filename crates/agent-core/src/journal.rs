//! Append-only handoff log
//!
//! One JSON object per line. The orchestrator appends a [`HandoffRecord`]
//! before it spawns the handoff process; the handoff process appends its
//! [`HandoffOutcome`]. Lines written by an external handoff program that are
//! not JSON are kept as [`JournalEntry::Note`] when read back.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RequesterId, Result};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Which command asked for the handoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffKind {
    Update,
    Restart,
}

impl fmt::Display for HandoffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update => f.write_str("update"),
            Self::Restart => f.write_str("restart"),
        }
    }
}

/// Intent to switch and restart, written before the orchestrator exits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub id: Uuid,
    pub kind: HandoffKind,
    /// Release to switch to; `None` restarts without switching
    pub target: Option<String>,
    pub requester: RequesterId,
    pub submitted_at: DateTime<Utc>,
    /// Process id of the orchestrator that wrote the record
    pub pid: u32,
}

impl HandoffRecord {
    /// A record for the current process with a fresh id.
    pub fn new(
        kind: HandoffKind,
        target: Option<String>,
        requester: RequesterId,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target,
            requester,
            submitted_at,
            pid: std::process::id(),
        }
    }
}

/// What the handoff process reports once it is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffOutcome {
    pub id: Uuid,
    pub target: Option<String>,
    pub success: bool,
    /// Error message or command output
    pub detail: String,
    pub finished_at: DateTime<Utc>,
    pub pid: u32,
}

/// The record was written but no handoff process could be started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffAborted {
    pub id: Uuid,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One line of the journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEntry {
    Record(HandoffRecord),
    Outcome(HandoffOutcome),
    Aborted(HandoffAborted),
    Note { text: String },
}

impl JournalEntry {
    /// Handoff this entry belongs to, if any.
    pub fn handoff_id(&self) -> Option<Uuid> {
        match self {
            Self::Record(r) => Some(r.id),
            Self::Outcome(o) => Some(o.id),
            Self::Aborted(a) => Some(a.id),
            Self::Note { .. } => None,
        }
    }
}

fn short(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(r) => write!(
                f,
                "{} [{}] {} to {} requested by {} (pid {})",
                r.submitted_at.format(TIME_FORMAT),
                short(&r.id),
                r.kind,
                r.target.as_deref().unwrap_or("current checkout"),
                r.requester,
                r.pid
            ),
            Self::Outcome(o) => write!(
                f,
                "{} [{}] handoff {}: {}",
                o.finished_at.format(TIME_FORMAT),
                short(&o.id),
                if o.success { "succeeded" } else { "FAILED" },
                o.detail
            ),
            Self::Aborted(a) => write!(
                f,
                "{} [{}] handoff aborted: {}",
                a.at.format(TIME_FORMAT),
                short(&a.id),
                a.reason
            ),
            Self::Note { text } => f.write_str(text),
        }
    }
}

/// The durable handoff log at a fixed path.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `entry` and flush it to disk before returning.
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        agent_fs::io::append_line(&self.path, &line)?;
        tracing::debug!(path = %self.path.display(), entry = %entry, "Journal entry appended");
        Ok(())
    }

    /// Every entry, oldest first. A missing journal is empty.
    pub fn entries(&self) -> Result<Vec<JournalEntry>> {
        let lines = agent_fs::io::read_lines(&self.path)?;
        Ok(lines
            .into_iter()
            .map(|line| {
                serde_json::from_str(&line).unwrap_or(JournalEntry::Note { text: line })
            })
            .collect())
    }

    /// The last `n` entries, oldest first.
    pub fn tail(&self, n: usize) -> Result<Vec<JournalEntry>> {
        let mut entries = self.entries()?;
        let skip = entries.len().saturating_sub(n);
        Ok(entries.split_off(skip))
    }
}
