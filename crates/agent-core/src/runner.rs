//! What the detached handoff process does
//!
//! Runs after the agent has exited (or while it is exiting): take the
//! handoff lock, force the working copy onto the target release, ask the
//! supervisor to restart the service, and append the outcome to the journal
//! the orchestrator wrote its record to. A failed switch still restarts the
//! service on the unchanged checkout. Lock contention restarts nothing, since
//! the lock holder restarts the service itself.

use agent_fs::LockFile;
use agent_supervisor::SupervisorBridge;
use chrono::Utc;
use uuid::Uuid;

use crate::{AgentConfig, Error, HandoffOutcome, Journal, JournalEntry, Result};

/// Carry out handoff `id`. A `None` target restarts without switching.
///
/// Failures of the switch or the restart end up in the returned (and
/// journaled) outcome; only a journal that cannot take the outcome is an `Err`.
pub async fn execute_handoff(
    config: &AgentConfig,
    supervisor: &dyn SupervisorBridge,
    id: Uuid,
    target: Option<&str>,
) -> Result<HandoffOutcome> {
    let journal = Journal::new(config.journal_path());
    tracing::info!(%id, target = target.unwrap_or("-"), "Handoff started");

    let result = run(config, &journal, supervisor, id, target).await;

    let outcome = HandoffOutcome {
        id,
        target: target.map(str::to_string),
        success: result.is_ok(),
        detail: match &result {
            Ok(detail) => detail.clone(),
            Err(e) => e.to_string(),
        },
        finished_at: Utc::now(),
        pid: std::process::id(),
    };

    match &result {
        Ok(_) => tracing::info!(%id, detail = %outcome.detail, "Handoff finished"),
        Err(e) => tracing::error!(%id, error = %e, "Handoff failed"),
    }

    append(&journal, JournalEntry::Outcome(outcome.clone())).await?;
    Ok(outcome)
}

async fn run(
    config: &AgentConfig,
    journal: &Journal,
    supervisor: &dyn SupervisorBridge,
    id: Uuid,
    target: Option<&str>,
) -> Result<String> {
    let lock_path = config.lock_path();
    let path = lock_path.clone();
    let _lock = tokio::task::spawn_blocking(move || LockFile::try_acquire(&path))
        .await??
        .ok_or(Error::HandoffInProgress { lock: lock_path })?;

    // The agent is already gone: whatever happens to the switch, the service
    // must be restarted.
    let switch_failure = match target {
        Some(target) => match switch(config, target).await {
            Ok(()) => {
                note_switch(journal, id, target).await;
                None
            }
            Err(e) => {
                tracing::warn!(%id, release = target, error = %e, "Switch failed, restarting on the previous checkout");
                Some(format!("switch to {target} failed: {e}"))
            }
        },
        None => None,
    };

    if let Err(e) = supervisor.restart().await {
        return Err(match switch_failure {
            Some(failure) => Error::handoff(format!("{failure}; restart failed: {e}")),
            None => e.into(),
        });
    }

    match (target, switch_failure) {
        (_, Some(failure)) => Err(Error::handoff(format!(
            "{failure}; restarted {} on the previous checkout",
            config.service_name
        ))),
        (Some(target), None) => Ok(format!(
            "switched to {target} and restarted {}",
            config.service_name
        )),
        (None, None) => Ok(format!("restarted {}", config.service_name)),
    }
}

async fn switch(config: &AgentConfig, target: &str) -> Result<()> {
    let root = config.project_path.clone();
    let release = target.to_string();
    tokio::task::spawn_blocking(move || agent_git::switch_to_release(&root, &release)).await??;
    Ok(())
}

/// Progress note between the switch and the restart. Best effort: a journal
/// that cannot take the note must not keep the service down.
async fn note_switch(journal: &Journal, id: Uuid, target: &str) {
    let note = JournalEntry::Note {
        text: format!(
            "{} [{}] working copy switched to {target}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            &id.simple().to_string()[..8]
        ),
    };
    if let Err(e) = append(journal, note).await {
        tracing::warn!(%id, error = %e, "Could not journal the switch");
    }
}

async fn append(journal: &Journal, entry: JournalEntry) -> Result<()> {
    let journal = journal.clone();
    tokio::task::spawn_blocking(move || journal.append(&entry)).await?
}
