//! Release scenarios across the whole stack
//!
//! Real git working copies (with an origin the catalog fetches from), the
//! real journal, and a handoff runner that executes the handoff in-process
//! instead of spawning, so the full update sequence can be observed.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use agent_core::{
    AccessGuard, AgentConfig, HandoffRequest, HandoffRunner, Journal, JournalEntry,
    LifecycleOutcome, LifecycleState, Orchestrator, UpdateRequest, execute_handoff,
};
use agent_git::{GitCatalog, ReleaseCatalog, TargetToken};
use agent_test_utils::fakes::{FakeSupervisor, at};
use agent_test_utils::git::{clone_working_copy, commit_file, repo_with_releases, tag_head};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Remembers spawn requests; the test carries them out afterwards.
#[derive(Default)]
struct DeferredRunner {
    requests: Mutex<Vec<HandoffRequest>>,
}

impl HandoffRunner for DeferredRunner {
    fn spawn(&self, request: &HandoffRequest) -> agent_core::Result<u32> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(std::process::id() + 1)
    }
}

struct Deployment {
    _origin: TempDir,
    dir: TempDir,
    config: AgentConfig,
}

/// An origin tagged v1.0, v1.2, v1.1 where v1.2 is the newest by creation
/// time, and a deployed clone of it checked out at v1.0.
fn deployment() -> Deployment {
    let origin = TempDir::new().unwrap();
    let repo = repo_with_releases(origin.path(), &[("v1.0", 1_000)]);

    let dir = TempDir::new().unwrap();
    clone_working_copy(origin.path(), &dir.path().join("bot"));

    commit_file(&repo, "VERSION", "v1.1", 2_000);
    tag_head(&repo, "v1.1", 2_000);
    commit_file(&repo, "VERSION", "v1.2", 3_000);
    tag_head(&repo, "v1.2", 3_000);

    let config_path = dir.path().join("agent.toml");
    fs::write(
        &config_path,
        "project_path = \"bot\"\nservice_name = \"bot.service\"\nallowed_users = [7, 9]\n",
    )
    .unwrap();
    let config = AgentConfig::load(&config_path).unwrap();

    Deployment {
        _origin: origin,
        dir,
        config,
    }
}

fn orchestrator(config: &AgentConfig, runner: Arc<DeferredRunner>) -> Orchestrator {
    Orchestrator::new(
        AccessGuard::new(config.access_policy()),
        Arc::new(config.catalog()),
        Journal::new(config.journal_path()),
        runner,
        &config.project_path,
    )
}

fn version_file(project: &Path) -> String {
    fs::read_to_string(project.join("VERSION")).unwrap()
}

#[tokio::test]
async fn scenario_a_resolution_over_fetched_tags() {
    let d = deployment();
    let catalog = d.config.catalog();

    let latest = catalog.resolve(&TargetToken::parse(Some("latest"))).await.unwrap();
    let none = catalog.resolve(&TargetToken::parse(None)).await.unwrap();
    let exact = catalog.resolve(&TargetToken::parse(Some("v1.1"))).await.unwrap();
    let missing = catalog.resolve(&TargetToken::parse(Some("v9.9"))).await;

    assert_eq!(latest.id, "v1.2");
    assert_eq!(none, latest);
    assert_eq!(exact.id, "v1.1");
    assert!(matches!(
        missing,
        Err(agent_git::Error::ReleaseNotFound { ref id }) if id == "v9.9"
    ));
}

#[tokio::test]
async fn scenario_b_unauthorized_requester_touches_nothing() {
    let d = deployment();
    let runner = Arc::new(DeferredRunner::default());
    let orchestrator = orchestrator(&d.config, runner.clone());

    let report = orchestrator.handle(UpdateRequest::update(42, Some("v1.1"))).await;

    assert_eq!(report.final_state(), LifecycleState::Rejected);
    assert!(runner.requests.lock().unwrap().is_empty());
    assert!(!d.config.journal_path().exists());
    let local = GitCatalog::new(&d.config.project_path);
    assert!(!local.is_present("v1.1").await.unwrap(), "no fetch happened");
}

#[tokio::test]
async fn scenario_c_update_then_handoff_switches_and_restarts() {
    let d = deployment();
    let runner = Arc::new(DeferredRunner::default());
    let orchestrator = orchestrator(&d.config, runner.clone());

    let report = orchestrator.handle(UpdateRequest::update(7, Some("v1.1"))).await;

    assert!(report.must_terminate());
    let LifecycleOutcome::HandedOff { record, .. } = report.outcome else {
        panic!("expected HandedOff, got {:?}", report.outcome);
    };
    assert_eq!(record.target.as_deref(), Some("v1.1"));
    assert_eq!(version_file(&d.config.project_path), "v1.0");

    let journal = Journal::new(d.config.journal_path());
    assert_eq!(journal.entries().unwrap(), vec![JournalEntry::Record(record.clone())]);

    let request = runner.requests.lock().unwrap()[0].clone();
    assert_eq!(request.id, record.id);
    assert_eq!(request.working_dir, d.config.project_path);

    let supervisor = FakeSupervisor::running_since(at(0));
    let outcome = execute_handoff(&d.config, &supervisor, request.id, request.target.as_deref())
        .await
        .unwrap();

    assert!(outcome.success, "{}", outcome.detail);
    assert_eq!(supervisor.restart_calls(), 1);
    assert_eq!(version_file(&d.config.project_path), "v1.1");

    let entries = journal.entries().unwrap();
    assert_eq!(entries.first(), Some(&JournalEntry::Record(record)));
    assert_eq!(entries.last(), Some(&JournalEntry::Outcome(outcome)));

    let current = d.config.catalog().current_release().await.unwrap();
    assert_eq!(current.map(|r| r.id), Some("v1.1".to_string()));
    assert!(d.dir.path().join("bot/logs/handoff.log").exists());
}

#[tokio::test]
async fn update_to_latest_then_restart_keeps_the_release() {
    let d = deployment();
    let supervisor = FakeSupervisor::running_since(at(0));

    let runner = Arc::new(DeferredRunner::default());
    let report = orchestrator(&d.config, runner.clone())
        .handle(UpdateRequest::update(9, None))
        .await;
    assert_eq!(report.final_state(), LifecycleState::HandedOff);
    let request = runner.requests.lock().unwrap()[0].clone();
    execute_handoff(&d.config, &supervisor, request.id, request.target.as_deref())
        .await
        .unwrap();
    assert_eq!(version_file(&d.config.project_path), "v1.2");

    // The restarted agent is a fresh process with a fresh orchestrator.
    let runner = Arc::new(DeferredRunner::default());
    let report = orchestrator(&d.config, runner.clone())
        .handle(UpdateRequest::restart(9))
        .await;
    let LifecycleOutcome::HandedOff { record, .. } = report.outcome else {
        panic!("expected HandedOff, got {:?}", report.outcome);
    };
    assert_eq!(record.target.as_deref(), Some("v1.2"));
}
