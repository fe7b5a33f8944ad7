//! End-to-end tests that invoke the compiled `release-agent` binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use agent_test_utils::git::repo_with_releases;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn agent_cmd() -> Command {
    let mut cmd = Command::cargo_bin("release-agent").unwrap();
    cmd.env_remove("RELEASE_AGENT_CONFIG").env_remove("RUST_LOG");
    cmd
}

/// A working copy at `<dir>/bot` tagged v1.0 then v1.1, and a config next
/// to it. `extra` is appended to the TOML.
fn setup(extra: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    repo_with_releases(&dir.path().join("bot"), &[("v1.0", 1_000), ("v1.1", 2_000)]);
    let config = dir.path().join("agent.toml");
    fs::write(
        &config,
        format!(
            "project_path = \"bot\"\nservice_name = \"release-agent-e2e-nonexistent.service\"\nallowed_users = [7, 9]\n{extra}"
        ),
    )
    .unwrap();
    (dir, config)
}

fn journal(dir: &Path) -> String {
    fs::read_to_string(dir.join("bot/logs/handoff.log")).unwrap_or_default()
}

#[test]
fn help_lists_commands() {
    agent_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("listen"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("restart"));
}

#[test]
fn missing_config_argument_exits_one() {
    agent_cmd()
        .arg("version")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("error"))
        .stderr(predicate::str::contains("RELEASE_AGENT_CONFIG"));
}

#[test]
fn missing_config_file_exits_one() {
    let dir = TempDir::new().unwrap();

    agent_cmd()
        .args(["--config"])
        .arg(dir.path().join("agent.toml"))
        .arg("version")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn version_reads_the_checked_out_tag() {
    let (_dir, config) = setup("");

    agent_cmd()
        .env("RELEASE_AGENT_CONFIG", &config)
        .arg("version")
        .assert()
        .success()
        .stdout("Current release: v1.1\n");
}

#[test]
fn releases_fall_back_to_local_tags_without_a_remote() {
    let (_dir, config) = setup("");

    agent_cmd()
        .arg("--config")
        .arg(&config)
        .arg("tags")
        .assert()
        .success()
        .stdout("Releases (newest first):\nv1.1 (current)\nv1.0\n")
        .stderr(predicate::str::contains("using local tags"));
}

#[test]
fn unauthorized_update_changes_nothing() {
    let (dir, config) = setup("");

    agent_cmd()
        .arg("--config")
        .arg(&config)
        .args(["update", "v1.0", "--as", "42"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("not authorized"));

    assert_eq!(journal(dir.path()), "");
    assert_eq!(fs::read_to_string(dir.path().join("bot/VERSION")).unwrap(), "v1.1");
}

#[test]
fn unknown_release_is_reported() {
    let (dir, config) = setup("");

    agent_cmd()
        .arg("--config")
        .arg(&config)
        .args(["update", "v9.9", "--as", "7"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Release 'v9.9' not found"));

    assert_eq!(journal(dir.path()), "");
}

#[cfg(unix)]
fn marker_script(dir: &Path) -> (PathBuf, PathBuf) {
    use std::os::unix::fs::PermissionsExt;

    let marker = dir.join("handoff-args.txt");
    let script = dir.join("update_bot.sh");
    fs::write(
        &script,
        format!("#!/bin/sh\necho \"$1\" > \"{}\"\n", marker.display()),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    (script, marker)
}

#[cfg(unix)]
fn wait_for(path: &Path) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if let Ok(content) = fs::read_to_string(path)
            && !content.is_empty()
        {
            return content;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("handoff program never ran: {}", path.display());
}

#[cfg(unix)]
#[test]
fn authorized_update_records_spawns_and_exits_zero() {
    let dir = TempDir::new().unwrap();
    let (script, marker) = marker_script(dir.path());
    let (project, config) = setup(&format!("[handoff]\nprogram = \"{}\"\n", script.display()));

    agent_cmd()
        .arg("--config")
        .arg(&config)
        .args(["update", "v1.0", "--as", "9"])
        .assert()
        .code(0)
        .stdout("Updating to v1.0. The service will restart shortly.\n");

    let log = journal(project.path());
    let record: serde_json::Value = serde_json::from_str(log.lines().next().unwrap()).unwrap();
    assert_eq!(record["event"], "record");
    assert_eq!(record["target"], "v1.0");
    assert_eq!(record["requester"], 9);
    assert_eq!(wait_for(&marker).trim(), "v1.0");
}

#[cfg(unix)]
#[test]
fn listen_stops_after_handoff() {
    let dir = TempDir::new().unwrap();
    let (script, marker) = marker_script(dir.path());
    let (_project, config) = setup(&format!("[handoff]\nprogram = \"{}\"\n", script.display()));

    let output = agent_cmd()
        .arg("--config")
        .arg(&config)
        .arg("listen")
        .write_stdin("42 /version\n42 /restart\n7 /restart\n7 /version\n")
        .assert()
        .code(0)
        .get_output()
        .stdout
        .clone();

    let replies: Vec<serde_json::Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[0]["text"], "Current release: v1.1");
    assert_eq!(replies[1]["text"], "You are not authorized to do that.");
    assert_eq!(replies[2]["to"], 7);
    assert_eq!(replies[2]["text"], "Restarting on v1.1. Back shortly.");
    assert_eq!(wait_for(&marker).trim(), "v1.1");
}

#[test]
fn handoff_switches_and_records_a_failed_restart() {
    let (dir, config) = setup("");

    agent_cmd()
        .arg("--config")
        .arg(&config)
        .args([
            "handoff",
            "--id",
            "6f1c2a9e-4b7d-4c1e-9a51-0d3c8e2f7b10",
            "--target",
            "v1.0",
        ])
        .assert()
        .code(1);

    assert_eq!(fs::read_to_string(dir.path().join("bot/VERSION")).unwrap(), "v1.0");
    let log = journal(dir.path());
    let outcome: serde_json::Value = serde_json::from_str(log.lines().last().unwrap()).unwrap();
    assert_eq!(outcome["event"], "outcome");
    assert_eq!(outcome["id"], "6f1c2a9e-4b7d-4c1e-9a51-0d3c8e2f7b10");
    assert_eq!(outcome["success"], false);
}

fn wait_for_outcome(dir: &Path) -> serde_json::Value {
    let deadline = Instant::now() + Duration::from_secs(20);
    while Instant::now() < deadline {
        let outcome = journal(dir)
            .lines()
            .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
            .find(|entry| entry["event"] == "outcome");
        if let Some(outcome) = outcome {
            return outcome;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("no outcome was journaled:\n{}", journal(dir));
}

#[test]
fn update_with_relative_config_reaches_the_handoff_outcome() {
    let (dir, _config) = setup("");

    agent_cmd()
        .current_dir(dir.path())
        .args(["--config", "agent.toml", "update", "v1.0", "--as", "7"])
        .assert()
        .code(0)
        .stdout("Updating to v1.0. The service will restart shortly.\n");

    let outcome = wait_for_outcome(dir.path());
    assert_eq!(outcome["target"], "v1.0");
    assert_eq!(fs::read_to_string(dir.path().join("bot/VERSION")).unwrap(), "v1.0");
    assert!(journal(dir.path()).contains("working copy switched to v1.0"));
}
