//! Spawning the detached handoff process
//!
//! The orchestrator's obligation ends at a confirmed spawn: the child runs in
//! its own session with no stdio tied to the agent, so it survives the
//! agent's exit and the supervisor's restart of it.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use uuid::Uuid;

use crate::{AgentConfig, Error, HandoffKind, Result};

/// Argument passed to an external handoff program for a plain restart
const RESTART_ARG: &str = "restart";

/// Everything the handoff process needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffRequest {
    /// Id of the journal record this handoff carries out
    pub id: Uuid,
    pub kind: HandoffKind,
    /// Release to switch to; `None` restarts without switching
    pub target: Option<String>,
    /// The agent's working directory (the working copy)
    pub working_dir: PathBuf,
}

/// Launches the handoff process.
pub trait HandoffRunner: Send + Sync {
    /// Start the process detached and return its pid. Must not wait for it.
    fn spawn(&self, request: &HandoffRequest) -> Result<u32>;
}

/// Runs this binary's `handoff` subcommand, or an external program, in a
/// new session.
#[derive(Debug, Clone)]
pub struct DetachedHandoff {
    config_path: PathBuf,
    program: Option<PathBuf>,
    launcher: Vec<String>,
}

impl DetachedHandoff {
    /// Handoff through `release-agent handoff --config <config_path>`.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            program: None,
            launcher: Vec::new(),
        }
    }

    /// Build from a loaded configuration. The configuration must have come
    /// from a file so the handoff process can load it again.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let source = config.source().ok_or_else(|| Error::InvalidConfig {
            message: "handoff needs a configuration file path".to_string(),
        })?;
        let mut handoff = Self::new(source).with_launcher(config.handoff.launcher.clone());
        if let Some(program) = &config.handoff.program {
            handoff = handoff.with_program(program);
        }
        Ok(handoff)
    }

    /// Invoke `program <target|restart>` instead of the built-in runner.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Prefix the command line, e.g. with `systemd-run --user --collect`.
    pub fn with_launcher(mut self, launcher: Vec<String>) -> Self {
        self.launcher = launcher;
        self
    }

    /// The full argv for `request`, launcher prefix included.
    pub fn argv(&self, request: &HandoffRequest) -> Result<Vec<String>> {
        let mut argv = self.launcher.clone();

        match &self.program {
            Some(program) => {
                argv.push(program.to_string_lossy().into_owned());
                argv.push(
                    request
                        .target
                        .clone()
                        .unwrap_or_else(|| RESTART_ARG.to_string()),
                );
            }
            None => {
                let exe = std::env::current_exe().map_err(|e| {
                    Error::handoff(format!("cannot locate the agent executable: {e}"))
                })?;
                argv.push(exe.to_string_lossy().into_owned());
                argv.extend([
                    "handoff".to_string(),
                    "--config".to_string(),
                    self.config_path.to_string_lossy().into_owned(),
                    "--id".to_string(),
                    request.id.to_string(),
                ]);
                if let Some(target) = &request.target {
                    argv.push("--target".to_string());
                    argv.push(target.clone());
                }
            }
        }

        Ok(argv)
    }

    fn command(&self, request: &HandoffRequest) -> Result<Command> {
        let argv = self.argv(request)?;
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::handoff("empty handoff command line"))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&request.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        detach(&mut cmd);
        Ok(cmd)
    }
}

#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: the closure runs in the forked child before exec and only
    // calls setsid(2), which is async-signal-safe and allocates nothing.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(drop)
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(not(unix))]
fn detach(_cmd: &mut Command) {}

impl HandoffRunner for DetachedHandoff {
    fn spawn(&self, request: &HandoffRequest) -> Result<u32> {
        let mut cmd = self.command(request)?;
        let child = cmd
            .spawn()
            .map_err(|e| Error::handoff(format!("failed to spawn handoff process: {e}")))?;
        let pid = child.id();

        tracing::info!(
            id = %request.id,
            pid,
            target = request.target.as_deref().unwrap_or(RESTART_ARG),
            "Handoff process spawned"
        );

        // The child is in its own session with null stdio; dropping the
        // handle leaves it running.
        drop(child);
        Ok(pid)
    }
}

/// Spawn with exponential backoff, giving up after `attempts` tries.
///
/// Blocks between attempts; call from a blocking context.
pub fn spawn_with_retry(
    runner: &dyn HandoffRunner,
    request: &HandoffRequest,
    attempts: u32,
    initial_interval: Duration,
) -> Result<u32> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(initial_interval)
        .with_max_interval(initial_interval * 8)
        .with_max_elapsed_time(None)
        .build();

    let mut attempt = 0u32;
    backoff::retry(policy, || {
        attempt += 1;
        runner.spawn(request).map_err(|e| {
            tracing::warn!(id = %request.id, attempt, attempts, error = %e, "Handoff spawn attempt failed");
            if attempt >= attempts {
                backoff::Error::permanent(e)
            } else {
                backoff::Error::transient(e)
            }
        })
    })
    .map_err(|e| match e {
        backoff::Error::Permanent(e) => e,
        backoff::Error::Transient { err, .. } => err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request(target: Option<&str>) -> HandoffRequest {
        HandoffRequest {
            id: Uuid::nil(),
            kind: HandoffKind::Update,
            target: target.map(str::to_string),
            working_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn builtin_runner_argv_carries_config_id_and_target() {
        let handoff = DetachedHandoff::new("/etc/release-agent/agent.toml");

        let argv = handoff.argv(&request(Some("v1.1"))).unwrap();

        assert_eq!(
            &argv[1..],
            &[
                "handoff",
                "--config",
                "/etc/release-agent/agent.toml",
                "--id",
                "00000000-0000-0000-0000-000000000000",
                "--target",
                "v1.1",
            ]
        );
    }

    #[test]
    fn builtin_restart_has_no_target() {
        let handoff = DetachedHandoff::new("agent.toml");

        let argv = handoff.argv(&request(None)).unwrap();

        assert!(!argv.contains(&"--target".to_string()));
    }

    #[test]
    fn external_program_gets_target_or_restart() {
        let handoff = DetachedHandoff::new("agent.toml").with_program("/opt/bot/update_bot.sh");

        assert_eq!(
            handoff.argv(&request(Some("v1.2"))).unwrap(),
            vec!["/opt/bot/update_bot.sh", "v1.2"]
        );
        assert_eq!(
            handoff.argv(&request(None)).unwrap(),
            vec!["/opt/bot/update_bot.sh", "restart"]
        );
    }

    #[test]
    fn launcher_is_prepended() {
        let handoff = DetachedHandoff::new("agent.toml")
            .with_program("update_bot.sh")
            .with_launcher(vec!["systemd-run".into(), "--user".into(), "--collect".into()]);

        assert_eq!(
            handoff.argv(&request(Some("v1.2"))).unwrap(),
            vec!["systemd-run", "--user", "--collect", "update_bot.sh", "v1.2"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn spawns_an_external_program() {
        let handoff = DetachedHandoff::new("agent.toml").with_program("true");

        let pid = handoff.spawn(&request(Some("v1.1"))).unwrap();

        assert!(pid > 0);
    }

    #[test]
    fn missing_program_is_a_handoff_failure() {
        let handoff =
            DetachedHandoff::new("agent.toml").with_program("/nonexistent/release-agent-handoff");

        let err = handoff.spawn(&request(Some("v1.1"))).unwrap_err();

        assert!(matches!(err, Error::HandoffFailed { .. }));
    }

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    impl HandoffRunner for Flaky {
        fn spawn(&self, _request: &HandoffRequest) -> Result<u32> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(Error::handoff("fork: resource temporarily unavailable"))
            } else {
                Ok(1000 + call)
            }
        }
    }

    #[test]
    fn retry_recovers_from_transient_spawn_failures() {
        let runner = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };

        let pid = spawn_with_retry(&runner, &request(None), 3, Duration::from_millis(1)).unwrap();

        assert_eq!(pid, 1003);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_gives_up_after_the_last_attempt() {
        let runner = Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        };

        let err = spawn_with_retry(&runner, &request(None), 3, Duration::from_millis(1)).unwrap_err();

        assert!(matches!(err, Error::HandoffFailed { .. }));
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }
}
