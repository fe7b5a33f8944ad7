//! Command text parsing, dispatch and replies
//!
//! Read-only commands (`start`, `help`, `version`, `status`,
//! `list-releases`, `history`) run concurrently and bypass authorization.
//! `update` and `restart` go through the [`Orchestrator`].

use std::sync::Arc;

use agent_git::{Release, ReleaseCatalog};
use agent_supervisor::{SupervisorBridge, format_uptime};
use chrono::Utc;

use crate::{
    AccessGuard, AgentConfig, DetachedHandoff, HandoffKind, Journal, LifecycleOutcome,
    Orchestrator, RequesterId, Result, UpdateRequest,
};

/// Journal entries shown by `history`
const HISTORY_LIMIT: usize = 10;

const HELP: &str = "\
Commands:
/version - show the running release
/status - show service state and uptime
/tags - list available releases
/history - show recent updates and restarts
/update [tag|latest] - switch to a release and restart (authorized users)
/restart - restart on the current release (authorized users)";

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Version,
    Status,
    ListReleases,
    History,
    Update(Option<String>),
    Restart,
    Unknown(String),
}

impl Command {
    /// Parse `/<command>[@botname] [args]`. The slash is optional and the
    /// command word is case-insensitive. Blank text is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let (head, rest) = match text.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (text, ""),
        };
        let word = head.trim_start_matches('/');
        let word = word.split_once('@').map_or(word, |(w, _bot)| w);
        let arg = rest.split_whitespace().next().map(str::to_string);

        let command = match word.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "help" => Self::Help,
            "version" => Self::Version,
            "status" => Self::Status,
            "list-releases" | "tags" | "releases" => Self::ListReleases,
            "history" => Self::History,
            "update" => Self::Update(arg),
            "restart" => Self::Restart,
            _ => Self::Unknown(head.to_string()),
        };
        Some(command)
    }

    /// Whether the command changes the working copy or the service.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Update(_) | Self::Restart)
    }
}

/// What to send back, and whether the process must end afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub terminate: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            terminate: false,
        }
    }
}

/// The command surface over one working copy and one service.
pub struct Agent {
    catalog: Arc<dyn ReleaseCatalog>,
    supervisor: Arc<dyn SupervisorBridge>,
    journal: Journal,
    orchestrator: Orchestrator,
    list_limit: usize,
}

impl Agent {
    pub fn new(
        catalog: Arc<dyn ReleaseCatalog>,
        supervisor: Arc<dyn SupervisorBridge>,
        journal: Journal,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            catalog,
            supervisor,
            journal,
            orchestrator,
            list_limit: 100,
        }
    }

    /// Wire the git catalog, systemd bridge and detached handoff from
    /// configuration.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let catalog: Arc<dyn ReleaseCatalog> = Arc::new(config.catalog());
        let supervisor: Arc<dyn SupervisorBridge> = Arc::new(config.supervisor());
        let journal = Journal::new(config.journal_path());
        let runner = Arc::new(DetachedHandoff::from_config(config)?);

        let orchestrator = Orchestrator::new(
            AccessGuard::new(config.access_policy()),
            Arc::clone(&catalog),
            journal.clone(),
            runner,
            &config.project_path,
        )
        .with_spawn_attempts(config.handoff.spawn_attempts);

        Ok(Self::new(catalog, supervisor, journal, orchestrator).with_list_limit(config.list_limit))
    }

    pub fn with_list_limit(mut self, limit: usize) -> Self {
        self.list_limit = limit.max(1);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Parse and handle raw command text. `None` for blank input.
    pub async fn handle_text(&self, requester: RequesterId, text: &str) -> Option<Reply> {
        let command = Command::parse(text)?;
        Some(self.handle(requester, command).await)
    }

    pub async fn handle(&self, requester: RequesterId, command: Command) -> Reply {
        tracing::debug!(requester, ?command, "Handling command");
        match command {
            Command::Start => Reply::text(self.start().await),
            Command::Help => Reply::text(HELP),
            Command::Version => Reply::text(self.version().await),
            Command::Status => Reply::text(self.status().await),
            Command::ListReleases => Reply::text(self.releases().await),
            Command::History => Reply::text(self.history().await),
            Command::Update(target) => {
                self.mutate(UpdateRequest::update(requester, target.as_deref()))
                    .await
            }
            Command::Restart => self.mutate(UpdateRequest::restart(requester)).await,
            Command::Unknown(word) => Reply::text(format!(
                "Unknown command '{word}'. Send /help for the list of commands."
            )),
        }
    }

    async fn start(&self) -> String {
        let running = match self.catalog.current_release().await {
            Ok(Some(release)) => format!("running {release}"),
            Ok(None) => "running an untagged checkout".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read current release");
                "running".to_string()
            }
        };
        format!("Release Agent is {running}. Send /help for the list of commands.")
    }

    async fn version(&self) -> String {
        match self.catalog.current_release().await {
            Ok(Some(release)) => format!("Current release: {release}"),
            Ok(None) => "Current release: unknown (no tag reachable from the checkout)".to_string(),
            Err(e) => failure("Could not read the current release", &e.into()),
        }
    }

    async fn status(&self) -> String {
        let (status, current) =
            tokio::join!(self.supervisor.status(), self.catalog.current_release());

        let release = match current {
            Ok(Some(release)) => release.id,
            Ok(None) => "unknown".to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read current release");
                "unknown".to_string()
            }
        };

        match status {
            Ok(status) => {
                let uptime = status
                    .uptime(Utc::now())
                    .map(format_uptime)
                    .unwrap_or_else(|| "-".to_string());
                format!(
                    "Service: {} ({}/{})\nRelease: {release}\nLoad state: {}\nUptime: {uptime}",
                    if status.is_active { "running" } else { "not running" },
                    status.active_state,
                    status.sub_state,
                    status.load_state,
                )
            }
            Err(e) => format!(
                "{}\nRelease: {release}",
                failure("Could not query the service", &e.into())
            ),
        }
    }

    async fn releases(&self) -> String {
        match self.catalog.list_releases().await {
            Ok(releases) => format_releases(&releases, self.list_limit),
            Err(e) => failure("Could not list releases", &e.into()),
        }
    }

    async fn history(&self) -> String {
        let journal = self.journal.clone();
        let entries = match tokio::task::spawn_blocking(move || journal.tail(HISTORY_LIMIT)).await
        {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => return failure("Could not read the handoff log", &e),
            Err(e) => return failure("Could not read the handoff log", &e.into()),
        };

        if entries.is_empty() {
            return "No updates or restarts recorded yet.".to_string();
        }
        let lines: Vec<String> = entries.iter().map(ToString::to_string).collect();
        format!("Recent handoffs:\n{}", lines.join("\n"))
    }

    async fn mutate(&self, request: UpdateRequest) -> Reply {
        let kind = request.kind;
        let report = self.orchestrator.handle(request).await;

        match report.outcome {
            LifecycleOutcome::Rejected { .. } => {
                Reply::text("You are not authorized to do that.")
            }
            LifecycleOutcome::Busy => Reply::text(
                "Another update or restart is already in progress. Try again once it finishes.",
            ),
            LifecycleOutcome::ResolutionFailed(e) => Reply::text(failure(
                match kind {
                    HandoffKind::Update => "Cannot update",
                    HandoffKind::Restart => "Cannot restart",
                },
                &e,
            )),
            LifecycleOutcome::HandoffFailed(e) => Reply::text(format!(
                "{} aborted: {e}. Nothing was changed and the agent is still running.",
                match kind {
                    HandoffKind::Update => "Update",
                    HandoffKind::Restart => "Restart",
                }
            )),
            LifecycleOutcome::HandedOff { record, .. } => {
                let text = match (kind, record.target.as_deref()) {
                    (HandoffKind::Update, Some(target)) => {
                        format!("Updating to {target}. The service will restart shortly.")
                    }
                    (_, Some(target)) => {
                        format!("Restarting on {target}. Back shortly.")
                    }
                    (_, None) => "Restarting. Back shortly.".to_string(),
                };
                Reply {
                    text,
                    terminate: true,
                }
            }
        }
    }
}

/// `<context>: <error>`, with a retry hint for transient failures.
fn failure(context: &str, error: &crate::Error) -> String {
    if error.is_transient() {
        format!("{context}: {error}. Please try again in a moment.")
    } else {
        format!("{context}: {error}")
    }
}

/// Newest first, at most `limit`, current release marked.
fn format_releases(releases: &[Release], limit: usize) -> String {
    if releases.is_empty() {
        return "No releases found.".to_string();
    }

    let mut lines = vec!["Releases (newest first):".to_string()];
    lines.extend(releases.iter().rev().take(limit).map(|r| {
        if r.is_current {
            format!("{} (current)", r.id)
        } else {
            r.id.clone()
        }
    }));
    if releases.len() > limit {
        lines.push(format!("... and {} older", releases.len() - limit));
    }
    lines.join("\n")
}
