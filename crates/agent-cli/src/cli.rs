//! CLI argument parsing using clap derive

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Release Agent - update and restart a supervised service from its own tags
#[derive(Parser, Debug)]
#[command(name = "release-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Agent configuration file (.toml, .json, .yaml)
    #[arg(short, long, global = true, env = "RELEASE_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Serve commands from stdin
    ///
    /// Each input line is `<requester-id> <command text>`, e.g.
    /// `7 /update v1.2`. Each reply is one JSON line on stdout. The process
    /// exits with code 0 right after handing off an update or restart.
    Listen,

    /// Show the running release
    Version,

    /// Show service state, release and uptime
    Status,

    /// List available releases, newest first
    #[command(alias = "tags")]
    Releases,

    /// Show recent updates and restarts
    History,

    /// Switch to a release and restart the service
    Update {
        /// Release tag, or `latest` (the default)
        target: Option<String>,

        /// Requester identity to authorize
        #[arg(long = "as", value_name = "ID", allow_negative_numbers = true)]
        requester: i64,
    },

    /// Restart the service on the current release
    Restart {
        /// Requester identity to authorize
        #[arg(long = "as", value_name = "ID", allow_negative_numbers = true)]
        requester: i64,
    },

    /// Carry out a handoff (spawned by the agent, not run by hand)
    #[command(hide = true)]
    Handoff {
        /// Journal record this handoff belongs to
        #[arg(long)]
        id: Uuid,

        /// Release to switch to; omitted for a plain restart
        #[arg(long)]
        target: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn update_takes_optional_target_and_requester() {
        let cli = Cli::try_parse_from(["release-agent", "update", "v1.1", "--as", "7"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Update {
                target: Some("v1.1".into()),
                requester: 7
            }
        );

        let cli = Cli::try_parse_from(["release-agent", "update", "--as", "7"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Update {
                target: None,
                requester: 7
            }
        );
    }

    #[test]
    fn update_requires_a_requester() {
        assert!(Cli::try_parse_from(["release-agent", "update", "v1.1"]).is_err());
    }

    #[test]
    fn tags_is_an_alias_for_releases() {
        let cli = Cli::try_parse_from(["release-agent", "tags"]).unwrap();
        assert_eq!(cli.command, Commands::Releases);
    }

    #[test]
    fn handoff_parses_id_and_target() {
        let cli = Cli::try_parse_from([
            "release-agent",
            "handoff",
            "--config",
            "/etc/agent.toml",
            "--id",
            "00000000-0000-0000-0000-000000000000",
            "--target",
            "v1.2",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/agent.toml")));
        assert_eq!(
            cli.command,
            Commands::Handoff {
                id: Uuid::nil(),
                target: Some("v1.2".into())
            }
        );
    }
}
