//! Release Agent CLI
//!
//! Reads commands (from stdin with `listen`, or one at a time as
//! subcommands), updates and restarts the supervised service, and carries
//! out the detached handoff.
//!
//! Exit codes: `0` on success, including the deliberate exit right after a
//! handoff; `1` on fatal startup errors and failed requests.

mod cli;
mod error;
mod listen;
mod logging;

use std::path::PathBuf;

use agent_core::{Agent, AgentConfig, Command, execute_handoff};
use clap::Parser;
use colored::Colorize;
use tokio::io::BufReader;

use cli::{Cli, Commands};
use error::{CliError, Result};
use listen::ListenEnd;

/// Requester used for read-only one-shot commands
const LOCAL_REQUESTER: i64 = 0;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.verbose) {
        eprintln!("{}: {}", "warning".yellow().bold(), e);
    }

    // The process ends here, runtime included, right after a handoff reply.
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Listen => cmd_listen(&config).await,
        Commands::Version => cmd_read(&config, Command::Version).await,
        Commands::Status => cmd_read(&config, Command::Status).await,
        Commands::Releases => cmd_read(&config, Command::ListReleases).await,
        Commands::History => cmd_read(&config, Command::History).await,
        Commands::Update { target, requester } => {
            cmd_mutate(&config, requester, Command::Update(target)).await
        }
        Commands::Restart { requester } => cmd_mutate(&config, requester, Command::Restart).await,
        Commands::Handoff { id, target } => {
            let supervisor = config.supervisor();
            let outcome = execute_handoff(&config, &supervisor, id, target.as_deref()).await?;
            Ok(if outcome.success { 0 } else { 1 })
        }
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AgentConfig> {
    let path = path.ok_or_else(|| {
        CliError::user("No configuration file given; pass --config or set RELEASE_AGENT_CONFIG")
    })?;
    Ok(AgentConfig::load(&path)?)
}

async fn cmd_listen(config: &AgentConfig) -> Result<i32> {
    let agent = Agent::from_config(config)?;
    tracing::info!(
        project = %config.project_path.display(),
        service = %config.service_name,
        "Release Agent started"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    match listen::listen(&agent, stdin, &mut stdout).await? {
        ListenEnd::HandedOff => {
            tracing::info!("Exiting for handoff");
            Ok(0)
        }
        ListenEnd::Eof => Ok(0),
    }
}

async fn cmd_read(config: &AgentConfig, command: Command) -> Result<i32> {
    let agent = Agent::from_config(config)?;
    let reply = agent.handle(LOCAL_REQUESTER, command).await;
    println!("{}", reply.text);
    Ok(0)
}

async fn cmd_mutate(config: &AgentConfig, requester: i64, command: Command) -> Result<i32> {
    let agent = Agent::from_config(config)?;
    let reply = agent.handle(requester, command).await;
    println!("{}", reply.text);
    Ok(if reply.terminate { 0 } else { 1 })
}
