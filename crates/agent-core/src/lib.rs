//! Self-update and lifecycle orchestration for Release Agent
//!
//! The agent manages exactly one working copy and one supervised service.
//! Read-only commands (version, status, release listing, history) go
//! straight to the catalog, supervisor and journal. Mutating commands
//! (update, restart) go through the [`Orchestrator`]: authorization,
//! resolution, re-validation, a durable [`HandoffRecord`], and a detached
//! handoff process that switches the working copy and restarts the service
//! after this process has exited.
//!
//! # Modules
//!
//! - [`access`] - static allow-list authorization
//! - [`commands`] - command text parsing, dispatch and replies
//! - [`config`] - the agent configuration artifact
//! - [`handoff`] - spawning the detached handoff process
//! - [`journal`] - append-only handoff log
//! - [`orchestrator`] - the update/restart state machine
//! - [`runner`] - what the detached handoff process does

pub mod access;
pub mod commands;
pub mod config;
pub mod error;
pub mod handoff;
pub mod journal;
pub mod orchestrator;
pub mod runner;

pub use access::{AccessGuard, AccessPolicy, RequesterId};
pub use commands::{Agent, Command, Reply};
pub use config::{AgentConfig, HandoffSettings};
pub use error::{Error, Result};
pub use handoff::{DetachedHandoff, HandoffRequest, HandoffRunner};
pub use journal::{
    HandoffAborted, HandoffKind, HandoffOutcome, HandoffRecord, Journal, JournalEntry,
};
pub use orchestrator::{
    LifecycleOutcome, LifecycleReport, LifecycleState, Orchestrator, UpdateRequest,
};
pub use runner::execute_handoff;
