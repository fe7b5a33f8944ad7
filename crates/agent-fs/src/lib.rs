//! Filesystem primitives for Release Agent
//!
//! Everything that must survive the agent's own process lives on disk, so
//! the writes here are explicit about locking and flushing:
//!
//! - [`io::append_line`] for the append-only handoff journal
//! - [`LockFile`] for cross-process mutual exclusion
//! - [`ConfigStore`] for loading the static configuration artifact

pub mod config;
pub mod error;
pub mod io;
pub mod lock;

pub use config::ConfigStore;
pub use error::{Error, Result};
pub use lock::LockFile;
