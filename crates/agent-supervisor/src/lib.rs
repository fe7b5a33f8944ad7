//! Service supervisor bridge for Release Agent
//!
//! The agent never restarts its own service directly: it reads status
//! through [`SupervisorBridge::status`] and leaves
//! [`SupervisorBridge::restart`] to the detached handoff runner.

pub mod bridge;
pub mod error;
pub mod status;
pub mod systemd;

pub use bridge::SupervisorBridge;
pub use error::{Error, Result};
pub use status::{ServiceStatus, format_uptime};
pub use systemd::{SystemdBridge, SystemdScope};
