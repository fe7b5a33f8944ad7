//! Release catalog for Release Agent
//!
//! Releases are git tags in the agent's own working copy. This crate only
//! ever observes them: it synchronizes tags from the remote, lists them in
//! creation order, reports the nearest reachable tag as the current release,
//! and (for the handoff runner) force-switches the working copy to a tag.

pub mod catalog;
pub mod error;
pub mod release;
pub mod switch;
pub mod tags;

pub use catalog::{GitCatalog, ReleaseCatalog};
pub use error::{Error, Result};
pub use release::{Release, TargetToken, resolve_in};
pub use switch::switch_to_release;
