//! Shared test utilities for the Release Agent workspace.
//!
//! Dev-dependency only, never published.
//!
//! # Modules
//!
//! - [`git`] - real git working copies with tags at chosen timestamps
//! - [`fakes`] - in-memory catalog and supervisor that count calls

pub mod fakes;
pub mod git;
