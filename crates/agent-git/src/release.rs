//! Release values and target resolution

use std::fmt;

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Keyword that selects the newest release.
const LATEST: &str = "latest";

/// A tagged release observed in the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    /// Tag name, opaque to the agent
    pub id: String,

    /// Creation time used for ordering (tagger date, or commit date for
    /// lightweight tags)
    pub created_at: DateTime<Utc>,

    /// Whether this is the working copy's current release
    pub is_current: bool,
}

impl Release {
    /// Create a release that is not marked current.
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            created_at,
            is_current: false,
        }
    }

    /// Mark or unmark this release as current.
    pub fn with_current(mut self, is_current: bool) -> Self {
        self.is_current = is_current;
        self
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// What an update request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetToken {
    /// The release with the most recent creation time
    Latest,
    /// Exactly this identifier, case-sensitive
    Exact(String),
}

impl TargetToken {
    /// Interpret the raw argument of an update command.
    ///
    /// A missing or blank argument and the keyword `latest` (any case) both
    /// mean [`TargetToken::Latest`]; anything else is taken verbatim.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => Self::Latest,
            Some(s) if s.eq_ignore_ascii_case(LATEST) => Self::Latest,
            Some(s) => Self::Exact(s.to_string()),
        }
    }
}

impl fmt::Display for TargetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(LATEST),
            Self::Exact(id) => f.write_str(id),
        }
    }
}

/// Resolve a target token against a catalog snapshot.
///
/// `Latest` picks the maximum creation time (ties broken by identifier so the
/// answer does not depend on input order). `Exact` requires a byte-for-byte
/// identifier match; there is no prefix or fuzzy matching.
pub fn resolve_in(releases: &[Release], token: &TargetToken) -> Result<Release> {
    let found = match token {
        TargetToken::Latest => releases
            .iter()
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id))),
        TargetToken::Exact(id) => releases.iter().find(|r| r.id == *id),
    };

    found.cloned().ok_or_else(|| Error::ReleaseNotFound {
        id: token.to_string(),
    })
}
