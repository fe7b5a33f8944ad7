//! Blocking git2 reads of the local tag set
//!
//! These functions open the repository fresh on every call; the working copy
//! is the only owner of the "current release" mark.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use git2::{DescribeFormatOptions, DescribeOptions, ErrorCode, Reference, Repository};

use crate::{Error, Release, Result};

/// Open the working copy at `path`.
pub fn open(path: &Path) -> Result<Repository> {
    Repository::open(path).map_err(|e| {
        if e.code() == ErrorCode::NotFound {
            Error::NotARepository {
                path: path.to_path_buf(),
            }
        } else {
            Error::Git(e)
        }
    })
}

/// Full ref name for a tag, or `None` if `id` is not a valid tag name.
pub fn tag_ref(id: &str) -> Option<String> {
    let name = format!("refs/tags/{id}");
    Reference::is_valid_name(&name).then_some(name)
}

/// List all local tags that point (directly or through an annotated tag) at
/// a commit, oldest first.
///
/// Creation time is the tagger date for annotated tags and the commit date
/// for lightweight ones. Equal timestamps are ordered by identifier.
pub fn local_releases(repo: &Repository) -> Result<Vec<Release>> {
    let names = repo.tag_names(None)?;
    let mut releases = Vec::with_capacity(names.len());

    for name in names.iter().flatten() {
        match tag_created_at(repo, name) {
            Ok(created_at) => releases.push(Release::new(name, created_at)),
            Err(e @ Error::InvalidTimestamp { .. }) => {
                tracing::warn!(tag = %name, error = %e, "Skipping tag with an unusable creation time");
            }
            Err(e) => {
                tracing::debug!(tag = %name, error = %e, "Skipping tag that does not name a commit");
            }
        }
    }

    releases.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(releases)
}

/// Whether `id` is present in the local tag set.
pub fn has_tag(repo: &Repository, id: &str) -> bool {
    match tag_ref(id) {
        Some(name) => repo.find_reference(&name).is_ok(),
        None => false,
    }
}

/// Nearest tag reachable from HEAD, like `git describe --tags --abbrev=0`.
///
/// Returns `None` when no tag is reachable (or HEAD is unborn); any other
/// libgit2 failure is an error.
pub fn nearest_tag(repo: &Repository) -> Result<Option<String>> {
    let mut opts = DescribeOptions::new();
    opts.describe_tags();

    let description = match repo.describe(&opts) {
        Ok(description) => description,
        Err(e) if matches!(e.code(), ErrorCode::NotFound | ErrorCode::UnbornBranch) => {
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let mut format = DescribeFormatOptions::new();
    format.abbreviated_size(0);
    Ok(Some(description.format(Some(&format))?))
}

/// Creation time of a single tag.
pub fn tag_created_at(repo: &Repository, id: &str) -> Result<DateTime<Utc>> {
    let name = tag_ref(id).ok_or_else(|| Error::ReleaseNotFound { id: id.to_string() })?;
    let object = repo
        .revparse_single(&name)
        .map_err(|_| Error::ReleaseNotFound { id: id.to_string() })?;

    let seconds = match object.as_tag() {
        Some(tag) => match tag.tagger() {
            Some(tagger) => tagger.when().seconds(),
            None => tag.target()?.peel_to_commit()?.time().seconds(),
        },
        None => object.peel_to_commit()?.time().seconds(),
    };

    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| Error::InvalidTimestamp {
            id: id.to_string(),
            seconds,
        })
}
