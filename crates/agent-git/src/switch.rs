//! Forced working-copy switch to a release

use std::path::Path;

use git2::build::CheckoutBuilder;

use crate::{Error, Result, tags};

/// Switch the working copy at `path` to the tag `id`.
///
/// Tracked files are forcibly reset to the release's tree (local
/// modifications are discarded) and HEAD is detached at the tagged commit.
/// Untracked files such as logs and configuration are left alone.
pub fn switch_to_release(path: &Path, id: &str) -> Result<()> {
    let repo = tags::open(path)?;
    let name = tags::tag_ref(id).ok_or_else(|| Error::ReleaseNotFound { id: id.to_string() })?;

    let commit = repo
        .revparse_single(&name)
        .and_then(|object| object.peel_to_commit())
        .map_err(|_| Error::ReleaseNotFound { id: id.to_string() })?;

    tracing::info!(release = %id, commit = %commit.id(), path = %path.display(), "Switching working copy");

    let mut checkout = CheckoutBuilder::new();
    checkout.force();
    repo.checkout_tree(commit.as_object(), Some(&mut checkout))?;
    repo.set_head_detached(commit.id())?;

    Ok(())
}
