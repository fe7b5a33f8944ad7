//! Git working-copy fixtures.
//!
//! Everything is built with `git2` and explicit signatures so tag creation
//! times are deterministic. Only [`clone_working_copy`] relies on a real
//! remote, and it is a local path.

use std::fs;
use std::path::Path;

use git2::{Oid, Repository, Signature, Time};

const NAME: &str = "Release Bot";
const EMAIL: &str = "release-bot@example.com";

fn signature(secs: i64) -> Signature<'static> {
    Signature::new(NAME, EMAIL, &Time::new(secs, 0))
        .unwrap_or_else(|e| panic!("signature: {e}"))
}

/// Initialise an empty repository with a committer identity configured.
///
/// # Panics
/// Panics if git2 fails.
pub fn init_repo(path: &Path) -> Repository {
    let repo = Repository::init(path)
        .unwrap_or_else(|e| panic!("init_repo: failed at {}: {e}", path.display()));
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", NAME).unwrap();
        config.set_str("user.email", EMAIL).unwrap();
        config.set_bool("commit.gpgsign", false).unwrap();
    }
    repo
}

/// Write `file` with `content` and commit it on HEAD at time `secs`.
///
/// # Panics
/// Panics if any git operation fails.
pub fn commit_file(repo: &Repository, file: &str, content: &str, secs: i64) -> Oid {
    let workdir = repo
        .workdir()
        .unwrap_or_else(|| panic!("commit_file: bare repository"));
    fs::write(workdir.join(file), content)
        .unwrap_or_else(|e| panic!("commit_file: failed to write {file}: {e}"));

    let mut index = repo.index().unwrap();
    index.add_path(Path::new(file)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();

    let sig = signature(secs);
    repo.commit(Some("HEAD"), &sig, &sig, &format!("Update {file}"), &tree, &parents)
        .unwrap_or_else(|e| panic!("commit_file: commit failed: {e}"))
}

/// Create an annotated tag `name` on HEAD with tagger time `secs`.
///
/// # Panics
/// Panics if HEAD is unborn or tagging fails.
pub fn tag_head(repo: &Repository, name: &str, secs: i64) -> Oid {
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    repo.tag(name, head.as_object(), &signature(secs), &format!("Release {name}"), false)
        .unwrap_or_else(|e| panic!("tag_head: failed to tag {name}: {e}"))
}

/// Create a lightweight tag `name` on HEAD.
pub fn lightweight_tag_head(repo: &Repository, name: &str) -> Oid {
    let head = repo.head().unwrap().peel_to_commit().unwrap();
    repo.tag_lightweight(name, head.as_object(), false)
        .unwrap_or_else(|e| panic!("lightweight_tag_head: failed to tag {name}: {e}"))
}

/// A working copy where each `(tag, secs)` gets its own commit and an
/// annotated tag created at `secs`, in slice order. HEAD ends on the last
/// commit, so the last tag is the current release.
pub fn repo_with_releases(path: &Path, releases: &[(&str, i64)]) -> Repository {
    let repo = init_repo(path);
    for (tag, secs) in releases {
        commit_file(&repo, "VERSION", tag, *secs);
        tag_head(&repo, tag, *secs);
    }
    repo
}

/// Clone `origin` into `dest` so that `origin` is the `origin` remote.
///
/// # Panics
/// Panics if cloning fails.
pub fn clone_working_copy(origin: &Path, dest: &Path) -> Repository {
    let url = origin.to_string_lossy().to_string();
    Repository::clone(&url, dest)
        .unwrap_or_else(|e| panic!("clone_working_copy: failed to clone {url}: {e}"))
}
