//! Exclusive lock files for cross-process mutual exclusion

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::{Error, Result};

/// An exclusive advisory lock held on a file for as long as the value lives.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    /// Try to take the lock without blocking.
    ///
    /// Returns `Ok(None)` when another process already holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| Error::io(path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Lock acquired");
                Ok(Some(Self {
                    path: path.to_path_buf(),
                    file,
                }))
            }
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(_) => Err(Error::LockFailed {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_is_contended() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("handoff.lock");

        let first = LockFile::try_acquire(&path).unwrap();
        assert!(first.is_some());

        let second = LockFile::try_acquire(&path).unwrap();
        assert!(second.is_none(), "lock must not be granted twice");
    }

    #[test]
    fn lock_is_released_on_drop() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("handoff.lock");

        let first = LockFile::try_acquire(&path).unwrap();
        drop(first);

        let again = LockFile::try_acquire(&path).unwrap();
        assert!(again.is_some());
        assert_eq!(again.unwrap().path(), path.as_path());
    }
}
