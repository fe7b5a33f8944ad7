//! Durable I/O operations with file locking

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use fs2::FileExt;

use crate::{Error, Result};

/// Append a single line to a file and flush it to disk.
///
/// The file is created if missing. An exclusive advisory lock is held for the
/// duration of the write so concurrent writers (the agent and a detached
/// handoff runner) never interleave partial lines. The call returns only
/// after `sync_all`, so a line that was appended survives an immediate
/// process exit.
pub fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::io(path, e))?;

    file.lock_exclusive().map_err(|_| Error::LockFailed {
        path: path.to_path_buf(),
    })?;

    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line.trim_end_matches('\n'));
    buf.push('\n');

    file.write_all(buf.as_bytes())
        .map_err(|e| Error::io(path, e))?;
    file.sync_all().map_err(|e| Error::io(path, e))?;

    // Lock released when file is dropped
    Ok(())
}

/// Read all lines of a file under a shared lock.
///
/// A missing file reads as empty: an agent that never handed off has no
/// journal yet.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::io(path, e)),
    };
    file.lock_shared().map_err(|_| Error::LockFailed {
        path: path.to_path_buf(),
    })?;

    // Read through the locked handle
    let mut content = String::new();
    use std::io::Read;
    (&file)
        .read_to_string(&mut content)
        .map_err(|e| Error::io(path, e))?;

    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect())
}

/// Read text content from a file.
pub fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::io(path, e))
}
