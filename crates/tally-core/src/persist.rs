//! Safe replacement of ledger files on disk
//!
//! A rewrite is all-or-nothing: the new text goes to a temp file in the same
//! directory, is synced, then renamed over the target. A sibling `.lock` file keeps
//! two runs from writing the same destination.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Atomically replace `path` with `contents`
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut temp = NamedTempFile::new_in(&parent)
        .map_err(|e| Error::structural(path, format!("Failed to create temp file: {}", e)))?;
    temp.write_all(contents.as_bytes())
        .map_err(|e| Error::structural(path, format!("Failed to write temp file: {}", e)))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::structural(path, format!("Failed to sync temp file: {}", e)))?;
    temp.persist(path)
        .map_err(|e| Error::structural(path, format!("Atomic replace failed: {}", e.error)))?;

    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// Exclusive lock on a ledger file, released on drop
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    /// Create `<target>.lock`; fails if another run holds it
    pub fn acquire(target: &Path) -> Result<Self> {
        let mut name = target.as_os_str().to_owned();
        name.push(".lock");
        let path = PathBuf::from(name);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => Error::structural(
                    target,
                    format!("locked by another run (remove {} if stale)", path.display()),
                ),
                _ => Error::structural(target, format!("Failed to create lock file: {}", e)),
            })?;
        // The lock is the file's existence; the pid is only a hint for humans
        if let Err(e) = writeln!(file, "{}", std::process::id()) {
            debug!("Failed to write pid into {}: {}", path.display(), e);
        }

        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}
