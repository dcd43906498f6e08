//! Per-service host lock held for the duration of a run.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use super::PreconditionError;

/// Exclusive advisory lock; released on drop
#[derive(Debug)]
pub struct HostLock {
    file: File,
    path: PathBuf,
}

impl HostLock {
    /// Take the lock at `path` without waiting
    pub fn acquire(path: &Path) -> Result<Self, PreconditionError> {
        let open_error = |source| PreconditionError::LockFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(open_error)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(open_error)?;

        file.try_lock_exclusive()
            .map_err(|_| PreconditionError::Locked(path.to_path_buf()))?;
        debug!(path = %path.display(), "Host lock acquired");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}
