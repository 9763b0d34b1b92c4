use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::StoreError;

/// Advisory exclusive lock guarding the repository against concurrent
/// writers. Modeled after cargo's file lock; released on drop.
#[derive(Debug)]
pub struct RepoLock {
    file: Option<File>,
    path: PathBuf,
}

impl RepoLock {
    /// Attempts to take the exclusive lock without blocking.
    ///
    /// Returns [`StoreError::Conflict`] when another process already holds
    /// it. The lock file (and intermediate directories) are created if
    /// absent.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        sys::try_lock_exclusive(&file).map_err(|e| {
            if sys::error_contended(&e) {
                StoreError::Conflict
            } else {
                StoreError::Io(e)
            }
        })?;
        Ok(Self {
            file: Some(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RepoLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = sys::unlock(&file);
        }
    }
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io::{Error, Result};
    use std::os::unix::io::AsRawFd;

    pub(super) fn try_lock_exclusive(file: &File) -> Result<()> {
        flock(file, libc::LOCK_EX | libc::LOCK_NB)
    }

    pub(super) fn unlock(file: &File) -> Result<()> {
        flock(file, libc::LOCK_UN)
    }

    pub(super) fn error_contended(err: &Error) -> bool {
        err.raw_os_error().map_or(false, |x| x == libc::EWOULDBLOCK)
    }

    fn flock(file: &File, flag: libc::c_int) -> Result<()> {
        let ret = unsafe { libc::flock(file.as_raw_fd(), flag) };
        if ret < 0 {
            Err(Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

#[cfg(not(unix))]
mod sys {
    use std::fs::File;
    use std::io::{Error, Result};

    // Non-unix hosts fall back to sled's own database lock; the repo-level
    // lock degrades to a marker file.
    pub(super) fn try_lock_exclusive(_file: &File) -> Result<()> {
        Ok(())
    }

    pub(super) fn unlock(_file: &File) -> Result<()> {
        Ok(())
    }

    pub(super) fn error_contended(_err: &Error) -> bool {
        false
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_in_process_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        let _held = RepoLock::acquire(&path).unwrap();
        // flock is per-open-file, so a second handle in the same process
        // still contends.
        assert!(matches!(
            RepoLock::acquire(&path),
            Err(StoreError::Conflict)
        ));
    }

    #[test]
    fn released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".lock");
        drop(RepoLock::acquire(&path).unwrap());
        assert!(RepoLock::acquire(&path).is_ok());
    }
}
