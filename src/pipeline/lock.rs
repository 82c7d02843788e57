// src/pipeline/lock.rs

//! Per-archive exclusive lock
//!
//! A run holds an advisory lock on a sibling file `.<archive-name>.lock` for
//! its whole duration, so two runs can never mutate the same archive at
//! once. Acquisition never blocks: a held lock is reported as
//! [`Error::Busy`] immediately.
//!
//! The lock file itself is left in place after release. Deleting it would
//! race with a run that has opened but not yet locked it.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock guarding one archive path
///
/// Released when dropped.
#[derive(Debug)]
pub struct ArchiveLock {
    /// Kept open to hold the lock
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl ArchiveLock {
    /// Lock file path for an archive
    pub fn lock_path(archive: &Path) -> PathBuf {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        archive.with_file_name(format!(".{}.lock", name))
    }

    /// Try to lock `archive` without blocking
    pub fn try_acquire(archive: &Path) -> Result<Self> {
        let path = Self::lock_path(archive);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::write(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("Acquired archive lock at {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Archive lock already held at {}", path.display());
                Err(Error::Busy(archive.to_path_buf()))
            }
            Err(e) => Err(Error::write(&path, e)),
        }
    }

    /// Path to the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ArchiveLock {
    fn drop(&mut self) {
        // Lock is released when the file is closed
        debug!("Released archive lock at {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lock_path() {
        assert_eq!(
            ArchiveLock::lock_path(Path::new("/builds/Runner.ipa")),
            PathBuf::from("/builds/.Runner.ipa.lock")
        );
    }

    #[test]
    fn test_try_acquire_fails_when_held() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("Runner.ipa");

        let lock = ArchiveLock::try_acquire(&archive).unwrap();
        assert!(lock.path().exists());

        match ArchiveLock::try_acquire(&archive) {
            Err(Error::Busy(path)) => assert_eq!(path, archive),
            other => panic!("expected busy, got {:?}", other),
        }

        drop(lock);
        let _again = ArchiveLock::try_acquire(&archive).unwrap();
    }

    #[test]
    fn test_lock_file_survives_release() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("Runner.ipa");

        let lock = ArchiveLock::try_acquire(&archive).unwrap();
        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(path.exists());
    }
}
