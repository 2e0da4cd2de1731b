//! Single-instance lock (C5): exclusive file lock gating pipeline entry.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;

use crate::error::LockError;

/// Default lock file name, relative to the current directory, per §6.
pub const DEFAULT_LOCK_PATH: &str = "phenodcc.lock";

/// A held single-instance lock. Dropping or calling [`InstanceLock::release`] releases the OS
/// lock and deletes the file on a clean shutdown. An unclean exit (process killed) leaves the
/// file behind, but the OS releases the lock with the process, so the next run re-acquires
/// cleanly — this is why release deletes the file only after the OS lock is dropped, not before.
pub struct InstanceLock {
    path: PathBuf,
    file: Option<File>,
}

impl InstanceLock {
    /// Attempt to acquire the instance lock at `path`.
    ///
    /// - If `path` exists and is not a regular file, returns [`LockError::Invalid`].
    /// - If `path` exists, is a regular file, and is already locked by another process, returns
    ///   [`LockError::AlreadyRunning`].
    /// - Otherwise creates (if needed) and locks the file, returning the held lock.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, LockError> {
        let path = path.into();

        if path.exists() {
            let metadata = std::fs::metadata(&path).map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;
            if !metadata.is_file() {
                return Err(LockError::Invalid(path));
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                path,
                file: Some(file),
            }),
            Err(e) if is_lock_contended(&e) => Err(LockError::AlreadyRunning(path)),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock and delete the lock file. Called on clean shutdown; an unclean exit
    /// simply drops the process, which releases the OS lock but leaves the file on disk for the
    /// next run to find (and successfully re-lock, since the OS lock is gone).
    pub fn release(mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

fn is_lock_contended(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::PermissionDenied
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn acquires_and_releases_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phenodcc.lock");

        let lock = InstanceLock::acquire(&path).expect("should acquire");
        assert!(path.exists());
        lock.release().expect("should release");
        assert!(!path.exists());
    }

    #[test]
    #[serial]
    fn second_acquire_while_held_reports_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phenodcc.lock");

        let _held = InstanceLock::acquire(&path).expect("first should acquire");
        let second = InstanceLock::acquire(&path);
        assert!(matches!(second, Err(LockError::AlreadyRunning(_))));
    }

    #[test]
    #[serial]
    fn directory_at_lock_path_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phenodcc.lock");
        std::fs::create_dir(&path).unwrap();

        let result = InstanceLock::acquire(&path);
        assert!(matches!(result, Err(LockError::Invalid(_))));
    }

    #[test]
    #[serial]
    fn re_acquire_after_unclean_exit_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phenodcc.lock");

        {
            let lock = InstanceLock::acquire(&path).expect("should acquire");
            // Simulate an unclean exit: drop without calling release(), leaving the file behind.
            drop(lock);
        }
        assert!(path.exists());

        let reacquired = InstanceLock::acquire(&path);
        assert!(reacquired.is_ok());
    }
}
