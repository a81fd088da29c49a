//! Cross-process mutual exclusion for update operations.
//!
//! A fixed-name lock file in the packages directory, held under an
//! exclusive OS advisory lock for the duration of one download-and-apply
//! operation. Two processes targeting the same installation must never
//! mutate update state concurrently; this is the sole serialization point.
//!
//! The lock is released when the [`UpdateLock`] is dropped, on every exit
//! path, including errors, cancellation, and unwinds. The file itself is
//! left in place.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::{debug, warn};

use crate::core::{Result, UpdateError};
use crate::utils::fs::ensure_dir;

/// Lock file name inside the packages directory.
pub const LOCK_FILE_NAME: &str = ".updatelock";

/// Exclusive cross-process lock over one installation's update state.
#[derive(Debug)]
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    fn open_lock_file(packages_dir: &Path) -> Result<(File, PathBuf)> {
        ensure_dir(packages_dir)?;
        let path = packages_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        Ok((file, path))
    }

    /// Acquire the update lock, blocking until it is available.
    ///
    /// The wait happens on a blocking task so the async runtime is not
    /// stalled.
    pub async fn acquire(packages_dir: &Path) -> Result<Self> {
        let packages_dir = packages_dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let (file, path) = Self::open_lock_file(&packages_dir)?;
            file.lock_exclusive()?;
            debug!(path = %path.display(), "update lock acquired");
            Ok(Self { file, path })
        })
        .await?
    }

    /// Acquire the update lock, failing immediately with
    /// [`UpdateError::LockUnavailable`] if another process holds it.
    pub async fn try_acquire(packages_dir: &Path) -> Result<Self> {
        let packages_dir = packages_dir.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let (file, path) = Self::open_lock_file(&packages_dir)?;
            if !file.try_lock_exclusive()? {
                return Err(UpdateError::LockUnavailable { path });
            }
            debug!(path = %path.display(), "update lock acquired");
            Ok(Self { file, path })
        })
        .await?
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        // The OS releases the lock when the handle closes; unlock
        // explicitly so the release is immediate and observable.
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "failed to unlock update lock");
        }
    }
}
