//! File system helpers.

use std::path::Path;

use crate::core::Result;

/// Create a directory and all of its parents if missing.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Create the parent directory of `path` if missing.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    Ok(())
}

/// Move `src` over `dst`, replacing any existing file.
///
/// A plain rename on most platforms; on Windows a rename onto an existing
/// file fails, so the destination is removed first and the rename retried.
pub fn replace_file(src: &Path, dst: &Path) -> Result<()> {
    ensure_parent_dir(dst)?;
    match std::fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(first) => {
            if dst.exists() {
                std::fs::remove_file(dst)?;
                std::fs::rename(src, dst)?;
                Ok(())
            } else {
                Err(first.into())
            }
        }
    }
}
