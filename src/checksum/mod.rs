//! Checksum verification of local package files.
//!
//! Validates a file on disk against an asset's declared size and hash,
//! independent of how the file was obtained. SHA256 is preferred when the
//! feed declares one; SHA1 is the historical fallback. The check is purely
//! advisory; callers decide whether to delete and retry.
//!
//! Comparison rules:
//! - A declared SHA256 is compared exactly, case-sensitively. On mismatch
//!   the check fails without ever consulting SHA1; a stale SHA1 matching by
//!   accident must not mask a corrupted download.
//! - SHA1 is compared case-insensitively, because historical feeds emit
//!   mixed-case hex.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::{Result, UpdateError};
use crate::feed::Asset;

/// Size and digests of a file, computed in a single streaming pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    /// File length in bytes.
    pub size: u64,
    /// Lowercase hex SHA1 digest.
    pub sha1: String,
    /// Lowercase hex SHA256 digest.
    pub sha256: String,
}

/// Compute the size, SHA1, and SHA256 of a file in one pass.
///
/// Blocking; call from a blocking section or via [`file_digests`].
pub fn file_digests_blocking(path: &Path) -> Result<FileDigests> {
    let mut file = File::open(path)?;
    let mut sha1 = Sha1::new();
    let mut sha256 = Sha256::new();
    let mut size = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        sha1.update(&buf[..n]);
        sha256.update(&buf[..n]);
        size += n as u64;
    }
    Ok(FileDigests {
        size,
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
    })
}

/// Async wrapper around [`file_digests_blocking`].
pub async fn file_digests(path: &Path) -> Result<FileDigests> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || file_digests_blocking(&path)).await?
}

/// Verify a local file against an asset's declared size and hash.
///
/// Blocking variant of [`verify`]. Fails with [`UpdateError::Io`] if the
/// file does not exist and [`UpdateError::ChecksumFailed`] on any size or
/// digest mismatch.
pub fn verify_blocking(path: &Path, asset: &Asset) -> Result<()> {
    let meta = std::fs::metadata(path)?;
    if meta.len() != asset.size {
        return Err(UpdateError::size_mismatch(&asset.file_name, asset.size, meta.len()));
    }

    let digests = file_digests_blocking(path)?;
    if let Some(expected) = asset.sha256() {
        // Exact comparison; no SHA1 fallback once a SHA256 is declared.
        if digests.sha256 != expected {
            return Err(UpdateError::ChecksumFailed {
                file: asset.file_name.clone(),
                expected: expected.to_string(),
                actual: digests.sha256,
            });
        }
    } else if !digests.sha1.eq_ignore_ascii_case(&asset.sha1) {
        return Err(UpdateError::ChecksumFailed {
            file: asset.file_name.clone(),
            expected: asset.sha1.clone(),
            actual: digests.sha1,
        });
    }

    debug!(file = %asset.file_name, "checksum verified");
    Ok(())
}

/// Verify a local file against an asset's declared size and hash.
pub async fn verify(path: &Path, asset: &Asset) -> Result<()> {
    let path = path.to_path_buf();
    let asset = asset.clone();
    tokio::task::spawn_blocking(move || verify_blocking(&path, &asset)).await?
}
