//! Error types for updraft operations.
//!
//! The error system follows two principles:
//! 1. **Strongly-typed errors** so hosts can match on the failure mode and
//!    decide whether to retry, fall back, or surface the problem.
//! 2. **Self-describing messages** that carry the file, the expectation, and
//!    what was actually observed.
//!
//! Delta-path failures ([`UpdateError::PatchFailed`] and checksum failures
//! inside a chain) are recovered internally by the download pipeline, which
//! falls back to a full package download. Full-download failures are
//! surfaced to the caller as-is.

use std::path::PathBuf;
use thiserror::Error;

/// Convenient result alias for updater operations.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// Errors that can occur while checking for, downloading, or applying an
/// update.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// The release feed payload could not be decoded.
    ///
    /// Surfaced from a check-for-updates call rather than being folded into
    /// "no update available": a host that cannot read its own feed should
    /// know about it.
    #[error("malformed release feed: {reason}")]
    MalformedFeed {
        /// Decoder diagnostic for the unparseable payload.
        reason: String,
    },

    /// A local file did not match an asset's declared size or hash.
    ///
    /// Always fatal to the current attempt; verification is never retried
    /// with a weaker hash.
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumFailed {
        /// File name or path that failed verification.
        file: String,
        /// Expected size or digest.
        expected: String,
        /// Observed size or digest.
        actual: String,
    },

    /// Another process holds the update lock for this installation.
    #[error("update lock is held by another process: {path}")]
    LockUnavailable {
        /// Path of the contended lock file.
        path: PathBuf,
    },

    /// Applying a binary patch to a single file failed.
    ///
    /// Aborts the whole delta chain; the pipeline recovers by downloading
    /// the full package instead.
    #[error("patch application failed for {file}: {reason}")]
    PatchFailed {
        /// Payload-relative path of the file being patched.
        file: String,
        /// What went wrong.
        reason: String,
    },

    /// No installed application version could be detected.
    #[error("no installed version detected; the application is not installed")]
    NotInstalled,

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// A package archive was structurally invalid (missing manifest,
    /// unparseable manifest, bad file name).
    #[error("invalid package {file}: {reason}")]
    InvalidPackage {
        /// Archive file name.
        file: String,
        /// What made it invalid.
        reason: String,
    },

    /// Failed to perform an I/O operation.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to read or write a package archive.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Failed to parse or compare versions.
    #[error("version error: {0}")]
    Version(#[from] semver::Error),

    /// A background task could not be joined.
    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}

impl UpdateError {
    /// Helper for checksum failures expressed in bytes rather than digests.
    pub fn size_mismatch(file: impl Into<String>, expected: u64, actual: u64) -> Self {
        UpdateError::ChecksumFailed {
            file: file.into(),
            expected: format!("{expected} bytes"),
            actual: format!("{actual} bytes"),
        }
    }
}
