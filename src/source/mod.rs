//! Pluggable update sources.
//!
//! An [`UpdateSource`] supplies exactly two things: the release feed for a
//! channel, and the bytes of one release entry. Everything else (caching,
//! verification, delta strategy, locking) lives in the engine. Hosts
//! implement this trait for whatever transport backs their releases (an
//! HTTP server, a release API, a network share).
//!
//! [`FileSource`] is the built-in reference implementation over a local
//! directory, used throughout the test suite.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::core::{Result, UpdateError};
use crate::feed::{Asset, Feed, parse_feed};
use crate::utils::fs::ensure_parent_dir;
use crate::utils::progress::ProgressScope;

/// Abstraction over where release packages come from.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch the current release feed for `(app_id, channel)`.
    ///
    /// `staging_id` and `latest_local` let server-backed sources answer
    /// with a pre-filtered or delta-optimized feed; sources without that
    /// capability ignore them (the resolver re-applies staging client-side
    /// either way).
    async fn release_feed(
        &self,
        app_id: &str,
        channel: &str,
        staging_id: Option<&Uuid>,
        latest_local: Option<&Asset>,
    ) -> Result<Feed>;

    /// Download one release entry to `dest`, reporting transport progress
    /// as 0–100 on `progress` and honoring `cancel` between writes.
    async fn download_release_entry(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &ProgressScope,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Serves a feed and release entries from a local directory.
///
/// The directory holds `releases.<channel>.json` next to the package
/// archives it references, the same layout a static release server would
/// expose.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
}

impl FileSource {
    /// A source over the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The directory this source reads from.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl UpdateSource for FileSource {
    async fn release_feed(
        &self,
        _app_id: &str,
        channel: &str,
        _staging_id: Option<&Uuid>,
        _latest_local: Option<&Asset>,
    ) -> Result<Feed> {
        let path = self.root.join(Feed::file_name(channel));
        debug!(path = %path.display(), "reading release feed");
        let bytes = tokio::fs::read(&path).await?;
        parse_feed(&bytes)
    }

    async fn download_release_entry(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &ProgressScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let src = self.root.join(&asset.file_name);
        ensure_parent_dir(dest)?;

        let mut reader = tokio::fs::File::open(&src).await?;
        let mut writer = tokio::fs::File::create(dest).await?;
        let mut copied = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            if cancel.is_cancelled() {
                return Err(UpdateError::Cancelled);
            }
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n]).await?;
            copied += n as u64;
            progress.report_fraction(copied, asset.size);
        }
        writer.flush().await?;
        progress.finish();
        debug!(file = %asset.file_name, bytes = copied, "release entry copied");
        Ok(())
    }
}
