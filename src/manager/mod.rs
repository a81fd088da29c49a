//! The update manager facade.
//!
//! [`UpdateManager`] ties the collaborators together: an [`UpdateSource`]
//! says where releases come from, a [`PackageLocator`] says where this
//! installation keeps its state, and [`UpdateOptions`] carry the caller's
//! channel and downgrade choices. Both collaborators are injected at
//! construction; the engine keeps no process-wide state.
//!
//! A typical host loop:
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use updraft::{DirectoryLocator, FileSource, UpdateManager, UpdateOptions};
//!
//! # async fn example() -> updraft::Result<()> {
//! let source = FileSource::new("/srv/releases/acme");
//! let locator = DirectoryLocator::for_app("AcmeApp", Some(semver::Version::new(1, 0, 0)))?;
//! let manager = UpdateManager::new(source, locator).with_options(UpdateOptions::default());
//!
//! if let Some(info) = manager.check_for_updates().await? {
//!     let cancel = CancellationToken::new();
//!     manager
//!         .download_updates(&info, Some(Box::new(|pct| println!("{pct}%"))), false, &cancel)
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{Result, UpdateError};
use crate::download;
use crate::locator::{LocalPackage, PackageLocator};
use crate::resolver::{self, UpdateInfo, UpdateOptions};
use crate::source::UpdateSource;
use crate::utils::progress::{ProgressCallback, ProgressSink};

/// Checks for, downloads, and reconstructs application updates.
pub struct UpdateManager {
    source: Arc<dyn UpdateSource>,
    locator: Arc<dyn PackageLocator>,
    options: UpdateOptions,
}

impl UpdateManager {
    /// A manager over the given source and locator, with default options.
    pub fn new(
        source: impl UpdateSource + 'static,
        locator: impl PackageLocator + 'static,
    ) -> Self {
        Self {
            source: Arc::new(source),
            locator: Arc::new(locator),
            options: UpdateOptions::default(),
        }
    }

    /// Replace the update options.
    pub fn with_options(mut self, options: UpdateOptions) -> Self {
        self.options = options;
        self
    }

    /// The options in effect.
    pub fn options(&self) -> &UpdateOptions {
        &self.options
    }

    /// Fetch the feed and decide whether an update is available.
    ///
    /// Returns `Ok(None)` when the installation is up to date. Fails with
    /// [`UpdateError::NotInstalled`] when the locator cannot detect an
    /// installed version, and [`UpdateError::MalformedFeed`] when the
    /// source returns an unparseable feed; those are surfaced rather than
    /// treated as "no update".
    pub async fn check_for_updates(&self) -> Result<Option<UpdateInfo>> {
        let installed = self
            .locator
            .installed_version()
            .cloned()
            .ok_or(UpdateError::NotInstalled)?;
        let staging_id = self.locator.staging_id();
        let cached = self.latest_full_package().await?;

        let feed = self
            .source
            .release_feed(
                self.locator.app_id(),
                self.options.channel(),
                staging_id.as_ref(),
                cached.as_ref().map(|p| &p.asset),
            )
            .await?;
        debug!(
            channel = self.options.channel(),
            assets = feed.assets.len(),
            "release feed fetched"
        );

        Ok(resolver::check_for_updates(
            &feed,
            &installed,
            cached.as_ref().map(|p| &p.asset),
            staging_id.as_ref(),
            &self.options,
        ))
    }

    /// Download the update described by `info`, reconstructing it from
    /// deltas when that is the selected route.
    ///
    /// Serialized against every other process updating the same
    /// installation via the update lock. `ignore_deltas` forces the
    /// full-package route; `cancel` is honored between phases. Progress is
    /// delivered to `on_progress` as monotonic even percentages.
    pub async fn download_updates(
        &self,
        info: &UpdateInfo,
        on_progress: Option<ProgressCallback>,
        ignore_deltas: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let progress = match on_progress {
            Some(callback) => ProgressSink::new(callback),
            None => ProgressSink::noop(),
        };
        download::run(
            self.source.as_ref(),
            self.locator.as_ref(),
            info,
            progress,
            ignore_deltas,
            cancel,
        )
        .await
    }

    /// The newest locally cached full package, off the async thread.
    async fn latest_full_package(&self) -> Result<Option<LocalPackage>> {
        let locator = Arc::clone(&self.locator);
        tokio::task::spawn_blocking(move || locator.latest_full_package()).await?
    }
}
