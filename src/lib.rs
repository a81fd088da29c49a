//! Updraft: a delta-aware self-update engine for desktop applications.
//!
//! Given a feed describing available release packages, updraft decides
//! whether an update exists, selects the cheapest way to obtain it (a
//! chain of binary deltas vs. one full package), downloads and verifies
//! it, and reconstructs a full installable package by sequentially
//! applying binary patches to a previously installed one.
//!
//! # Architecture Overview
//!
//! Control flow through the crate:
//!
//! 1. The [`resolver`] consumes the parsed [`feed`] (filtered through the
//!    [`rollout`] selector) and produces an [`UpdateInfo`]: the target full
//!    release, an optional local delta base, and the ordered delta chain.
//! 2. The [`download`] pipeline acquires the cross-process [`lock`],
//!    fetches either the deltas or the full package from a pluggable
//!    [`source`], and verifies every file through [`checksum`].
//! 3. When deltas were fetched, the [`delta`] applicator reconstructs the
//!    target package tree from the cached base and repackages it in the
//!    [`pack`] archive format.
//!
//! Delta failures are recovered internally by falling back to a full
//! download; checksum failures are always fatal to the attempt and never
//! retried with a weaker hash.
//!
//! # Core Modules
//!
//! - [`feed`] - release feed and asset model
//! - [`checksum`] - size/SHA256/SHA1 verification of local files
//! - [`resolver`] - update detection and delta-vs-full strategy
//! - [`rollout`] - deterministic staged-rollout bucketing
//! - [`source`] - the two-method transport contract + [`FileSource`]
//! - [`locator`] - per-installation paths, versions, and staging identity
//! - [`pack`] - the on-disk package archive format
//! - [`download`] - the locked, cancellable download pipeline
//! - [`delta`] - binary patch chain application
//! - [`lock`] - cross-process update mutual exclusion
//! - [`manager`] - the [`UpdateManager`] facade tying it all together
//!
//! # Example
//!
//! ```rust,no_run
//! use updraft::{DirectoryLocator, FileSource, UpdateManager};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> updraft::Result<()> {
//! let manager = UpdateManager::new(
//!     FileSource::new("/srv/releases/acme"),
//!     DirectoryLocator::for_app("AcmeApp", Some(semver::Version::new(1, 2, 0)))?,
//! );
//!
//! if let Some(info) = manager.check_for_updates().await? {
//!     manager.download_updates(&info, None, false, &CancellationToken::new()).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod core;
pub mod delta;
pub mod download;
pub mod feed;
pub mod lock;
pub mod locator;
pub mod manager;
pub mod pack;
pub mod resolver;
pub mod rollout;
pub mod source;
pub mod utils;

pub use crate::core::{Result, UpdateError};
pub use feed::{Asset, AssetKind, Feed, parse_feed};
pub use lock::UpdateLock;
pub use locator::{DirectoryLocator, LocalPackage, PackageLocator};
pub use manager::UpdateManager;
pub use resolver::{MAX_DELTA_CHAIN, UpdateInfo, UpdateOptions, check_for_updates};
pub use rollout::is_staging_match;
pub use source::{FileSource, UpdateSource};
pub use utils::progress::{ProgressCallback, ProgressScope, ProgressSink};
