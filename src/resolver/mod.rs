//! Update resolution: decide whether an update exists and how to obtain it.
//!
//! [`check_for_updates`] is a pure function over the feed, the installed
//! version, and the newest locally cached full package. It elects the
//! target full release, and, when a cached base exists, weighs a chain of
//! binary deltas against downloading the full package outright.
//!
//! A delta chain is only worth the per-file patch overhead within limits:
//! chains longer than [`MAX_DELTA_CHAIN`] patches, or whose combined size
//! exceeds the full package itself, are rejected in favor of one full
//! download.

use semver::Version;
use tracing::debug;
use uuid::Uuid;

use crate::feed::{Asset, AssetKind, Feed};
use crate::rollout::is_staging_match;

/// Longest delta chain considered cheaper than a full download.
pub const MAX_DELTA_CHAIN: usize = 10;

/// The update channel used when the caller does not request one.
pub const DEFAULT_CHANNEL: &str = "stable";

/// Caller-supplied knobs for update resolution.
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Update channel to track. `None` means [`DEFAULT_CHANNEL`]; setting it
    /// explicitly marks the check as a channel switch, which (together with
    /// `allow_downgrade`) permits re-fetching the currently installed
    /// version from the new channel.
    pub channel: Option<String>,
    /// Permit moving to a lower version than the one installed. Downgrades
    /// always use a full package, never a patch chain.
    pub allow_downgrade: bool,
}

impl UpdateOptions {
    /// The effective channel name.
    pub fn channel(&self) -> &str {
        self.channel.as_deref().unwrap_or(DEFAULT_CHANNEL)
    }

    /// Whether the caller explicitly requested a non-default channel.
    pub fn explicit_channel(&self) -> bool {
        self.channel.is_some()
    }
}

/// The resolver's verdict: what to end up at, and the cheapest way there.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateInfo {
    /// The full release to end up at.
    pub target_full: Asset,
    /// The locally cached full package usable as a delta base, if any.
    pub base_full: Option<Asset>,
    /// Applicable deltas, ascending by version, ending at
    /// `target_full.version`. Non-empty only when `base_full` is present.
    pub deltas: Vec<Asset>,
    /// Whether this update moves to a lower (or equal, on channel switch)
    /// version than the one installed.
    pub is_downgrade: bool,
}

impl UpdateInfo {
    fn full_only(target_full: Asset, is_downgrade: bool) -> Self {
        Self { target_full, base_full: None, deltas: Vec::new(), is_downgrade }
    }
}

/// Decide whether an update is available.
///
/// Returns `None` when the feed holds nothing newer than
/// `installed_version` (and no downgrade applies). Assets excluded from
/// this install by their staged-rollout percentage are invisible to
/// selection.
///
/// The decision table:
/// 1. newest full > installed: a normal update; delta strategy applies.
/// 2. newest full < installed and downgrades allowed: full re-install of
///    the older version.
/// 3. newest full == installed, downgrades allowed, and an explicit
///    channel was requested: same-version re-fetch, enabling a channel
///    switch without a version bump.
/// 4. otherwise: up to date.
pub fn check_for_updates(
    feed: &Feed,
    installed_version: &Version,
    cached_full: Option<&Asset>,
    staging_id: Option<&Uuid>,
    options: &UpdateOptions,
) -> Option<UpdateInfo> {
    let visible: Vec<&Asset> = feed
        .assets
        .iter()
        .filter(|a| is_staging_match(a.staging_percentage, staging_id))
        .collect();

    let latest_full = visible
        .iter()
        .filter(|a| a.kind == AssetKind::Full)
        .max_by(|a, b| a.version.cmp(&b.version))
        .copied()?;

    if latest_full.version > *installed_version {
        let mut info = UpdateInfo::full_only(latest_full.clone(), false);
        if let Some(base) = cached_full {
            info.deltas = select_deltas(&visible, base, latest_full);
            if !info.deltas.is_empty() {
                info.base_full = Some(base.clone());
            }
        }
        debug!(
            target = %info.target_full.version,
            deltas = info.deltas.len(),
            "update available"
        );
        return Some(info);
    }

    if options.allow_downgrade
        && (latest_full.version < *installed_version
            || (latest_full.version == *installed_version && options.explicit_channel()))
    {
        debug!(target = %latest_full.version, "downgrade/channel-switch available");
        return Some(UpdateInfo::full_only(latest_full.clone(), true));
    }

    None
}

/// Pick the delta chain from `base` to `target`, or nothing if a full
/// download is cheaper.
///
/// Deltas are a performance optimization, never a requirement: any doubt
/// (no delta targeting `target`, chain too long, chain bigger than the full
/// package) resolves to an empty chain.
fn select_deltas(visible: &[&Asset], base: &Asset, target: &Asset) -> Vec<Asset> {
    let has_target_delta = visible
        .iter()
        .any(|a| a.kind == AssetKind::Delta && a.version == target.version);
    if !has_target_delta {
        return Vec::new();
    }

    let mut chain: Vec<Asset> = visible
        .iter()
        .filter(|a| {
            a.kind == AssetKind::Delta
                && a.version > base.version
                && a.version <= target.version
        })
        .map(|a| (*a).clone())
        .collect();
    chain.sort_by(|a, b| a.version.cmp(&b.version));

    let total: u64 = chain.iter().map(|a| a.size).sum();
    if chain.len() > MAX_DELTA_CHAIN || total > target.size {
        debug!(
            len = chain.len(),
            total, full = target.size,
            "delta chain rejected, full download is cheaper"
        );
        return Vec::new();
    }
    chain
}

/// Re-check the chain thresholds at download time.
///
/// The feed snapshot that produced an [`UpdateInfo`] may be minutes old by
/// the time the download runs; the pipeline re-validates before committing
/// to the delta path.
pub(crate) fn chain_within_limits(info: &UpdateInfo) -> bool {
    let total: u64 = info.deltas.iter().map(|a| a.size).sum();
    !info.deltas.is_empty()
        && info.deltas.len() <= MAX_DELTA_CHAIN
        && total <= info.target_full.size
}
