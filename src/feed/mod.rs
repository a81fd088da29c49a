//! Release feed and asset model.
//!
//! A [`Feed`] is the set of [`Asset`] records published for one
//! (application, channel) pair. Feeds are fetched fresh on every update
//! check and never persisted as a whole; only the assets that are actually
//! downloaded end up in the local packages directory.
//!
//! The on-the-wire feed document is a JSON array of asset records, served
//! under the channel-specific name `releases.<channel>.json`. Parsing
//! performs no semantic validation; version ordering, uniqueness, and
//! delta-chain selection are the resolver's job.

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::core::{Result, UpdateError};

/// Whether an asset is a complete package or a patch package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// A complete, self-contained installable archive for one version.
    Full,
    /// An archive of per-file binary patches transforming the immediately
    /// preceding full/delta version into this asset's version.
    Delta,
}

impl AssetKind {
    /// The suffix used in package file names (`full` / `delta`).
    pub fn suffix(self) -> &'static str {
        match self {
            AssetKind::Full => "full",
            AssetKind::Delta => "delta",
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.suffix())
    }
}

/// One package occurrence in a release feed.
///
/// Immutable record describing a release package. A delta asset's `version`
/// is its *target* version; the base is always the immediately preceding
/// full/delta version.
///
/// `(package_id, version, kind)` is unique within one channel's feed at a
/// point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Application package identifier, e.g. `"AcmeApp"`.
    pub package_id: String,
    /// Semantic version of this package (for deltas, the target version).
    pub version: Version,
    /// Full or delta.
    pub kind: AssetKind,
    /// Archive file name, e.g. `AcmeApp-1.2.0-full.zip`.
    pub file_name: String,
    /// SHA1 digest of the archive, 40 hex characters. Historical feeds emit
    /// mixed-case hex, so comparison is case-insensitive.
    pub sha1: String,
    /// SHA256 digest of the archive. Preferred over `sha1` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Archive size in bytes.
    pub size: u64,
    /// Release notes in Markdown, if published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_md: Option<String>,
    /// Release notes pre-rendered to HTML, if published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_html: Option<String>,
    /// Staged-rollout fraction in `[0, 1]`. `None` means unrestricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_percentage: Option<f32>,
}

impl Asset {
    /// The SHA256 digest, if present and non-empty.
    ///
    /// Some feed generators emit an empty string instead of omitting the
    /// field; both mean "no SHA256 available".
    pub fn sha256(&self) -> Option<&str> {
        self.sha256.as_deref().filter(|s| !s.is_empty())
    }
}

/// The set of assets published for one (application, channel) pair.
///
/// Ordering is irrelevant; selection is always by semver comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Feed {
    /// All assets currently published on the channel.
    pub assets: Vec<Asset>,
}

impl Feed {
    /// The feed document file name for a channel, e.g. `releases.stable.json`.
    pub fn file_name(channel: &str) -> String {
        format!("releases.{channel}.json")
    }

    /// Iterate over assets of the given kind.
    pub fn of_kind(&self, kind: AssetKind) -> impl Iterator<Item = &Asset> {
        self.assets.iter().filter(move |a| a.kind == kind)
    }

    /// The newest full asset by semantic-versioning precedence, if any.
    pub fn latest_full(&self) -> Option<&Asset> {
        self.of_kind(AssetKind::Full).max_by(|a, b| a.version.cmp(&b.version))
    }
}

/// Parse a feed document (a JSON array of asset records).
///
/// Fails with [`UpdateError::MalformedFeed`] if the payload is not a valid
/// serialized asset collection. No other validation is performed here.
pub fn parse_feed(bytes: &[u8]) -> Result<Feed> {
    serde_json::from_slice(bytes).map_err(|e| UpdateError::MalformedFeed { reason: e.to_string() })
}
