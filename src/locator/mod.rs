//! Locating the installed application and its packages directory.
//!
//! A [`PackageLocator`] tells the engine where one installation keeps its
//! downloaded packages, which version is currently installed, and which
//! full package is already cached locally (the potential delta base).
//! It is passed explicitly to [`UpdateManager`](crate::manager::UpdateManager);
//! there is no process-wide "current locator".
//!
//! [`DirectoryLocator`] is the standard implementation over a packages
//! directory on disk. It also owns the persistent staging identity: a
//! random per-install UUID stored in a `.staging-id` file, minted on first
//! use so staged-rollout bucketing stays stable across runs.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use semver::Version;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::checksum::file_digests_blocking;
use crate::core::{Result, UpdateError};
use crate::feed::{Asset, AssetKind};
use crate::pack::{PackageManifest, parse_package_file_name};
use crate::utils::fs::ensure_dir;

/// Marker file holding the per-install staging identity.
pub const STAGING_ID_FILE: &str = ".staging-id";

/// A package archive on disk, described by the asset derived from it.
#[derive(Debug, Clone)]
pub struct LocalPackage {
    /// Location of the archive.
    pub path: PathBuf,
    /// Asset record derived from the archive's manifest and measured
    /// digests.
    pub asset: Asset,
    /// Set once the file has passed a checksum check against a feed asset.
    pub verified: bool,
}

impl LocalPackage {
    /// Describe a package archive on disk.
    ///
    /// Reads the embedded manifest for identity and release notes, and
    /// measures size and digests from the file itself. Blocking.
    pub fn load(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| UpdateError::InvalidPackage {
                file: path.display().to_string(),
                reason: "not a file path".into(),
            })?;
        let kind = parse_package_file_name(&file_name)
            .map(|(_, _, kind)| kind)
            .unwrap_or(AssetKind::Full);

        let manifest = PackageManifest::read_from_archive(path)?;
        let digests = file_digests_blocking(path)?;
        let asset = Asset {
            package_id: manifest.package_id,
            version: manifest.version,
            kind,
            file_name,
            sha1: digests.sha1,
            sha256: Some(digests.sha256),
            size: digests.size,
            notes_md: manifest.notes_md,
            notes_html: manifest.notes_html,
            staging_percentage: None,
        };
        Ok(Self { path: path.to_path_buf(), asset, verified: false })
    }
}

/// Where one installation keeps its update state.
pub trait PackageLocator: Send + Sync {
    /// The application package identifier.
    fn app_id(&self) -> &str;

    /// Directory holding downloaded packages, the update lock, and the
    /// staging identity.
    fn packages_dir(&self) -> &Path;

    /// The currently installed version, if the installation can be
    /// detected.
    fn installed_version(&self) -> Option<&Version>;

    /// The stable per-install identifier used for staged-rollout
    /// bucketing, if one is available.
    fn staging_id(&self) -> Option<Uuid> {
        None
    }

    /// Absolute path an asset's archive occupies in the packages
    /// directory.
    fn package_path(&self, asset: &Asset) -> PathBuf {
        self.packages_dir().join(&asset.file_name)
    }

    /// The newest locally cached full package for this app, if any.
    ///
    /// Scans the packages directory for archives following the package
    /// file-name convention and loads the one with the highest version.
    /// Blocking.
    fn latest_full_package(&self) -> Result<Option<LocalPackage>> {
        let dir = self.packages_dir();
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut newest: Option<(Version, PathBuf)> = None;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some((id, version, kind)) = parse_package_file_name(&name.to_string_lossy())
            else {
                continue;
            };
            if kind != AssetKind::Full || id != self.app_id() {
                continue;
            }
            if newest.as_ref().is_none_or(|(best, _)| version > *best) {
                newest = Some((version, entry.path()));
            }
        }

        match newest {
            Some((_, path)) => match LocalPackage::load(&path) {
                Ok(package) => Ok(Some(package)),
                Err(err) => {
                    // A broken cached archive is not fatal; it just cannot
                    // serve as a delta base.
                    warn!(path = %path.display(), error = %err, "ignoring unreadable local package");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

/// Standard locator over a packages directory on disk.
pub struct DirectoryLocator {
    app_id: String,
    packages_dir: PathBuf,
    installed_version: Option<Version>,
    staging_id: OnceLock<Option<Uuid>>,
}

impl DirectoryLocator {
    /// A locator for an explicit packages directory.
    pub fn new(
        app_id: impl Into<String>,
        packages_dir: impl Into<PathBuf>,
        installed_version: Option<Version>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            packages_dir: packages_dir.into(),
            installed_version,
            staging_id: OnceLock::new(),
        }
    }

    /// A locator using the platform-local data directory
    /// (`<data_local_dir>/<app_id>/packages`).
    pub fn for_app(app_id: impl Into<String>, installed_version: Option<Version>) -> Result<Self> {
        let app_id = app_id.into();
        let base = dirs::data_local_dir().ok_or_else(|| {
            UpdateError::Io(std::io::Error::other("no local data directory on this platform"))
        })?;
        let packages_dir = base.join(&app_id).join("packages");
        Ok(Self::new(app_id, packages_dir, installed_version))
    }

    fn load_or_mint_staging_id(&self) -> Option<Uuid> {
        let path = self.packages_dir.join(STAGING_ID_FILE);
        if let Ok(text) = std::fs::read_to_string(&path)
            && let Ok(id) = Uuid::parse_str(text.trim())
        {
            return Some(id);
        }

        let id = Uuid::new_v4();
        if ensure_dir(&self.packages_dir).is_err()
            || std::fs::write(&path, id.to_string()).is_err()
        {
            // Without persistence the id would change every run, which
            // would defeat stable bucketing; report none instead.
            warn!(path = %path.display(), "could not persist staging id");
            return None;
        }
        debug!(%id, "minted staging id");
        Some(id)
    }
}

impl PackageLocator for DirectoryLocator {
    fn app_id(&self) -> &str {
        &self.app_id
    }

    fn packages_dir(&self) -> &Path {
        &self.packages_dir
    }

    fn installed_version(&self) -> Option<&Version> {
        self.installed_version.as_ref()
    }

    fn staging_id(&self) -> Option<Uuid> {
        *self.staging_id.get_or_init(|| self.load_or_mint_staging_id())
    }
}
