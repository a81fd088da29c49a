//! On-disk package format.
//!
//! A package is a ZIP archive with a JSON manifest at the root and the
//! application payload tree underneath:
//!
//! ```text
//! AcmeApp-1.2.0-full.zip
//! ├── manifest.json          package id, version, notes, payload listing
//! └── payload/
//!     ├── acme.exe
//!     └── resources/strings.dat
//! ```
//!
//! Delta archives mirror the same layout but substitute changed payload
//! files with `.bsdiff`/`.zsdiff` patch entries and add `.shasum` sidecars
//! (`<hash> <size>` text records) describing each patch's *output*.
//!
//! Packing is deterministic (sorted entries, fixed timestamps, fixed
//! compression) so repacking a reconstructed payload tree reproduces
//! the originally published archive byte-for-byte. The final checksum
//! comparison after a delta chain depends on this.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::checksum::{FileDigests, file_digests_blocking};
use crate::core::{Result, UpdateError};
use crate::feed::AssetKind;
use crate::utils::fs::ensure_dir;

/// Manifest entry name inside every package archive.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Directory holding the application payload inside every package archive.
pub const PAYLOAD_DIR: &str = "payload";

/// Extension of in-progress downloads next to their final location.
pub const PARTIAL_EXTENSION: &str = "partial";

static FILE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<id>.+?)-(?P<version>\d+\.\d+\.\d+(?:-[0-9A-Za-z.-]+)?(?:\+[0-9A-Za-z.-]+)?)-(?P<kind>full|delta)\.zip$",
    )
    .expect("package file name pattern is valid")
});

/// The package manifest stored as `manifest.json` in every archive.
///
/// `files` lists the payload-relative path (forward slashes) of every file
/// in this version's tree; for a delta, the *target* tree. The delta chain
/// applicator uses the listing to track deletions across versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    /// Application package identifier.
    pub package_id: String,
    /// Package version (for deltas, the target version).
    pub version: Version,
    /// Release notes in Markdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_md: Option<String>,
    /// Release notes pre-rendered to HTML.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_html: Option<String>,
    /// Payload-relative paths of every file in this version's tree.
    pub files: Vec<String>,
}

impl PackageManifest {
    /// Read the manifest from an unpacked package directory.
    pub fn read_from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| UpdateError::InvalidPackage {
            file: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Write the manifest into an unpacked package directory.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        ensure_dir(dir)?;
        let text = serde_json::to_string_pretty(self).map_err(|e| UpdateError::InvalidPackage {
            file: MANIFEST_FILE.to_string(),
            reason: e.to_string(),
        })?;
        std::fs::write(dir.join(MANIFEST_FILE), text)?;
        Ok(())
    }

    /// Read the manifest straight out of a package archive.
    pub fn read_from_archive(archive: &Path) -> Result<Self> {
        let file_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| archive.display().to_string());
        let mut zip = ZipArchive::new(File::open(archive)?)?;
        let mut entry = zip.by_name(MANIFEST_FILE).map_err(|_| UpdateError::InvalidPackage {
            file: file_name.clone(),
            reason: format!("missing {MANIFEST_FILE}"),
        })?;
        let mut text = String::new();
        entry.read_to_string(&mut text)?;
        serde_json::from_str(&text)
            .map_err(|e| UpdateError::InvalidPackage { file: file_name, reason: e.to_string() })
    }
}

/// Canonical archive file name for a package, e.g. `AcmeApp-1.2.0-full.zip`.
pub fn package_file_name(package_id: &str, version: &Version, kind: AssetKind) -> String {
    format!("{package_id}-{version}-{kind}.zip")
}

/// Parse `{id}-{version}-{full|delta}.zip` back into its parts.
///
/// Returns `None` for file names that don't follow the convention.
pub fn parse_package_file_name(name: &str) -> Option<(String, Version, AssetKind)> {
    let caps = FILE_NAME_RE.captures(name)?;
    let version = Version::parse(&caps["version"]).ok()?;
    let kind = match &caps["kind"] {
        "full" => AssetKind::Full,
        _ => AssetKind::Delta,
    };
    Some((caps["id"].to_string(), version, kind))
}

fn zip_options() -> SimpleFileOptions {
    // Fixed method and timestamp keep archives reproducible.
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// Pack a directory tree into a deterministic ZIP archive.
///
/// Blocking; run inside a blocking section when called from async code.
pub fn pack_dir_blocking(dir: &Path, out: &Path) -> Result<()> {
    let mut entries: Vec<(String, std::path::PathBuf)> = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| {
            UpdateError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed")))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|_| std::io::Error::other("walked outside the package root"))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((name, entry.path().to_path_buf()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut writer = ZipWriter::new(File::create(out)?);
    let options = zip_options();
    let mut buf = [0u8; 64 * 1024];
    for (name, path) in entries {
        writer.start_file(name, options)?;
        let mut src = File::open(&path)?;
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write_all(&buf[..n])?;
        }
    }
    writer.finish()?;
    Ok(())
}

/// Unpack a package archive into a directory.
///
/// Blocking; run inside a blocking section when called from async code.
pub fn unpack_blocking(archive: &Path, dir: &Path) -> Result<()> {
    ensure_dir(dir)?;
    let mut zip = ZipArchive::new(File::open(archive)?)?;
    zip.extract(dir)?;
    Ok(())
}

/// A `.shasum` sidecar record: the expected hash and size of a patch's
/// output, written next to the patch entry by the package builder.
///
/// The hash algorithm is inferred from the digest length: 40 hex characters
/// for SHA1 (compared case-insensitively), 64 for SHA256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShasumRecord {
    /// Hex digest of the expected file contents.
    pub hash: String,
    /// Expected file size in bytes.
    pub size: u64,
}

impl ShasumRecord {
    /// Parse a `<hash> <size>` text record.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let hash = parts.next()?.to_string();
        let size = parts.next()?.parse().ok()?;
        if parts.next().is_some() || !matches!(hash.len(), 40 | 64) {
            return None;
        }
        Some(Self { hash, size })
    }

    /// Format as the on-disk `<hash> <size>` text record.
    pub fn format(&self) -> String {
        format!("{} {}\n", self.hash, self.size)
    }

    /// Build a record (SHA256) describing a file's current contents.
    pub fn describe_blocking(path: &Path) -> Result<Self> {
        let digests = file_digests_blocking(path)?;
        Ok(Self { hash: digests.sha256, size: digests.size })
    }

    /// Whether the record matches the given measured digests.
    pub fn matches(&self, digests: &FileDigests) -> bool {
        if digests.size != self.size {
            return false;
        }
        match self.hash.len() {
            40 => digests.sha1.eq_ignore_ascii_case(&self.hash),
            _ => digests.sha256 == self.hash,
        }
    }

    /// Verify a file against this record.
    pub fn verify_blocking(&self, path: &Path, label: &str) -> Result<()> {
        let digests = file_digests_blocking(path)?;
        if self.matches(&digests) {
            Ok(())
        } else {
            Err(UpdateError::ChecksumFailed {
                file: label.to_string(),
                expected: format!("{} ({} bytes)", self.hash, self.size),
                actual: format!("{} ({} bytes)", digests.sha256, digests.size),
            })
        }
    }
}
