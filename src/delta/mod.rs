//! Delta chain application.
//!
//! Reconstructs a full package tree by applying an ordered sequence of
//! delta archives to an unpacked base package, then repackages the tree
//! and verifies it against the feed's declared hash for the target.
//!
//! Inside a delta archive, each payload entry describes one file of the
//! target tree:
//! - a **zero-length patch entry** means the file is unchanged from the
//!   base;
//! - a **`.bsdiff`/`.zsdiff` entry** is a binary patch applied to the base
//!   file, whose output is verified against the accompanying `.shasum`
//!   sidecar before it replaces the original;
//! - an entry **without a patch suffix** is a brand-new file, copied
//!   verbatim;
//! - payload files of the old tree absent from the delta's file listing
//!   were deleted in the target version and are removed;
//! - non-payload files (the manifest) are unconditionally overwritten.
//!
//! Any single-file failure aborts the whole chain. The caller discards the
//! scratch tree and falls back to a full download; a corrupted chain must
//! never silently produce a broken install.

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::checksum;
use crate::core::{Result, UpdateError};
use crate::feed::Asset;
use crate::pack::{PAYLOAD_DIR, PackageManifest, ShasumRecord, pack_dir_blocking, unpack_blocking};
use crate::utils::fs::{ensure_parent_dir, replace_file};
use crate::utils::progress::ProgressScope;

/// Portable bsdiff patch entry.
const BSDIFF_EXT: &str = "bsdiff";
/// Portable bsdiff patch entry, zstd-framed.
const ZSDIFF_EXT: &str = "zsdiff";
/// Windows-specific patch entry; recognized but not applicable here.
const MSDELTA_EXT: &str = "diff";
/// Sidecar recording a patch output's expected hash and size.
const SHASUM_EXT: &str = "shasum";

/// The binary patch encodings a delta entry can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchFormat {
    Bsdiff,
    Zsdiff,
    MsDelta,
}

impl PatchFormat {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            BSDIFF_EXT => Some(Self::Bsdiff),
            ZSDIFF_EXT => Some(Self::Zsdiff),
            MSDELTA_EXT => Some(Self::MsDelta),
            _ => None,
        }
    }
}

/// One payload entry of an unpacked delta archive, consumed exactly once
/// during chain application.
#[derive(Debug)]
struct DeltaEntry {
    /// Payload-relative path of the target file, forward slashes.
    rel: String,
    /// Location of the entry inside the unpacked delta.
    path: PathBuf,
    /// Patch format, or `None` for a verbatim new file.
    format: Option<PatchFormat>,
}

fn rel_string(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| std::io::Error::other("entry escaped the payload root"))?;
    Ok(rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Collect and classify the payload entries of an unpacked delta.
fn payload_entries(delta_dir: &Path) -> Result<Vec<DeltaEntry>> {
    let payload_root = delta_dir.join(PAYLOAD_DIR);
    let mut entries = Vec::new();
    if !payload_root.is_dir() {
        return Ok(entries);
    }

    for entry in WalkDir::new(&payload_root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            UpdateError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed")))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = rel_string(&payload_root, entry.path())?;
        let ext = entry.path().extension().and_then(|e| e.to_str()).unwrap_or_default();
        if ext == SHASUM_EXT {
            // Consumed alongside its patch entry.
            continue;
        }
        let format = PatchFormat::from_extension(ext);
        let rel = match format {
            Some(_) => rel
                .strip_suffix(&format!(".{ext}"))
                .unwrap_or(rel.as_str())
                .to_string(),
            None => rel,
        };
        entries.push(DeltaEntry { rel, path: entry.path().to_path_buf(), format });
    }
    Ok(entries)
}

/// Apply one binary patch to `old_path`, verifying the output against the
/// patch's `.shasum` sidecar before it replaces the original.
fn apply_patch_file(
    entry: &DeltaEntry,
    format: PatchFormat,
    old_path: &Path,
) -> Result<()> {
    let patch_bytes = std::fs::read(&entry.path)?;

    let patch_stream = match format {
        PatchFormat::Bsdiff => patch_bytes,
        PatchFormat::Zsdiff => {
            zstd::decode_all(&patch_bytes[..]).map_err(|e| UpdateError::PatchFailed {
                file: entry.rel.clone(),
                reason: format!("zstd frame could not be decoded: {e}"),
            })?
        }
        PatchFormat::MsDelta => {
            return Err(UpdateError::PatchFailed {
                file: entry.rel.clone(),
                reason: "platform-specific .diff patches are not supported by this applicator"
                    .into(),
            });
        }
    };

    let old = std::fs::read(old_path).map_err(|e| UpdateError::PatchFailed {
        file: entry.rel.clone(),
        reason: format!("base file could not be read: {e}"),
    })?;

    let mut new = Vec::with_capacity(old.len());
    bsdiff::patch(&old, &mut patch_stream.as_slice(), &mut new).map_err(|e| {
        UpdateError::PatchFailed {
            file: entry.rel.clone(),
            reason: format!("patch stream rejected: {e}"),
        }
    })?;

    let parent = old_path.parent().ok_or_else(|| std::io::Error::other("file has no parent"))?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(&new)?;
    temp.flush()?;

    let sidecar_path = entry.path.with_extension(SHASUM_EXT);
    let sidecar = std::fs::read_to_string(&sidecar_path).map_err(|_| UpdateError::PatchFailed {
        file: entry.rel.clone(),
        reason: "missing .shasum sidecar for patch output".into(),
    })?;
    let record = ShasumRecord::parse(&sidecar).ok_or_else(|| UpdateError::PatchFailed {
        file: entry.rel.clone(),
        reason: "unparseable .shasum sidecar".into(),
    })?;
    // A corrupted chain must never silently produce a broken install.
    record.verify_blocking(temp.path(), &entry.rel)?;

    let temp_path = temp.into_temp_path();
    replace_file(&temp_path, old_path)?;
    std::mem::forget(temp_path);
    Ok(())
}

/// Apply one unpacked delta to the working tree.
fn apply_one_delta(
    work_dir: &Path,
    delta_archive: &Path,
    progress: &ProgressScope,
    window: (u8, u8),
) -> Result<()> {
    let report = |fraction: f32| {
        let (lo, hi) = window;
        progress.report(lo + ((f32::from(hi - lo)) * fraction) as u8);
    };

    let scratch = tempfile::tempdir_in(
        work_dir.parent().unwrap_or_else(|| Path::new(".")),
    )?;
    unpack_blocking(delta_archive, scratch.path())?;
    report(0.2);

    let delta_manifest = PackageManifest::read_from_dir(scratch.path())?;
    let target_files: HashSet<&str> =
        delta_manifest.files.iter().map(String::as_str).collect();

    let entries = payload_entries(scratch.path())?;
    let total = entries.len().max(1);
    let work_payload = work_dir.join(PAYLOAD_DIR);

    for (index, entry) in entries.iter().enumerate() {
        let dest = {
            let mut p = work_payload.clone();
            p.extend(entry.rel.split('/'));
            p
        };
        match entry.format {
            // The sidecar convention for "unchanged": a zero-length patch.
            Some(_) if entry.path.metadata()?.len() == 0 => {
                debug!(file = %entry.rel, "unchanged");
            }
            Some(format) => {
                apply_patch_file(entry, format, &dest)?;
                debug!(file = %entry.rel, "patched");
            }
            None => {
                ensure_parent_dir(&dest)?;
                std::fs::copy(&entry.path, &dest)?;
                debug!(file = %entry.rel, "added");
            }
        }
        report(0.2 + 0.7 * ((index + 1) as f32 / total as f32));
    }

    // Files of the old tree absent from this delta's listing were deleted
    // in the target version.
    if work_payload.is_dir() {
        let stale: Vec<PathBuf> = WalkDir::new(&work_payload)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                rel_string(&work_payload, p)
                    .map(|rel| !target_files.contains(rel.as_str()))
                    .unwrap_or(false)
            })
            .collect();
        for path in stale {
            debug!(path = %path.display(), "removing file deleted by this delta");
            std::fs::remove_file(&path)?;
        }
    }

    // Non-payload files (the manifest and any other metadata) come over
    // unconditionally.
    for entry in WalkDir::new(scratch.path()).max_depth(1) {
        let entry = entry.map_err(|e| {
            UpdateError::Io(e.into_io_error().unwrap_or_else(|| std::io::Error::other("walk failed")))
        })?;
        if entry.file_type().is_file() {
            let dest = work_dir.join(entry.file_name());
            ensure_parent_dir(&dest)?;
            std::fs::copy(entry.path(), &dest)?;
        }
    }

    report(1.0);
    Ok(())
}

/// Apply an ordered chain of delta archives to an unpacked base package.
///
/// `work_dir` holds the unpacked base on entry and the exact target tree
/// on success; the tree is then repackaged to `out_path` and verified
/// against `target`'s declared size and hash.
///
/// Progress is reported in the 50–100 band of `progress`, each delta
/// receiving an equal share; the first half of the overall operation was
/// downloading. Cancellation is honored between deltas; applying a single
/// file always runs to completion so no half-written file is left behind.
pub async fn apply_chain(
    work_dir: &Path,
    deltas: &[PathBuf],
    target: &Asset,
    out_path: &Path,
    progress: &ProgressScope,
    cancel: &CancellationToken,
) -> Result<()> {
    let count = deltas.len().max(1);
    for (index, delta) in deltas.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        info!(delta = %delta.display(), "applying delta {}/{}", index + 1, deltas.len());

        let window = (
            50 + (50 * index / count) as u8,
            50 + (50 * (index + 1) / count) as u8,
        );
        let work_dir = work_dir.to_path_buf();
        let delta = delta.clone();
        let progress = progress.clone();
        tokio::task::spawn_blocking(move || {
            apply_one_delta(&work_dir, &delta, &progress, window)
        })
        .await??;
    }

    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }

    let work_dir = work_dir.to_path_buf();
    let out = out_path.to_path_buf();
    let target_for_verify = target.clone();
    tokio::task::spawn_blocking(move || {
        pack_dir_blocking(&work_dir, &out)?;
        checksum::verify_blocking(&out, &target_for_verify)
    })
    .await??;

    progress.finish();
    info!(target = %target.file_name, "delta chain reconstructed target package");
    Ok(())
}
