//! The download pipeline.
//!
//! One locked, cancellable operation that gets the target full package
//! onto disk, by whichever route is cheapest:
//!
//! 1. Acquire the [`UpdateLock`] for the installation.
//! 2. If the target archive already exists and verifies, succeed
//!    immediately; re-running a completed download is free.
//! 3. If a delta chain was selected (and still passes the cost
//!    thresholds): unpack the cached base, download and verify each delta,
//!    apply the chain, repackage. Any failure on this branch is logged and
//!    silently falls through to a full download; deltas are a performance
//!    optimization, never a hard requirement.
//! 4. Otherwise download the full package to a `.partial` sibling, verify,
//!    and atomically rename into place.
//! 5. Regardless of outcome, clean abandoned package files out of the
//!    packages directory so failed attempts cannot accumulate.
//!
//! Progress composition on the delta route: base unpack 0–10, delta
//! downloads 10–80 (equal share per delta), chain application and
//! repackaging 80–100. The full route reports 0–100 straight from the
//! transport.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum;
use crate::core::{Result, UpdateError};
use crate::delta;
use crate::feed::Asset;
use crate::lock::UpdateLock;
use crate::locator::PackageLocator;
use crate::pack::{PARTIAL_EXTENSION, parse_package_file_name, unpack_blocking};
use crate::resolver::{UpdateInfo, chain_within_limits};
use crate::source::UpdateSource;
use crate::utils::fs::replace_file;
use crate::utils::progress::{ProgressScope, ProgressSink};

/// `.partial` files older than this are abandoned attempts and get swept.
const STALE_PARTIAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    dest.with_file_name(format!("{name}.{PARTIAL_EXTENSION}"))
}

/// Download and verify the whole update described by `info`.
pub(crate) async fn run(
    source: &dyn UpdateSource,
    locator: &dyn PackageLocator,
    info: &UpdateInfo,
    progress: ProgressSink,
    ignore_deltas: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let lock = UpdateLock::acquire(locator.packages_dir()).await?;

    let result = run_locked(source, locator, info, &progress, ignore_deltas, cancel).await;

    // Sweep abandoned files whatever happened above; growth of failed
    // attempts must be bounded.
    let dir = locator.packages_dir().to_path_buf();
    let keep = info.target_full.file_name.clone();
    if let Err(err) =
        tokio::task::spawn_blocking(move || cleanup_packages_dir(&dir, &keep)).await?
    {
        warn!(error = %err, "packages directory cleanup failed");
    }

    drop(lock);
    result
}

async fn run_locked(
    source: &dyn UpdateSource,
    locator: &dyn PackageLocator,
    info: &UpdateInfo,
    progress: &ProgressSink,
    ignore_deltas: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let target_path = locator.package_path(&info.target_full);

    if target_path.exists() && checksum::verify(&target_path, &info.target_full).await.is_ok() {
        info!(file = %info.target_full.file_name, "target package already present and verified");
        progress.report(100);
        return Ok(());
    }

    if let Some(base) = &info.base_full
        && !ignore_deltas
        && chain_within_limits(info)
    {
        match delta_route(source, locator, info, base, progress, cancel).await {
            Ok(()) => return Ok(()),
            // Cancellation aborts the operation; it is not a reason to
            // download more.
            Err(UpdateError::Cancelled) => return Err(UpdateError::Cancelled),
            Err(err) => {
                warn!(error = %err, "delta route failed, falling back to full download");
            }
        }
    }

    fetch_entry(source, &info.target_full, &target_path, &progress.scope(0, 100), cancel).await?;
    info!(file = %info.target_full.file_name, "full package downloaded and verified");
    Ok(())
}

/// Reconstruct the target package from the cached base plus the delta
/// chain.
async fn delta_route(
    source: &dyn UpdateSource,
    locator: &dyn PackageLocator,
    info: &UpdateInfo,
    base: &Asset,
    progress: &ProgressSink,
    cancel: &CancellationToken,
) -> Result<()> {
    let base_path = locator.package_path(base);
    // The base may have rotted since the check; a delta chain on a bad
    // base can only produce garbage.
    checksum::verify(&base_path, base).await?;

    let scratch = tempfile::tempdir_in(locator.packages_dir())?;
    let work_dir = scratch.path().join("base");

    {
        let base_path = base_path.clone();
        let work_dir = work_dir.clone();
        tokio::task::spawn_blocking(move || unpack_blocking(&base_path, &work_dir)).await??;
    }
    progress.scope(0, 10).finish();
    debug!(base = %base.file_name, "base package unpacked");

    let count = info.deltas.len();
    let mut delta_paths = Vec::with_capacity(count);
    for (index, asset) in info.deltas.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        let window = (
            10 + (70 * index / count) as u8,
            10 + (70 * (index + 1) / count) as u8,
        );
        let dest = locator.package_path(asset);
        fetch_entry(source, asset, &dest, &progress.scope(window.0, window.1), cancel).await?;
        delta_paths.push(dest);
    }

    // The applicator reports in the 50–100 band; it lands on our 80–100
    // repackaging window.
    let chain_progress = progress.remap((50, 100), (80, 100));
    let target_path = locator.package_path(&info.target_full);
    let staging = partial_path(&target_path);
    delta::apply_chain(&work_dir, &delta_paths, &info.target_full, &staging, &chain_progress, cancel)
        .await?;
    replace_file(&staging, &target_path)?;
    progress.report(100);
    info!(file = %info.target_full.file_name, deltas = count, "target package reconstructed from deltas");
    Ok(())
}

/// Fetch one release entry into `dest`, via a `.partial` sibling, with
/// checksum verification. Already-present verified files are not fetched
/// again.
async fn fetch_entry(
    source: &dyn UpdateSource,
    asset: &Asset,
    dest: &Path,
    progress: &ProgressScope,
    cancel: &CancellationToken,
) -> Result<()> {
    if dest.exists() && checksum::verify(dest, asset).await.is_ok() {
        debug!(file = %asset.file_name, "already downloaded and verified");
        progress.finish();
        return Ok(());
    }

    let partial = partial_path(dest);
    source.download_release_entry(asset, &partial, progress, cancel).await?;

    match checksum::verify(&partial, asset).await {
        Ok(()) => {
            replace_file(&partial, dest)?;
            progress.finish();
            Ok(())
        }
        Err(err) => {
            let _ = std::fs::remove_file(&partial);
            Err(err)
        }
    }
}

/// Remove abandoned package files, keeping the freshly downloaded target.
///
/// Only files following the package file-name convention are candidates;
/// the lock file, the staging id, and anything else a host keeps in the
/// directory survive. `.partial` files are swept once they go stale.
fn cleanup_packages_dir(dir: &Path, keep: &str) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let now = SystemTime::now();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == keep {
            continue;
        }

        let remove = if let Some(stem) = name.strip_suffix(&format!(".{PARTIAL_EXTENSION}")) {
            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > STALE_PARTIAL_TTL);
            stale && parse_package_file_name(stem).is_some()
        } else {
            parse_package_file_name(&name).is_some()
        };

        if remove {
            debug!(file = %name, "removing abandoned package file");
            if let Err(err) = std::fs::remove_file(entry.path()) {
                warn!(file = %name, error = %err, "could not remove abandoned file");
            }
        }
    }
    Ok(())
}
