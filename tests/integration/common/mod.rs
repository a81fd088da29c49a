//! Shared fixtures: a release directory builder and an instrumented
//! source.
//!
//! Packages built here go through the crate's own packer, so the digests
//! recorded in the generated feed are exactly what a reconstruction must
//! reproduce.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use semver::Version;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use updraft::checksum::file_digests_blocking;
use updraft::pack::{PAYLOAD_DIR, PackageManifest, ShasumRecord, pack_dir_blocking, package_file_name};
use updraft::{Asset, AssetKind, Feed, FileSource, ProgressScope, Result, UpdateSource};

/// File set of one package version: payload-relative path -> contents.
pub type FileSet<'a> = &'a [(&'a str, &'a [u8])];

/// Install a test subscriber once, so `RUST_LOG=updraft=debug` surfaces
/// engine logs from failing tests.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn write_tree(dir: &Path, id: &str, version: &Version, files: FileSet<'_>) {
    let payload = dir.join(PAYLOAD_DIR);
    for (rel, bytes) in files {
        let path = payload.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, bytes).unwrap();
    }
    PackageManifest {
        package_id: id.into(),
        version: version.clone(),
        notes_md: None,
        notes_html: None,
        files: files.iter().map(|(rel, _)| rel.to_string()).collect(),
    }
    .write_to_dir(dir)
    .unwrap();
}

fn asset_for(archive: &Path, id: &str, version: &Version, kind: AssetKind) -> Asset {
    let digests = file_digests_blocking(archive).unwrap();
    Asset {
        package_id: id.into(),
        version: version.clone(),
        kind,
        file_name: archive.file_name().unwrap().to_string_lossy().into_owned(),
        sha1: digests.sha1,
        sha256: Some(digests.sha256),
        size: digests.size,
        notes_md: None,
        notes_html: None,
        staging_percentage: None,
    }
}

/// Build a full package archive in `release_dir` and describe it.
pub fn build_full_package(
    release_dir: &Path,
    id: &str,
    version: &str,
    files: FileSet<'_>,
) -> Asset {
    let version = Version::parse(version).unwrap();
    let tree = TempDir::new().unwrap();
    write_tree(tree.path(), id, &version, files);

    let archive = release_dir.join(package_file_name(id, &version, AssetKind::Full));
    pack_dir_blocking(tree.path(), &archive).unwrap();
    asset_for(&archive, id, &version, AssetKind::Full)
}

/// Build a delta archive in `release_dir` transforming `old` into `new`.
///
/// Files present in both sets become zsdiff patches (zero-length when the
/// contents are identical); files only in `new` are carried verbatim;
/// files only in `old` are simply absent from the delta's listing.
pub fn build_delta_package(
    release_dir: &Path,
    id: &str,
    version: &str,
    old: FileSet<'_>,
    new: FileSet<'_>,
) -> Asset {
    let version = Version::parse(version).unwrap();
    let tree = TempDir::new().unwrap();
    let payload = tree.path().join(PAYLOAD_DIR);

    for (rel, new_bytes) in new {
        let path = payload.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        match old.iter().find(|(old_rel, _)| old_rel == rel) {
            Some((_, old_bytes)) if old_bytes == new_bytes => {
                std::fs::write(path.with_file_name(format!(
                    "{}.zsdiff",
                    path.file_name().unwrap().to_string_lossy()
                )), b"")
                .unwrap();
            }
            Some((_, old_bytes)) => {
                let mut raw = Vec::new();
                bsdiff::diff(old_bytes, new_bytes, &mut raw).unwrap();
                let framed = zstd::encode_all(&raw[..], 0).unwrap();
                std::fs::write(
                    path.with_file_name(format!(
                        "{}.zsdiff",
                        path.file_name().unwrap().to_string_lossy()
                    )),
                    framed,
                )
                .unwrap();

                let probe = tree.path().join(".probe");
                std::fs::write(&probe, new_bytes).unwrap();
                let digests = file_digests_blocking(&probe).unwrap();
                std::fs::remove_file(&probe).unwrap();
                std::fs::write(
                    path.with_file_name(format!(
                        "{}.shasum",
                        path.file_name().unwrap().to_string_lossy()
                    )),
                    ShasumRecord { hash: digests.sha256, size: digests.size }.format(),
                )
                .unwrap();
            }
            None => {
                std::fs::write(&path, new_bytes).unwrap();
            }
        }
    }

    PackageManifest {
        package_id: id.into(),
        version: version.clone(),
        notes_md: None,
        notes_html: None,
        files: new.iter().map(|(rel, _)| rel.to_string()).collect(),
    }
    .write_to_dir(tree.path())
    .unwrap();

    let archive = release_dir.join(package_file_name(id, &version, AssetKind::Delta));
    pack_dir_blocking(tree.path(), &archive).unwrap();
    asset_for(&archive, id, &version, AssetKind::Delta)
}

/// Write the channel feed document for the given assets.
pub fn write_feed(release_dir: &Path, channel: &str, assets: &[Asset]) {
    let feed = Feed { assets: assets.to_vec() };
    std::fs::write(
        release_dir.join(Feed::file_name(channel)),
        serde_json::to_vec_pretty(&feed).unwrap(),
    )
    .unwrap();
}

/// A [`FileSource`] that counts entry downloads, for asserting that
/// idempotent re-runs stay off the wire.
pub struct CountingSource {
    inner: FileSource,
    downloads: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { inner: FileSource::new(root), downloads: Arc::new(AtomicUsize::new(0)) }
    }

    pub fn downloads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.downloads)
    }
}

#[async_trait]
impl UpdateSource for CountingSource {
    async fn release_feed(
        &self,
        app_id: &str,
        channel: &str,
        staging_id: Option<&Uuid>,
        latest_local: Option<&Asset>,
    ) -> Result<Feed> {
        self.inner.release_feed(app_id, channel, staging_id, latest_local).await
    }

    async fn download_release_entry(
        &self,
        asset: &Asset,
        dest: &Path,
        progress: &ProgressScope,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.inner.download_release_entry(asset, dest, progress, cancel).await
    }
}
