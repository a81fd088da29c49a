//! Staged rollout bucketing.
//!
//! Releases can be exposed to only a fraction of the install base before
//! going fully live. Each installation carries a stable random identifier;
//! a release's `staging_percentage` and that identifier deterministically
//! decide whether the install sees the release.
//!
//! The mapping is a stable space partition, not a hash: bytes 12..16 of the
//! identifier are read as a little-endian `u32` every time, so the same
//! install always lands in the same stratum, and raising the percentage only
//! ever grows the matching population.

use uuid::Uuid;

/// Decide whether an install participates in a staged rollout.
///
/// - `None` percentage: unrestricted release, always matches.
/// - Some percentage but no stable id available: excluded conservatively -
///   without an id the install cannot be assigned a stable stratum.
/// - Otherwise: the id's bytes 12..16 as `u32`, scaled to `[0, 1]`, must
///   fall below the percentage.
pub fn is_staging_match(staging_percentage: Option<f32>, staging_id: Option<&Uuid>) -> bool {
    let Some(percentage) = staging_percentage else {
        return true;
    };
    let Some(id) = staging_id else {
        return false;
    };

    let b = id.as_bytes();
    let stratum = u32::from_le_bytes([b[12], b[13], b[14], b[15]]);
    (f64::from(stratum) / f64::from(u32::MAX)) < f64::from(percentage)
}
