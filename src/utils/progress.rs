//! Composite progress reporting.
//!
//! Multi-phase operations (unpack, per-delta downloads, patching,
//! repackaging) each get a window of the overall percentage and report
//! their own 0–100 progress into it. The root [`ProgressSink`] enforces the
//! callback contract: values are monotonic, clamped to 100, and throttled
//! to even percentages so a UI callback is never flooded.
//!
//! Windows are linear remaps. [`ProgressSink::scope`] maps a phase's 0–100
//! into an output band; [`ProgressSink::remap`] additionally accepts a
//! non-zero input band, for phases that report within a sub-band of their
//! own scale.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Host-supplied progress callback, invoked with 0..=100.
pub type ProgressCallback = Box<dyn Fn(u8) + Send + Sync>;

struct Inner {
    callback: Option<ProgressCallback>,
    last: AtomicU8,
}

/// Root progress reporter for one operation.
///
/// Cheap to clone; all clones share the same monotonic state.
#[derive(Clone)]
pub struct ProgressSink {
    inner: Arc<Inner>,
}

impl ProgressSink {
    /// A sink driving the given callback.
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            inner: Arc::new(Inner { callback: Some(callback), last: AtomicU8::new(0) }),
        }
    }

    /// A sink that discards all reports.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(Inner { callback: None, last: AtomicU8::new(0) }),
        }
    }

    /// Report overall progress. Clamped to 100, rounded down to the nearest
    /// even value, and delivered only if it advances past everything
    /// reported so far.
    pub fn report(&self, percent: u8) {
        let Some(callback) = &self.inner.callback else {
            return;
        };
        let percent = percent.min(100) & !1;
        let previous = self.inner.last.fetch_max(percent, Ordering::AcqRel);
        if percent > previous {
            callback(percent);
        }
    }

    /// A scope mapping a phase's 0–100 onto the `lo..=hi` band of this sink.
    pub fn scope(&self, lo: u8, hi: u8) -> ProgressScope {
        self.remap((0, 100), (lo, hi))
    }

    /// A scope mapping the `from` input band onto the `to` output band.
    ///
    /// Inputs below `from.0` clamp to the start of the output band, inputs
    /// above `from.1` to its end.
    pub fn remap(&self, from: (u8, u8), to: (u8, u8)) -> ProgressScope {
        debug_assert!(from.0 < from.1 && to.0 <= to.1);
        ProgressScope { sink: self.clone(), from, to }
    }
}

/// One phase's window onto a [`ProgressSink`].
#[derive(Clone)]
pub struct ProgressScope {
    sink: ProgressSink,
    from: (u8, u8),
    to: (u8, u8),
}

impl ProgressScope {
    /// Report this phase's progress on its own `from` scale.
    pub fn report(&self, percent: u8) {
        let percent = u32::from(percent.clamp(self.from.0, self.from.1));
        let (from_lo, from_hi) = (u32::from(self.from.0), u32::from(self.from.1));
        let (to_lo, to_hi) = (u32::from(self.to.0), u32::from(self.to.1));
        let mapped = to_lo + (percent - from_lo) * (to_hi - to_lo) / (from_hi - from_lo);
        self.sink.report(mapped as u8);
    }

    /// Report a `done`-out-of-`total` fraction of this phase.
    pub fn report_fraction(&self, done: u64, total: u64) {
        if total == 0 {
            self.report(self.from.1);
        } else {
            let span = u64::from(self.from.1 - self.from.0);
            let pct = u64::from(self.from.0) + (done.min(total) * span) / total;
            self.report(pct as u8);
        }
    }

    /// Mark the phase complete.
    pub fn finish(&self) {
        self.report(self.from.1);
    }
}
