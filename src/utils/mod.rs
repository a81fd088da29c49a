//! Shared utilities.
//!
//! - [`fs`] - small file system helpers (directory creation, atomic replace)
//! - [`progress`] - composite progress reporting for multi-phase operations

pub mod fs;
pub mod progress;

pub use fs::{ensure_dir, ensure_parent_dir, replace_file};
pub use progress::{ProgressCallback, ProgressScope, ProgressSink};
