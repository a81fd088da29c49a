//! Core types shared across the crate.
//!
//! Currently this is the error taxonomy: the typed [`UpdateError`] enum and
//! the crate-wide [`Result`] alias. Every public operation in the crate
//! returns this `Result` so hosts can match on the failure mode.

pub mod error;

pub use error::{Result, UpdateError};
