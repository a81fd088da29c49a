//! Integration test suite for updraft
//!
//! End-to-end tests driving the [`UpdateManager`](updraft::UpdateManager)
//! against real release directories built with the crate's own packer.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **check**: update detection through the manager (feed fetch, local
//!   base discovery, downgrade and channel rules)
//! - **pipeline**: full-download route, idempotent re-runs, cleanup,
//!   locking, cancellation
//! - **delta_chain**: delta reconstruction end-to-end and the
//!   chain-failure fallback to a full download

mod common;

mod delta_chain;
