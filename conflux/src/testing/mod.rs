//! Testing utilities for code built on conflux.
//!
//! This module provides:
//! - ScriptedProducer, a chunk producer driven by a timed script
//! - CountingFn, a call recorder for memoization tests
//! - init_test_tracing, which routes logs to the test harness

mod mocks;

pub use mocks::{CountingFn, ScriptedProducer};

/// Sends `tracing` output to the test harness's captured stdout.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
