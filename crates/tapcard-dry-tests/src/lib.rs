// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for Tapcard crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`config`] - In-memory settings store fake for testing without filesystem
//! - [`fixtures`] - Common targets, settings and engine builders
//! - [`observer`] - Recording progress observer
//! - [`tag`] - Scripted, instrumented fake NFC hardware

pub mod config;
pub mod fixtures;
pub mod observer;
pub mod tag;

// Re-export commonly used items at crate root for convenience
pub use config::InMemorySettingsStore;
pub use fixtures::{build_engine, card_link_message, fast_settings, target, uri_message};
pub use observer::RecordingObserver;
pub use tag::{Call, Counters, FakeTag, FakeTagPort, Gate, TAG_LOST, UNSUPPORTED};

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
