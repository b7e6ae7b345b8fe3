// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tapcard NFC tag provisioning engine.
#![forbid(unsafe_code)]
//!
//! Writes a card link (an owner id plus a slot index rendered as a URL) onto
//! a physical NFC tag whose format state is unknown, and reads it back. Blank,
//! pre-formatted and half-formatted tags all go through the same fallback
//! chain; hardware access sits behind the [`TagPort`] trait so platform
//! bridges and test fakes plug in the same way.
//!
//! # Modules
//!
//! - [`codec`] - Card-link URL encode/decode
//! - [`ndef`] - Single-record NDEF URI messages
//! - [`port`] - Hardware port trait and driver types
//! - [`fault`] - Driver error classification
//! - [`session`] - Scoped technology acquisition
//! - [`chain`] - Format detection and fallback chain
//! - [`progress`] - Progress events and observer isolation
//! - [`orchestrator`] - Retry and timing around the chain
//! - [`read`] - Read path
//! - [`engine`] - Inbound API
//! - [`config`] - Engine settings and their storage port

pub mod chain;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod fault;
pub mod ndef;
pub mod orchestrator;
pub mod port;
pub mod progress;
pub mod read;
pub mod session;

pub use chain::{Strategy, TagCapability};
pub use codec::{EncodedUrl, ProvisioningTarget, UrlCodec, DEFAULT_URL_BASE};
pub use config::{EngineSettings, SettingsService, SettingsStore};
pub use engine::{NfcStatus, TagEngine};
pub use error::{ErrorKind, OpError};
pub use orchestrator::AttemptResult;
pub use port::{DriverError, TagHandle, TagInfo, TagPort, TechnologyKind};
pub use progress::{ProgressEvent, ProgressObserver};
