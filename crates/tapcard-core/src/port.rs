// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Hardware port for NFC tag access.
//!
//! # Design
//!
//! This trait is a hexagonal port. The engine drives tags through it; platform
//! bridges (Android `NfcAdapter`, iOS Core NFC) and the test fakes in
//! `tapcard-dry-tests` implement it.
//!
//! Every call blocks until the driver returns, errors or times out. The engine
//! adds no timeout layer of its own.
//!
//! # Handle Semantics
//!
//! [`TagPort::request_technology`] hands out a [`TagHandle`]; the handle is not
//! `Clone` and is given back exactly once through [`TagPort::release`]. The
//! session controller owns that bookkeeping, so adapters may assume at most
//! one live handle.

use std::fmt;

use thiserror::Error;

use crate::ndef::NdefMessage;

/// Hardware access mode requested from the NFC controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TechnologyKind {
    /// Generic NDEF access on a tag that already reports as formatted.
    Ndef,
    /// ISO 14443-3A base carrier.
    NfcA,
    /// ISO 14443-3B base carrier.
    NfcB,
    /// JIS 6319-4 (FeliCa) base carrier.
    NfcF,
    /// Formattable-NDEF access on a blank tag.
    NdefFormatable,
}

impl TechnologyKind {
    /// Base carriers in wake-up priority order.
    pub const BASE_CARRIERS: [Self; 3] = [Self::NfcA, Self::NfcB, Self::NfcF];

    /// `true` for A/B/F.
    pub fn is_base_carrier(self) -> bool {
        Self::BASE_CARRIERS.contains(&self)
    }

    /// Driver-facing name, as used by the platform NFC stacks.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ndef => "Ndef",
            Self::NfcA => "NfcA",
            Self::NfcB => "NfcB",
            Self::NfcF => "NfcF",
            Self::NdefFormatable => "NdefFormatable",
        }
    }
}

impl fmt::Display for TechnologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token for one acquired technology.
///
/// Scoped to a single acquire/release cycle. Not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct TagHandle {
    id: u64,
    technologies: Vec<TechnologyKind>,
}

impl TagHandle {
    /// Adapter-side constructor.
    pub fn new(id: u64, technologies: Vec<TechnologyKind>) -> Self {
        Self { id, technologies }
    }

    /// Adapter-assigned identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Technologies this handle was granted for.
    pub fn technologies(&self) -> &[TechnologyKind] {
        &self.technologies
    }
}

/// NDEF-level facts reported for a formatted tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdefInfo {
    /// Maximum NDEF message size in bytes.
    pub max_size: usize,
    /// `false` when the tag is locked read-only.
    pub is_writable: bool,
}

/// Driver report for the tag behind a handle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagInfo {
    /// Tag UID.
    pub id: Vec<u8>,
    /// Technologies the tag advertises.
    pub technologies: Vec<TechnologyKind>,
    /// Present when the handle grants NDEF access to a formatted tag.
    pub ndef: Option<NdefInfo>,
}

impl TagInfo {
    /// UID rendered as uppercase hex, for logs.
    pub fn id_hex(&self) -> String {
        use fmt::Write as _;
        self.id.iter().fold(String::with_capacity(self.id.len() * 2), |mut s, b| {
            let _ = write!(s, "{b:02X}");
            s
        })
    }
}

/// Raw driver failure. The text is only interpreted by [`crate::fault::classify`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DriverError {
    message: String,
}

impl DriverError {
    /// Wrap a driver message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Driver text, verbatim.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Synchronous NFC hardware port.
pub trait TagPort: Send + Sync {
    /// Device has an NFC controller.
    fn is_supported(&self) -> bool;

    /// NFC is switched on in system settings.
    fn is_enabled(&self) -> bool;

    /// Bring the NFC stack up (permissions, reader session).
    fn start(&self) -> Result<(), DriverError>;

    /// Acquire a technology. With more than one entry the driver receives the
    /// whole ordered list in a single call.
    fn request_technology(&self, technologies: &[TechnologyKind])
        -> Result<TagHandle, DriverError>;

    /// Give back a handle. Called exactly once per successful request.
    fn release(&self, handle: TagHandle) -> Result<(), DriverError>;

    /// Abort whatever request the driver is currently serving.
    fn cancel_request(&self) -> Result<(), DriverError>;

    /// Describe the tag behind `handle`.
    fn tag_info(&self, handle: &TagHandle) -> Result<TagInfo, DriverError>;

    /// Write a message to an NDEF-ready tag.
    fn write_ndef(&self, handle: &TagHandle, message: &NdefMessage) -> Result<(), DriverError>;

    /// Format a blank tag and write `message` in one command.
    fn format_ndef(&self, handle: &TagHandle, message: &NdefMessage) -> Result<(), DriverError>;

    /// Read the stored message, `None` when the tag holds none.
    fn read_ndef(&self, handle: &TagHandle) -> Result<Option<NdefMessage>, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_carriers_are_ordered_a_b_f() {
        assert_eq!(
            TechnologyKind::BASE_CARRIERS,
            [TechnologyKind::NfcA, TechnologyKind::NfcB, TechnologyKind::NfcF]
        );
        assert!(!TechnologyKind::Ndef.is_base_carrier());
        assert!(TechnologyKind::NfcF.is_base_carrier());
    }

    #[test]
    fn tag_id_renders_as_hex() {
        let info = TagInfo {
            id: vec![0x04, 0xA2, 0xFF],
            ..TagInfo::default()
        };
        assert_eq!(info.id_hex(), "04A2FF");
    }
}
