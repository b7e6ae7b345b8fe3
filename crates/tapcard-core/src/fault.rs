// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Driver error translation.
//!
//! Platform NFC stacks report failures as free text. [`classify`] is the only
//! function in the crate allowed to look at that text; everything downstream
//! matches on [`DriverFault`]. When a driver changes its wording, this table is
//! the one place to update.
//!
//! The "unsupported" signal in particular has no structured equivalent on the
//! supported platforms: a tag whose controller refuses an NDEF command reports
//! it only as `Unsupported tag api` (or similar).

use crate::port::DriverError;

/// Closed classification of a [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverFault {
    /// The tag (or its controller) does not support the attempted command.
    Unsupported,
    /// Contact with the tag was lost mid-operation.
    TagLost,
    /// The NFC controller is busy with another request.
    Busy,
    /// The request was cancelled (by the user or by [`crate::TagEngine::cancel`]).
    Cancelled,
    /// Anything else.
    Other,
}

/// Wording table, checked in order. Lowercase.
const SIGNATURES: &[(&str, DriverFault)] = &[
    ("unsupported tag api", DriverFault::Unsupported),
    ("not supported", DriverFault::Unsupported),
    ("unsupported", DriverFault::Unsupported),
    ("tag was lost", DriverFault::TagLost),
    ("taglost", DriverFault::TagLost),
    ("tag connection lost", DriverFault::TagLost),
    ("out of date", DriverFault::TagLost),
    ("busy", DriverFault::Busy),
    ("already in progress", DriverFault::Busy),
    ("cancel", DriverFault::Cancelled),
];

/// Translate raw driver text into a [`DriverFault`].
pub fn classify(err: &DriverError) -> DriverFault {
    let text = err.message().to_ascii_lowercase();
    SIGNATURES
        .iter()
        .find(|(needle, _)| text.contains(needle))
        .map_or(DriverFault::Other, |&(_, fault)| fault)
}
