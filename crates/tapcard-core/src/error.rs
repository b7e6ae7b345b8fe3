// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Operation-level error taxonomy.
//!
//! Internal strategy failures are classified at each state boundary; only an
//! [`OpError`] crosses the engine boundary. Raw driver text travels in the
//! `detail` fields for diagnostics and is never meant for end-user copy: the UI
//! layer maps [`ErrorKind`] to its own strings.

use thiserror::Error;

/// Terminal error for a read or write operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    /// The tag moved away or the controller was busy while acquiring a technology.
    #[error("technology acquisition failed: {detail}")]
    AcquisitionFailed {
        /// Underlying driver message.
        detail: String,
    },
    /// The encoded message does not fit on this physical tag.
    #[error("payload of {needed} bytes exceeds tag capacity of {capacity} bytes")]
    CapacityExceeded {
        /// Encoded NDEF message length in bytes.
        needed: usize,
        /// Capacity reported by the tag.
        capacity: usize,
    },
    /// Every strategy was exhausted (or a fatal write error occurred).
    #[error("unable to provision tag: {detail}")]
    UnableToProvision {
        /// Last underlying error, for diagnostics.
        detail: String,
    },
    /// The tag carries no NDEF message.
    #[error("tag holds no data")]
    NoData,
    /// The tag carries a message that is not a card link.
    #[error("tag data is not a card link: {detail}")]
    InvalidData {
        /// Why decoding failed.
        detail: String,
    },
    /// Another operation is already running on this engine.
    #[error("an NFC operation is already in progress")]
    AlreadyInProgress,
    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
    /// NFC hardware is missing or switched off.
    #[error("NFC is unavailable: {detail}")]
    Unavailable {
        /// Which check failed.
        detail: String,
    },
    /// A second technology was requested while one was still held.
    #[error("a technology session is already open")]
    SessionBusy,
}

/// Closed, copyable classification of [`OpError`] for UI mapping and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`OpError::AcquisitionFailed`].
    AcquisitionFailed,
    /// See [`OpError::CapacityExceeded`].
    CapacityExceeded,
    /// See [`OpError::UnableToProvision`].
    UnableToProvision,
    /// See [`OpError::NoData`].
    NoData,
    /// See [`OpError::InvalidData`].
    InvalidData,
    /// See [`OpError::AlreadyInProgress`].
    AlreadyInProgress,
    /// See [`OpError::Cancelled`].
    Cancelled,
    /// See [`OpError::Unavailable`].
    Unavailable,
    /// See [`OpError::SessionBusy`].
    SessionBusy,
}

impl OpError {
    /// Classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AcquisitionFailed { .. } => ErrorKind::AcquisitionFailed,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::UnableToProvision { .. } => ErrorKind::UnableToProvision,
            Self::NoData => ErrorKind::NoData,
            Self::InvalidData { .. } => ErrorKind::InvalidData,
            Self::AlreadyInProgress => ErrorKind::AlreadyInProgress,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Unavailable { .. } => ErrorKind::Unavailable,
            Self::SessionBusy => ErrorKind::SessionBusy,
        }
    }

    /// Whether the orchestrator may run a second whole-operation attempt.
    ///
    /// Capacity is a property of payload vs. tag and cannot change between
    /// attempts; cancellation, unavailability and usage errors are caller-side.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AcquisitionFailed { .. } | Self::UnableToProvision { .. }
        )
    }
}
