// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Progress events pushed to a caller-supplied observer.
//!
//! Percentages are fixed checkpoints per fallback state, so whichever path a
//! tag takes the UI sees a deterministic, non-decreasing bar. Observer calls
//! are synchronous; a failing or panicking observer is logged and ignored and
//! never aborts the hardware operation.

use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::warn;

/// One progress update. Ephemeral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Physical attempt in progress (1 or 2).
    pub attempt: u8,
    /// Short status line.
    pub message: &'static str,
    /// Completion in `[0, 100]`.
    pub percent: u8,
}

/// A named progress checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Completion in `[0, 100]`.
    pub percent: u8,
    /// Status line.
    pub message: &'static str,
}

/// Payload encoded, about to touch the tag.
pub const PREPARE: Checkpoint = Checkpoint {
    percent: 10,
    message: "Preparing card link",
};
/// Probing for a pre-formatted tag.
pub const PROBE: Checkpoint = Checkpoint {
    percent: 20,
    message: "Checking tag format",
};
/// Waking the tag over a base carrier.
pub const BASE_CARRIER: Checkpoint = Checkpoint {
    percent: 40,
    message: "Connecting to tag",
};
/// First format-and-write attempt.
pub const FORMAT: Checkpoint = Checkpoint {
    percent: 60,
    message: "Formatting tag",
};
/// Array acquisition before the second format attempt.
pub const ARRAY_NEGOTIATION: Checkpoint = Checkpoint {
    percent: 70,
    message: "Negotiating tag technology",
};
/// Second format-and-write attempt.
pub const NEGOTIATED_FORMAT: Checkpoint = Checkpoint {
    percent: 80,
    message: "Formatting tag again",
};
/// Last generic-NDEF write.
pub const FINAL_RETRY: Checkpoint = Checkpoint {
    percent: 90,
    message: "Retrying write",
};
/// Data committed.
pub const DONE: Checkpoint = Checkpoint {
    percent: 100,
    message: "Card link written",
};

/// Observer failure, reported back by [`ProgressObserver::on_progress`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ObserverError(String);

impl ObserverError {
    /// Wrap a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives progress updates. Called on the operation's thread; must not
/// block for long.
pub trait ProgressObserver {
    /// Handle one update.
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), ObserverError>;
}

impl<F> ProgressObserver for F
where
    F: Fn(&ProgressEvent) -> Result<(), ObserverError>,
{
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
        self(event)
    }
}

/// Per-attempt reporter: clamps, keeps percentages non-decreasing, isolates
/// observer failures.
pub struct ProgressReporter<'o> {
    observer: Option<&'o dyn ProgressObserver>,
    attempt: u8,
    last_percent: u8,
}

impl<'o> ProgressReporter<'o> {
    /// Reporter for physical attempt `attempt`.
    pub fn new(observer: Option<&'o dyn ProgressObserver>, attempt: u8) -> Self {
        Self {
            observer,
            attempt,
            last_percent: 0,
        }
    }

    /// Physical attempt number.
    pub fn attempt(&self) -> u8 {
        self.attempt
    }

    /// Highest percentage reported so far.
    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Push `checkpoint` to the observer.
    pub fn report(&mut self, checkpoint: Checkpoint) {
        let percent = checkpoint.percent.min(100).max(self.last_percent);
        self.last_percent = percent;
        let Some(observer) = self.observer else {
            return;
        };
        let event = ProgressEvent {
            attempt: self.attempt,
            message: checkpoint.message,
            percent,
        };
        match panic::catch_unwind(AssertUnwindSafe(|| observer.on_progress(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(percent, error = %err, "progress observer failed"),
            Err(_) => warn!(percent, "progress observer panicked"),
        }
    }
}
