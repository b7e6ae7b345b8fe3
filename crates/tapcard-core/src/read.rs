// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Read path: one generic-NDEF acquisition, no fallback, no retry.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::codec::{ProvisioningTarget, UrlCodec};
use crate::config::Timing;
use crate::error::OpError;
use crate::ndef::{self, NdefError, NdefMessage};
use crate::port::{DriverError, TagPort, TechnologyKind};
use crate::session::{SessionController, SessionSlot};

/// Reads a card link back from a tag.
pub struct ReadPath<'a, P: TagPort + ?Sized> {
    port: &'a P,
    slot: &'a SessionSlot,
    codec: &'a UrlCodec,
    timing: Timing,
}

impl<'a, P: TagPort + ?Sized> ReadPath<'a, P> {
    /// Read path over `port`, sharing `slot` with the engine's `cancel()`.
    pub fn new(port: &'a P, slot: &'a SessionSlot, codec: &'a UrlCodec, timing: Timing) -> Self {
        Self {
            port,
            slot,
            codec,
            timing,
        }
    }

    /// Acquire generic-NDEF, read the stored message and decode it.
    ///
    /// The handle is released before decoding starts.
    pub fn read(&self) -> Result<ProvisioningTarget, OpError> {
        let started = Instant::now();
        let result = self.fetch().and_then(|message| self.interpret(message));
        let elapsed = started.elapsed();
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        match &result {
            Ok(target) => info!(
                owner = target.owner_id(),
                slot = target.slot_index(),
                duration_ms,
                "card link read"
            ),
            Err(err) => info!(duration_ms, error = %err, "read failed"),
        }
        if elapsed > self.timing.read_budget {
            warn!(duration_ms, "read exceeded its time budget");
        }
        result
    }

    fn fetch(&self) -> Result<Option<NdefMessage>, OpError> {
        let controller =
            SessionController::new(self.port, self.slot, self.timing.tech_switch_delay);
        controller.with_technology(TechnologyKind::Ndef, |session| {
            session.read_ndef().map_err(|err| self.driver_failure(&err))
        })
    }

    /// A failed `read_ndef` on an acquired handle reports `AcquisitionFailed`:
    /// the error kinds are closed and this is the only one for a tag that
    /// stopped answering.
    fn driver_failure(&self, err: &DriverError) -> OpError {
        if self.slot.is_cancelled() {
            OpError::Cancelled
        } else {
            OpError::AcquisitionFailed {
                detail: err.message().to_owned(),
            }
        }
    }

    fn interpret(&self, message: Option<NdefMessage>) -> Result<ProvisioningTarget, OpError> {
        let Some(message) = message.filter(|m| !m.is_empty()) else {
            return Err(OpError::NoData);
        };
        let uri = match ndef::decode_uri(message.as_bytes()) {
            Ok(uri) => uri,
            Err(NdefError::EmptyRecord) => return Err(OpError::NoData),
            Err(err) => {
                return Err(OpError::InvalidData {
                    detail: err.to_string(),
                })
            }
        };
        debug!(%uri, "ndef uri decoded");
        self.codec.decode(&uri).map_err(|err| OpError::InvalidData {
            detail: err.to_string(),
        })
    }
}
