// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine facade: the inbound API used by the UI layer.
//!
//! One [`TagEngine`] is constructed per adapter and owned by the caller. It
//! admits one operation at a time; overlapping calls fail with
//! [`OpError::AlreadyInProgress`]. The engine is `Send + Sync`, so
//! [`TagEngine::cancel`] can run on another thread while a write or read
//! blocks on the hardware.
//!
//! Cancellation is cooperative. `cancel()` flags the running operation, asks
//! the driver to abort a pending technology request, and releases any live
//! handle. A driver command already in flight finishes first. A `cancel()`
//! issued while nothing runs has no effect on the next operation.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, instrument, warn};

use crate::codec::{ProvisioningTarget, TemplateError, UrlCodec};
use crate::config::{EngineSettings, Timing};
use crate::error::OpError;
use crate::orchestrator::{AttemptResult, RetryOrchestrator};
use crate::port::TagPort;
use crate::progress::ProgressObserver;
use crate::read::ReadPath;
use crate::session::SessionSlot;

/// Adapter availability as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NfcStatus {
    /// The device has NFC hardware.
    pub available: bool,
    /// NFC is switched on.
    pub enabled: bool,
}

/// NFC tag provisioning engine.
pub struct TagEngine<P: TagPort> {
    port: P,
    slot: SessionSlot,
    in_flight: AtomicBool,
    codec: UrlCodec,
    timing: Timing,
}

impl<P: TagPort> TagEngine<P> {
    /// Engine over `port` configured by `settings`.
    pub fn new(port: P, settings: &EngineSettings) -> Result<Self, TemplateError> {
        Ok(Self {
            port,
            slot: SessionSlot::new(),
            in_flight: AtomicBool::new(false),
            codec: settings.codec()?,
            timing: settings.timing(),
        })
    }

    /// Hardware port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Card-link codec in use.
    pub fn codec(&self) -> &UrlCodec {
        &self.codec
    }

    /// Timing in use.
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// `true` while a write or read runs.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Check hardware support and start the adapter.
    #[instrument(skip(self))]
    pub fn initialize(&self) -> bool {
        let status = self.status();
        if !status.available {
            warn!("nfc hardware not present");
            return false;
        }
        if !status.enabled {
            warn!("nfc is switched off");
            return false;
        }
        match self.port.start() {
            Ok(()) => {
                info!("nfc adapter started");
                true
            }
            Err(err) => {
                warn!(error = %err, "nfc adapter failed to start");
                false
            }
        }
    }

    /// Current adapter availability.
    pub fn status(&self) -> NfcStatus {
        let available = self.port.is_supported();
        NfcStatus {
            available,
            enabled: available && self.port.is_enabled(),
        }
    }

    /// Write the card link for `target` to the presented tag.
    #[instrument(
        skip(self, target, observer),
        fields(owner = target.owner_id(), slot = target.slot_index())
    )]
    pub fn write_url(
        &self,
        target: &ProvisioningTarget,
        observer: Option<&dyn ProgressObserver>,
    ) -> AttemptResult {
        let Some(_guard) = InFlight::enter(&self.in_flight) else {
            warn!("write rejected: another operation is running");
            return AttemptResult::rejected(OpError::AlreadyInProgress);
        };
        self.slot.reset_cancel();
        if let Err(err) = self.ensure_available() {
            return AttemptResult::rejected(err);
        }
        RetryOrchestrator::new(&self.port, &self.slot, &self.codec, self.timing)
            .write(target, observer)
    }

    /// Read the card link stored on the presented tag.
    #[instrument(skip(self))]
    pub fn read_url(&self) -> Result<ProvisioningTarget, OpError> {
        let Some(_guard) = InFlight::enter(&self.in_flight) else {
            warn!("read rejected: another operation is running");
            return Err(OpError::AlreadyInProgress);
        };
        self.slot.reset_cancel();
        self.ensure_available()?;
        ReadPath::new(&self.port, &self.slot, &self.codec, self.timing).read()
    }

    /// Abort the running operation and release any held technology.
    ///
    /// Safe to call at any time and from any thread. Driver failures are
    /// logged, not returned. Blocks for up to one driver timeout while a
    /// driver command is running against the live handle.
    #[instrument(skip(self))]
    pub fn cancel(&self) {
        self.slot.request_cancel();
        if let Err(err) = self.port.cancel_request() {
            warn!(error = %err, "driver refused to cancel the pending request");
        }
        if let Some(handle) = self.slot.take_live() {
            let id = handle.id();
            match self.port.release(handle) {
                Ok(()) => info!(handle = id, "technology released by cancel"),
                Err(err) => warn!(handle = id, error = %err, "release during cancel failed"),
            }
        }
    }

    fn ensure_available(&self) -> Result<(), OpError> {
        let status = self.status();
        if !status.available {
            return Err(OpError::Unavailable {
                detail: "nfc hardware not present".into(),
            });
        }
        if !status.enabled {
            return Err(OpError::Unavailable {
                detail: "nfc is switched off".into(),
            });
        }
        Ok(())
    }
}

/// Holds the engine's in-flight flag for the duration of one operation.
struct InFlight<'e> {
    flag: &'e AtomicBool,
}

impl<'e> InFlight<'e> {
    fn enter(flag: &'e AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_guard_is_exclusive_and_resets() {
        let flag = AtomicBool::new(false);
        let first = InFlight::enter(&flag);
        assert!(first.is_some());
        assert!(InFlight::enter(&flag).is_none());
        drop(first);
        assert!(!flag.load(Ordering::Acquire));
        assert!(InFlight::enter(&flag).is_some());
    }
}
