// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tag session controller: scoped acquisition of one hardware technology.
//!
//! # Release Guarantee
//!
//! [`SessionController::with_technology`] parks the acquired [`TagHandle`] in
//! the engine-owned [`SessionSlot`] and hands the body a [`TechSession`]. The
//! session's `Drop` takes the handle back out of the slot and releases it, so
//! the handle is released on success, on error returns and while unwinding.
//!
//! [`crate::TagEngine::cancel`] may take the handle out of the slot first (from
//! another thread). Whoever takes it releases it; the other side finds the slot
//! empty. Each acquisition is therefore released exactly once.
//!
//! Once cancellation is requested no further driver call runs through a
//! session: the flag is checked after the switch pause, again when the driver
//! grants a technology, and before every call against the live handle.
//!
//! # One Technology At A Time
//!
//! Acquiring while the slot is occupied is a programming error and yields
//! [`SessionError::Busy`]. After a release, the next acquisition waits for the
//! configured switch pause so the driver can settle.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::OpError;
use crate::ndef::NdefMessage;
use crate::port::{DriverError, TagHandle, TagInfo, TagPort, TechnologyKind};

/// Engine-owned state shared between the running operation and `cancel()`.
#[derive(Debug, Default)]
pub struct SessionSlot {
    live: Mutex<Option<TagHandle>>,
    cancelled: AtomicBool,
}

impl SessionSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once cancellation was requested for the current operation.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Flag the current operation as cancelled.
    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Clear the cancellation flag (start of a new operation).
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    /// `true` while a technology handle is held.
    pub fn is_occupied(&self) -> bool {
        self.lock().is_some()
    }

    /// Remove the live handle, if any. The caller becomes responsible for
    /// releasing it.
    pub fn take_live(&self) -> Option<TagHandle> {
        self.lock().take()
    }

    fn lock(&self) -> MutexGuard<'_, Option<TagHandle>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Session-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The driver refused or failed the technology request.
    #[error("technology acquisition failed: {0}")]
    AcquisitionFailed(DriverError),
    /// A technology is already held.
    #[error("a technology session is already open")]
    Busy,
    /// The operation was cancelled before or during acquisition.
    #[error("session cancelled")]
    Cancelled,
}

impl From<SessionError> for OpError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::AcquisitionFailed(e) => Self::AcquisitionFailed {
                detail: e.message().to_owned(),
            },
            SessionError::Busy => Self::SessionBusy,
            SessionError::Cancelled => Self::Cancelled,
        }
    }
}

/// Acquires technologies one at a time for a single logical operation.
pub struct SessionController<'a, P: TagPort + ?Sized> {
    port: &'a P,
    slot: &'a SessionSlot,
    switch_delay: Duration,
    released_since_acquire: Cell<bool>,
}

impl<'a, P: TagPort + ?Sized> SessionController<'a, P> {
    /// Controller over `port`, parking handles in `slot`.
    pub fn new(port: &'a P, slot: &'a SessionSlot, switch_delay: Duration) -> Self {
        Self {
            port,
            slot,
            switch_delay,
            released_since_acquire: Cell::new(false),
        }
    }

    /// `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }

    /// Acquire `tech`, run `body`, release.
    pub fn with_technology<T, E, F>(&self, tech: TechnologyKind, body: F) -> Result<T, E>
    where
        E: From<SessionError>,
        F: FnOnce(&TechSession<'_, 'a, P>) -> Result<T, E>,
    {
        self.with_technologies(&[tech], body)
    }

    /// Acquire with an ordered technology list in one driver call, run `body`,
    /// release.
    pub fn with_technologies<T, E, F>(&self, techs: &[TechnologyKind], body: F) -> Result<T, E>
    where
        E: From<SessionError>,
        F: FnOnce(&TechSession<'_, 'a, P>) -> Result<T, E>,
    {
        let session = self.open(techs)?;
        body(&session)
    }

    fn open(&self, techs: &[TechnologyKind]) -> Result<TechSession<'_, 'a, P>, SessionError> {
        if self.slot.is_cancelled() {
            return Err(SessionError::Cancelled);
        }
        if self.released_since_acquire.replace(false) && !self.switch_delay.is_zero() {
            thread::sleep(self.switch_delay);
            if self.slot.is_cancelled() {
                debug!(?techs, "cancelled during switch pause");
                return Err(SessionError::Cancelled);
            }
        }

        let mut live = self.slot.lock();
        if live.is_some() {
            warn!(?techs, "technology requested while another is still held");
            return Err(SessionError::Busy);
        }
        match self.port.request_technology(techs) {
            Ok(handle) if self.slot.is_cancelled() => {
                drop(live);
                let id = handle.id();
                if let Err(err) = self.port.release(handle) {
                    warn!(?techs, handle = id, error = %err, "release after cancel failed");
                }
                debug!(?techs, handle = id, "acquired after cancel; released");
                self.released_since_acquire.set(true);
                Err(SessionError::Cancelled)
            }
            Ok(handle) => {
                debug!(?techs, handle = handle.id(), "technology acquired");
                *live = Some(handle);
                drop(live);
                Ok(TechSession {
                    controller: self,
                    techs: techs.to_vec(),
                })
            }
            Err(err) if self.slot.is_cancelled() => {
                debug!(?techs, error = %err, "acquisition aborted by cancel");
                Err(SessionError::Cancelled)
            }
            Err(err) => {
                debug!(?techs, error = %err, "technology acquisition failed");
                Err(SessionError::AcquisitionFailed(err))
            }
        }
    }
}

/// A live technology. Released when dropped.
pub struct TechSession<'c, 'a, P: TagPort + ?Sized> {
    controller: &'c SessionController<'a, P>,
    techs: Vec<TechnologyKind>,
}

impl<P: TagPort + ?Sized> TechSession<'_, '_, P> {
    /// Technologies requested for this session.
    pub fn technologies(&self) -> &[TechnologyKind] {
        &self.techs
    }

    /// Describe the tag.
    pub fn tag_info(&self) -> Result<TagInfo, DriverError> {
        self.call(|port, handle| port.tag_info(handle))
    }

    /// Write `message` to an NDEF-ready tag.
    pub fn write_ndef(&self, message: &NdefMessage) -> Result<(), DriverError> {
        self.call(|port, handle| port.write_ndef(handle, message))
    }

    /// Format and write in one command.
    pub fn format_ndef(&self, message: &NdefMessage) -> Result<(), DriverError> {
        self.call(|port, handle| port.format_ndef(handle, message))
    }

    /// Read the stored message.
    pub fn read_ndef(&self) -> Result<Option<NdefMessage>, DriverError> {
        self.call(|port, handle| port.read_ndef(handle))
    }

    /// Run one driver call against the live handle.
    ///
    /// Fails without touching the driver once cancellation was requested or
    /// `cancel()` already took the handle.
    pub fn call<T>(
        &self,
        f: impl FnOnce(&P, &TagHandle) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let live = self.controller.slot.lock();
        if self.controller.slot.is_cancelled() {
            return Err(DriverError::new("operation cancelled"));
        }
        match live.as_ref() {
            Some(handle) => f(self.controller.port, handle),
            None => Err(DriverError::new("technology handle was released")),
        }
    }
}

impl<P: TagPort + ?Sized> Drop for TechSession<'_, '_, P> {
    fn drop(&mut self) {
        self.controller.released_since_acquire.set(true);
        let Some(handle) = self.controller.slot.take_live() else {
            debug!(techs = ?self.techs, "handle already released by cancel");
            return;
        };
        let id = handle.id();
        match self.controller.port.release(handle) {
            Ok(()) => debug!(techs = ?self.techs, handle = id, "technology released"),
            Err(err) => {
                warn!(techs = ?self.techs, handle = id, error = %err, "technology release failed");
            }
        }
    }
}
