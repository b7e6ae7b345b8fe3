// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Scoped technology acquisition against the fake port.

use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::{Duration, Instant};

use tapcard_core::ndef::NdefMessage;
use tapcard_core::port::{DriverError, TagHandle, TagInfo, TagPort, TechnologyKind};
use tapcard_core::session::{SessionController, SessionError, SessionSlot};
use tapcard_core::OpError;
use tapcard_dry_tests::{Call, FakeTag, FakeTagPort, TAG_LOST};

#[test]
fn body_result_is_returned_and_handle_released() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(64));
    let slot = SessionSlot::new();
    let controller = SessionController::new(&port, &slot, Duration::ZERO);

    let info = controller
        .with_technology(TechnologyKind::Ndef, |session| {
            assert!(slot.is_occupied());
            assert_eq!(session.technologies(), [TechnologyKind::Ndef]);
            session.tag_info().map_err(|e| OpError::AcquisitionFailed {
                detail: e.message().to_owned(),
            })
        })
        .unwrap();

    assert_eq!(info.ndef.map(|n| n.max_size), Some(64));
    assert!(!slot.is_occupied());
    assert_eq!(port.counters().releases, 1);
}

#[test]
fn body_error_still_releases() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(64));
    port.script(Call::TagInfo, [TAG_LOST]);
    let slot = SessionSlot::new();
    let controller = SessionController::new(&port, &slot, Duration::ZERO);

    let result: Result<(), OpError> = controller.with_technology(TechnologyKind::Ndef, |session| {
        session.tag_info().map(|_| ()).map_err(|e| OpError::UnableToProvision {
            detail: e.message().to_owned(),
        })
    });

    assert!(result.is_err());
    assert_eq!(port.counters().acquires, 1);
    assert_eq!(port.counters().releases, 1);
}

#[test]
#[allow(clippy::panic)]
fn panicking_body_still_releases() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(64));
    let slot = SessionSlot::new();
    let controller = SessionController::new(&port, &slot, Duration::ZERO);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let _: Result<(), OpError> = controller.with_technology(TechnologyKind::Ndef, |_session| {
            panic!("driver callback blew up")
        });
    }));

    assert!(outcome.is_err());
    assert_eq!(port.counters().releases, 1);
    assert_eq!(port.live_handles(), 0);
}

#[test]
fn nested_acquisition_is_refused() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(64));
    let slot = SessionSlot::new();
    let controller = SessionController::new(&port, &slot, Duration::ZERO);

    let inner: Result<Result<(), SessionError>, SessionError> =
        controller.with_technology(TechnologyKind::Ndef, |_outer| {
            Ok(controller.with_technology(TechnologyKind::NfcA, |_inner| Ok(())))
        });

    assert_eq!(inner, Ok(Err(SessionError::Busy)));
    let counters = port.counters();
    assert_eq!(counters.acquires, 1);
    assert_eq!(counters.max_live, 1);
    assert_eq!(counters.releases, 1);
}

#[test]
fn acquisition_failure_and_cancellation_are_distinguished() {
    let port = FakeTagPort::new();
    let slot = SessionSlot::new();
    let controller = SessionController::new(&port, &slot, Duration::ZERO);

    let failed: Result<(), SessionError> =
        controller.with_technology(TechnologyKind::Ndef, |_| Ok(()));
    assert!(matches!(failed, Err(SessionError::AcquisitionFailed(_))));

    slot.request_cancel();
    let cancelled: Result<(), SessionError> =
        controller.with_technology(TechnologyKind::Ndef, |_| Ok(()));
    assert_eq!(cancelled, Err(SessionError::Cancelled));
    // Cancelled before the driver was asked.
    assert_eq!(port.counters().requests.len(), 1);
}

#[test]
fn switch_pause_applies_only_after_a_release() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(64));
    let slot = SessionSlot::new();
    let pause = Duration::from_millis(40);
    let controller = SessionController::new(&port, &slot, pause);

    let started = Instant::now();
    let first: Result<(), SessionError> =
        controller.with_technology(TechnologyKind::Ndef, |_| Ok(()));
    first.unwrap();
    let second: Result<(), SessionError> =
        controller.with_technology(TechnologyKind::NfcA, |_| Ok(()));
    second.unwrap();

    assert!(started.elapsed() >= pause);
    assert_eq!(port.counters().releases, 2);
}

#[test]
fn handle_taken_by_cancel_is_not_released_twice() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(64));
    let slot = SessionSlot::new();
    let controller = SessionController::new(&port, &slot, Duration::ZERO);

    let result: Result<(), SessionError> =
        controller.with_technology(TechnologyKind::Ndef, |session| {
            // What `TagEngine::cancel` does from another thread.
            slot.request_cancel();
            let handle = slot.take_live().unwrap();
            port.release(handle).unwrap();
            assert!(session.tag_info().is_err());
            Ok(())
        });

    result.unwrap();
    let counters = port.counters();
    assert_eq!(counters.releases, 1);
    assert_eq!(counters.bad_releases, 0);
}

#[test]
fn cancel_during_switch_pause_stops_the_next_acquisition() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(64));
    let slot = SessionSlot::new();
    let controller = SessionController::new(&port, &slot, Duration::from_millis(200));

    let first: Result<(), SessionError> =
        controller.with_technology(TechnologyKind::Ndef, |_| Ok(()));
    first.unwrap();
    let second: Result<(), SessionError> = thread::scope(|s| {
        s.spawn(|| {
            thread::sleep(Duration::from_millis(50));
            slot.request_cancel();
        });
        controller.with_technology(TechnologyKind::NfcA, |_| Ok(()))
    });

    assert_eq!(second, Err(SessionError::Cancelled));
    let counters = port.counters();
    assert_eq!(counters.requests, vec![vec![TechnologyKind::Ndef]]);
    assert_eq!(counters.acquires, 1);
    assert_eq!(counters.releases, 1);
}

/// Driver that grants the technology after the operation was cancelled.
struct GrantsAfterCancel<'s> {
    inner: FakeTagPort,
    slot: &'s SessionSlot,
}

impl TagPort for GrantsAfterCancel<'_> {
    fn is_supported(&self) -> bool {
        self.inner.is_supported()
    }

    fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }

    fn start(&self) -> Result<(), DriverError> {
        self.inner.start()
    }

    fn request_technology(
        &self,
        technologies: &[TechnologyKind],
    ) -> Result<TagHandle, DriverError> {
        self.slot.request_cancel();
        self.inner.request_technology(technologies)
    }

    fn release(&self, handle: TagHandle) -> Result<(), DriverError> {
        self.inner.release(handle)
    }

    fn cancel_request(&self) -> Result<(), DriverError> {
        self.inner.cancel_request()
    }

    fn tag_info(&self, handle: &TagHandle) -> Result<TagInfo, DriverError> {
        self.inner.tag_info(handle)
    }

    fn write_ndef(&self, handle: &TagHandle, message: &NdefMessage) -> Result<(), DriverError> {
        self.inner.write_ndef(handle, message)
    }

    fn format_ndef(&self, handle: &TagHandle, message: &NdefMessage) -> Result<(), DriverError> {
        self.inner.format_ndef(handle, message)
    }

    fn read_ndef(&self, handle: &TagHandle) -> Result<Option<NdefMessage>, DriverError> {
        self.inner.read_ndef(handle)
    }
}

#[test]
fn technology_granted_after_cancel_is_released_and_body_skipped() {
    let fake = FakeTagPort::with_tag(FakeTag::formatted(64));
    let slot = SessionSlot::new();
    let port = GrantsAfterCancel {
        inner: fake.clone(),
        slot: &slot,
    };
    let controller = SessionController::new(&port, &slot, Duration::ZERO);
    let mut body_ran = false;

    let result: Result<(), SessionError> =
        controller.with_technology(TechnologyKind::Ndef, |_| {
            body_ran = true;
            Ok(())
        });

    assert_eq!(result, Err(SessionError::Cancelled));
    assert!(!body_ran);
    assert!(!slot.is_occupied());
    let counters = fake.counters();
    assert_eq!(counters.acquires, 1);
    assert_eq!(counters.releases, 1);
    assert_eq!(fake.live_handles(), 0);
}

#[test]
fn driver_calls_are_refused_once_cancel_is_requested() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(64));
    let slot = SessionSlot::new();
    let controller = SessionController::new(&port, &slot, Duration::ZERO);

    let result: Result<(), OpError> = controller.with_technology(TechnologyKind::Ndef, |session| {
        slot.request_cancel();
        let message = NdefMessage::from_bytes(vec![0xd1, 0x01, 0x01, b'U', 0x00]);
        session.write_ndef(&message).map_err(|e| OpError::UnableToProvision {
            detail: e.message().to_owned(),
        })
    });

    assert!(result.is_err());
    let counters = port.counters();
    assert_eq!(counters.writes, 0);
    assert_eq!(counters.releases, 1);
    assert_eq!(port.stored_message(), None);
}
