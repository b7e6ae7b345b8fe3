// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]
//! Engine facade: availability, the in-flight guard and cancellation.

use std::cell::RefCell;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tapcard_core::progress::ObserverError;
use tapcard_core::{
    EngineSettings, ErrorKind, NfcStatus, OpError, ProgressEvent, TagEngine, TechnologyKind,
};
use tapcard_dry_tests::{
    build_engine, fast_settings, init_tracing, target, Call, FakeTag, FakeTagPort, Gate,
    UNSUPPORTED,
};

// ── 1. Availability ───────────────────────────────────────────────────────

#[test]
fn initialize_starts_a_present_and_enabled_adapter() {
    let port = FakeTagPort::new();
    let engine = build_engine(port.clone());
    assert!(engine.initialize());
    assert_eq!(port.counters().starts, 1);
    assert_eq!(
        engine.status(),
        NfcStatus {
            available: true,
            enabled: true
        }
    );
}

#[test]
fn initialize_reports_missing_disabled_or_failing_adapters() {
    let port = FakeTagPort::new();
    let engine = build_engine(port.clone());

    port.set_supported(false);
    assert!(!engine.initialize());
    assert_eq!(engine.status(), NfcStatus::default());

    port.set_supported(true);
    port.set_enabled(false);
    assert!(!engine.initialize());
    assert_eq!(
        engine.status(),
        NfcStatus {
            available: true,
            enabled: false
        }
    );
    assert_eq!(port.counters().starts, 0);

    port.set_enabled(true);
    port.fail_start("NFC service died");
    assert!(!engine.initialize());
    assert_eq!(port.counters().starts, 1);
}

#[test]
fn disabled_adapter_fails_fast_without_touching_the_tag() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(137));
    port.set_enabled(false);
    let engine = build_engine(port.clone());

    let result = engine.write_url(&target(), None);
    assert_eq!(result.error_kind(), Some(ErrorKind::Unavailable));
    assert_eq!(result.attempts, 0);
    assert_eq!(result.strategy, None);

    let read = engine.read_url();
    assert!(matches!(read, Err(OpError::Unavailable { .. })), "{read:?}");
    assert!(port.counters().requests.is_empty());
}

#[test]
fn invalid_url_base_is_rejected_at_construction() {
    let settings = EngineSettings {
        url_base: "not a url".into(),
        ..fast_settings()
    };
    assert!(TagEngine::new(FakeTagPort::new(), &settings).is_err());
}

// ── 2. One operation at a time ────────────────────────────────────────────

#[test]
fn overlapping_calls_are_rejected_while_a_write_runs() {
    init_tracing();
    let port = FakeTagPort::with_tag(FakeTag::formatted(137));
    let engine = build_engine(port.clone());
    let nested_write = RefCell::new(None);
    let nested_read = RefCell::new(None);

    let observer = |event: &ProgressEvent| -> Result<(), ObserverError> {
        if event.percent == 10 {
            assert!(engine.is_busy());
            *nested_write.borrow_mut() = Some(engine.write_url(&target(), None));
            *nested_read.borrow_mut() = Some(engine.read_url());
        }
        Ok(())
    };
    let result = engine.write_url(&target(), Some(&observer));

    assert!(result.succeeded(), "{result:?}");
    let nested = nested_write.into_inner().expect("observer ran");
    assert_eq!(nested.error, Some(OpError::AlreadyInProgress));
    assert_eq!(nested.attempts, 0);
    assert_eq!(nested_read.into_inner(), Some(Err(OpError::AlreadyInProgress)));

    // The flag is released once the outer write returns.
    assert!(!engine.is_busy());
    assert!(engine.read_url().is_ok());
    assert_eq!(port.counters().requests.len(), 2);
}

// ── 3. Cancellation ───────────────────────────────────────────────────────

#[test]
fn cancel_while_waiting_for_a_technology_ends_the_write() {
    init_tracing();
    let port = FakeTagPort::with_tag(FakeTag::formatted(137));
    port.park_at(Gate::Acquire(TechnologyKind::Ndef));
    let engine = build_engine(port.clone());

    let result = thread::scope(|s| {
        let writer = s.spawn(|| engine.write_url(&target(), None));
        port.wait_until_parked();
        engine.cancel();
        writer.join().unwrap()
    });

    assert_eq!(result.error, Some(OpError::Cancelled));
    assert_eq!(result.attempts, 1);
    let counters = port.counters();
    assert_eq!(counters.cancel_requests, 1);
    assert_eq!(counters.acquires, 0);
    assert_eq!(counters.requests.len(), 1, "no fallback after cancel");
}

#[test]
fn cancel_during_a_write_releases_the_live_handle_exactly_once() {
    init_tracing();
    let port = FakeTagPort::with_tag(FakeTag::formatted(137));
    port.park_at(Gate::Write);
    let engine = build_engine(port.clone());

    let result = thread::scope(|s| {
        let writer = s.spawn(|| engine.write_url(&target(), None));
        port.wait_until_parked();
        engine.cancel();
        writer.join().unwrap()
    });

    assert_eq!(result.error, Some(OpError::Cancelled));
    let counters = port.counters();
    assert_eq!(counters.acquires, 1);
    assert_eq!(counters.releases, 1);
    assert_eq!(counters.bad_releases, 0);
    assert_eq!(port.live_handles(), 0);
    assert_eq!(port.stored_message(), None);
}

#[test]
fn cancel_between_steps_stops_the_chain() {
    let port = FakeTagPort::with_tag(FakeTag::blank());
    let engine = build_engine(port.clone());

    let observer = |event: &ProgressEvent| -> Result<(), ObserverError> {
        if event.percent == 40 {
            engine.cancel();
        }
        Ok(())
    };
    let result = engine.write_url(&target(), Some(&observer));

    assert_eq!(result.error, Some(OpError::Cancelled));
    assert_eq!(result.attempts, 1);
    let counters = port.counters();
    assert_eq!(counters.formats, 0);
    assert_eq!(counters.requests, vec![vec![TechnologyKind::Ndef]]);
}

#[test]
fn cancel_during_the_switch_pause_prevents_the_format() {
    init_tracing();
    let tag = FakeTag::formatted(137).with_technology(TechnologyKind::NdefFormatable);
    let port = FakeTagPort::with_tag(tag);
    port.script(Call::Write, [UNSUPPORTED]);
    let settings = EngineSettings {
        tech_switch_delay_ms: 200,
        ..fast_settings()
    };
    let engine = TagEngine::new(port.clone(), &settings).unwrap();
    let (reached_format, format_pending) = mpsc::channel();

    let result = thread::scope(|s| {
        let writer = s.spawn(|| {
            let observer = move |event: &ProgressEvent| -> Result<(), ObserverError> {
                if event.percent == 60 {
                    reached_format
                        .send(())
                        .map_err(|e| ObserverError::new(e.to_string()))?;
                }
                Ok(())
            };
            engine.write_url(&target(), Some(&observer))
        });
        format_pending.recv().unwrap();
        // Land inside the pause that precedes the formattable acquisition.
        thread::sleep(Duration::from_millis(50));
        engine.cancel();
        writer.join().unwrap()
    });

    assert_eq!(result.error, Some(OpError::Cancelled), "{result:?}");
    assert_eq!(result.attempts, 1);
    let counters = port.counters();
    assert_eq!(counters.formats, 0);
    assert_eq!(
        counters.requests,
        vec![vec![TechnologyKind::Ndef], vec![TechnologyKind::NfcA]]
    );
    assert_eq!(counters.acquires, counters.releases);
    assert_eq!(port.stored_message(), None);
}

#[test]
fn idle_cancel_does_not_affect_the_next_operation() {
    let port = FakeTagPort::with_tag(FakeTag::formatted(137));
    let engine = build_engine(port.clone());

    engine.cancel();
    let result = engine.write_url(&target(), None);

    assert!(result.succeeded(), "{result:?}");
    assert_eq!(port.counters().cancel_requests, 1);
}
