// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Progress observer that records every event.

use std::sync::{Arc, Mutex, MutexGuard};
use tapcard_core::progress::{ObserverError, ProgressEvent, ProgressObserver};

/// Records [`ProgressEvent`]s; optionally fails every call after recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    inner: Arc<Mutex<Recorded>>,
}

#[derive(Debug, Default)]
struct Recorded {
    events: Vec<ProgressEvent>,
    fail: bool,
}

impl RecordingObserver {
    /// Observer that accepts every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// Observer that records, then reports an error for every event.
    pub fn failing() -> Self {
        let observer = Self::new();
        observer.lock().fail = true;
        observer
    }

    /// All events, in order.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.lock().events.clone()
    }

    /// Percentages reported for physical attempt `attempt`.
    pub fn percents(&self, attempt: u8) -> Vec<u8> {
        self.lock()
            .events
            .iter()
            .filter(|e| e.attempt == attempt)
            .map(|e| e.percent)
            .collect()
    }

    /// Distinct attempt numbers seen, in order of first appearance.
    pub fn attempts(&self) -> Vec<u8> {
        let mut seen = Vec::new();
        for event in &self.lock().events {
            if !seen.contains(&event.attempt) {
                seen.push(event.attempt);
            }
        }
        seen
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProgressObserver for RecordingObserver {
    fn on_progress(&self, event: &ProgressEvent) -> Result<(), ObserverError> {
        let mut inner = self.lock();
        inner.events.push(*event);
        if inner.fail {
            return Err(ObserverError::new("observer rejected event"));
        }
        Ok(())
    }
}
