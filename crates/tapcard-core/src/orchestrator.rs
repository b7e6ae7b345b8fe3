// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Retry and timing around the fallback chain.
//!
//! A write runs the whole chain at most [`MAX_ATTEMPTS`] times. The second
//! attempt only happens for retryable failures (see [`OpError::is_retryable`])
//! and after the configured backoff. Beyond that the user has to present the
//! tag again.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::chain::{ChainReport, FallbackChain, Strategy, TagCapability};
use crate::codec::{ProvisioningTarget, UrlCodec};
use crate::config::Timing;
use crate::error::{ErrorKind, OpError};
use crate::ndef::{self, NdefMessage};
use crate::port::TagPort;
use crate::progress::{self, ProgressObserver, ProgressReporter};
use crate::session::{SessionController, SessionSlot};

/// Whole-operation attempts per write (one automatic retry).
pub const MAX_ATTEMPTS: u8 = 2;

/// Outcome of one `write_url` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    /// Strategy that committed the data, or the last one reached on failure.
    /// `None` when the write was rejected before touching the tag.
    pub strategy: Option<Strategy>,
    /// Physical attempts made (0, 1 or 2).
    pub attempts: u8,
    /// Wall time across all attempts, backoff included.
    pub duration: Duration,
    /// Terminal error; `None` on success.
    pub error: Option<OpError>,
    /// Tag facts from the last attempt that got far enough to read them.
    pub capability: Option<TagCapability>,
}

impl AttemptResult {
    /// A write refused before any hardware call.
    pub fn rejected(error: OpError) -> Self {
        Self {
            strategy: None,
            attempts: 0,
            duration: Duration::ZERO,
            error: Some(error),
            capability: None,
        }
    }

    /// `true` when the data was committed.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Kind of the terminal error, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(OpError::kind)
    }

    /// [`AttemptResult::duration`] in whole milliseconds.
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Runs the fallback chain with retry, backoff and timing.
pub struct RetryOrchestrator<'a, P: TagPort + ?Sized> {
    port: &'a P,
    slot: &'a SessionSlot,
    codec: &'a UrlCodec,
    timing: Timing,
}

impl<'a, P: TagPort + ?Sized> RetryOrchestrator<'a, P> {
    /// Orchestrator over `port`, sharing `slot` with the engine's `cancel()`.
    pub fn new(port: &'a P, slot: &'a SessionSlot, codec: &'a UrlCodec, timing: Timing) -> Self {
        Self {
            port,
            slot,
            codec,
            timing,
        }
    }

    /// Encode `target` and write it, retrying once on a retryable failure.
    pub fn write(
        &self,
        target: &ProvisioningTarget,
        observer: Option<&dyn ProgressObserver>,
    ) -> AttemptResult {
        let started = Instant::now();
        let url = self.codec.encode(target);
        let message = match ndef::encode_uri(url.as_str()) {
            Ok(message) => message,
            Err(err) => {
                warn!(url = %url, error = %err, "card link does not fit an ndef record");
                return AttemptResult::rejected(OpError::UnableToProvision {
                    detail: err.to_string(),
                });
            }
        };
        debug!(url = %url, bytes = message.len(), "card link encoded");

        let mut attempt = 1;
        let mut report = self.run_attempt(&message, observer, attempt);
        while let Err(failure) = &report.outcome {
            let error = OpError::from(failure.clone());
            if attempt >= MAX_ATTEMPTS || !error.is_retryable() {
                break;
            }
            debug!(attempt, error = %error, backoff = ?self.timing.retry_backoff, "retrying write");
            if !self.timing.retry_backoff.is_zero() {
                thread::sleep(self.timing.retry_backoff);
            }
            if self.slot.is_cancelled() {
                return self.finish(started, attempt, report, Some(OpError::Cancelled));
            }
            attempt += 1;
            let previous = report.capability.take();
            report = self.run_attempt(&message, observer, attempt);
            if report.capability.is_none() {
                report.capability = previous;
            }
        }

        let error = report.outcome.as_ref().err().cloned().map(OpError::from);
        self.finish(started, attempt, report, error)
    }

    fn run_attempt(
        &self,
        message: &NdefMessage,
        observer: Option<&dyn ProgressObserver>,
        attempt: u8,
    ) -> ChainReport {
        let mut reporter = ProgressReporter::new(observer, attempt);
        reporter.report(progress::PREPARE);
        let controller =
            SessionController::new(self.port, self.slot, self.timing.tech_switch_delay);
        FallbackChain::new(&controller, message, &mut reporter).run()
    }

    fn finish(
        &self,
        started: Instant,
        attempts: u8,
        report: ChainReport,
        error: Option<OpError>,
    ) -> AttemptResult {
        let result = AttemptResult {
            strategy: Some(report.outcome.unwrap_or(report.last_strategy)),
            attempts,
            duration: started.elapsed(),
            error,
            capability: report.capability,
        };
        let duration_ms = result.duration_ms();
        match &result.error {
            None => info!(strategy = ?result.strategy, attempts, duration_ms, "write succeeded"),
            Some(err) => {
                info!(
                    strategy = ?result.strategy,
                    attempts,
                    duration_ms,
                    error = %err,
                    "write failed"
                );
            }
        }
        if result.duration > self.timing.write_budget {
            warn!(
                duration_ms,
                budget_ms = u64::try_from(self.timing.write_budget.as_millis()).unwrap_or(u64::MAX),
                "write exceeded its time budget"
            );
        }
        result
    }
}
