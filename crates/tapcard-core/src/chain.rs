// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Format detection and fallback chain.
//!
//! A freshly presented tag is in an unknown state. The chain walks an ordered
//! list of strategies until one commits the message or all are exhausted:
//!
//! ```text
//! ProbeFormatted ──ok──────────────────────────────────────────────▶ Committed
//!   │ acquire failed / write "unsupported"
//!   ▼
//! EstablishBaseCarrier (A, B, F; best effort)
//!   ▼
//! AttemptFormat ──ok──▶ Committed
//!   │ "unsupported"             │ other error
//!   ▼                           ▼
//! ArrayNegotiation ─▶ AttemptFormat(negotiated) ─any error─▶ FinalNdefRetry ─ok─▶ Committed
//!                                                                  │ error
//!                                                                  ▼
//!                                                               Exhausted
//! ```
//!
//! # Structure
//!
//! - [`ChainState`] is the explicit state; [`transition`] is a pure function of
//!   `(state, outcome)`.
//! - [`FallbackChain::run`] performs one step per state against the hardware,
//!   reduces the result to a [`StepOutcome`], and feeds it to [`transition`].
//! - Driver wording is never inspected here; [`crate::fault::classify`] does that.
//!
//! # Policy
//!
//! - Capacity-exceeded is terminal from any state: it is a property of payload
//!   vs. tag, independent of the formatting path.
//! - Handles never nest. Each step acquires inside
//!   [`SessionController::with_technology`], which releases before returning.
//! - Cancellation observed at a step boundary ends the chain.

use tracing::{debug, info};

use crate::error::OpError;
use crate::fault::{classify, DriverFault};
use crate::ndef::NdefMessage;
use crate::port::{DriverError, TagInfo, TagPort, TechnologyKind};
use crate::progress::{self, Checkpoint, ProgressReporter};
use crate::session::{SessionController, SessionError};

/// Strategy that committed the message (or was last attempted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Direct write to a tag that reports as NDEF-formatted.
    ProbeFormatted,
    /// Base-carrier wake-up (never commits data itself).
    EstablishBaseCarrier,
    /// Combined format-and-write through formattable-NDEF.
    AttemptFormat,
    /// Format-and-write after an ordered-list technology acquisition.
    ArrayNegotiation,
    /// Last generic-NDEF write.
    FinalNdefRetry,
}

/// Tag facts derived during one session. Never cached across taps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCapability {
    /// The tag granted generic-NDEF access.
    pub is_pre_formatted: bool,
    /// Reported NDEF capacity, when known.
    pub max_payload_bytes: Option<usize>,
    /// `false` for a locked tag.
    pub is_writable: bool,
    /// Advertised base carriers, in A, B, F order.
    pub supported_base_technologies: Vec<TechnologyKind>,
}

impl TagCapability {
    /// Derive from a driver report.
    pub fn from_tag_info(info: &TagInfo) -> Self {
        Self {
            is_pre_formatted: info.ndef.is_some(),
            max_payload_bytes: info.ndef.map(|n| n.max_size),
            is_writable: info.ndef.is_none_or(|n| n.is_writable),
            supported_base_technologies: TechnologyKind::BASE_CARRIERS
                .into_iter()
                .filter(|t| info.technologies.contains(t))
                .collect(),
        }
    }
}

/// Why the chain ended without committing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainFailure {
    /// Message larger than the tag's capacity.
    CapacityExceeded {
        /// Message bytes.
        needed: usize,
        /// Tag capacity.
        capacity: usize,
    },
    /// A failure that stops the chain early (probe write rejected for a reason
    /// other than "unsupported", or the tag is read-only).
    Fatal {
        /// Strategy that hit it.
        strategy: Strategy,
        /// Diagnostic text.
        detail: String,
    },
    /// Every strategy failed; `detail` is the last underlying error.
    Exhausted {
        /// Diagnostic text.
        detail: String,
    },
    /// `cancel()` was called.
    Cancelled,
    /// A nested acquisition was attempted.
    SessionBusy,
}

impl From<ChainFailure> for OpError {
    fn from(failure: ChainFailure) -> Self {
        match failure {
            ChainFailure::CapacityExceeded { needed, capacity } => {
                Self::CapacityExceeded { needed, capacity }
            }
            ChainFailure::Fatal { detail, .. } | ChainFailure::Exhausted { detail } => {
                Self::UnableToProvision { detail }
            }
            ChainFailure::Cancelled => Self::Cancelled,
            ChainFailure::SessionBusy => Self::SessionBusy,
        }
    }
}

/// Fallback chain state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainState {
    /// Try generic-NDEF and write directly.
    ProbeFormatted,
    /// Prime the controller over a base carrier.
    EstablishBaseCarrier,
    /// Format-and-write; `negotiated` marks the single retry after
    /// [`ChainState::ArrayNegotiation`].
    AttemptFormat {
        /// Second format attempt.
        negotiated: bool,
    },
    /// Ordered-list acquisition of `[NfcA, NdefFormatable]`.
    ArrayNegotiation,
    /// Last generic-NDEF write.
    FinalNdefRetry,
    /// Terminal success.
    Committed(Strategy),
    /// Terminal failure.
    Failed(ChainFailure),
}

impl ChainState {
    /// Strategy this state executes; `None` for terminal states.
    pub fn strategy(&self) -> Option<Strategy> {
        match self {
            Self::ProbeFormatted => Some(Strategy::ProbeFormatted),
            Self::EstablishBaseCarrier => Some(Strategy::EstablishBaseCarrier),
            Self::AttemptFormat { negotiated: false } => Some(Strategy::AttemptFormat),
            Self::AttemptFormat { negotiated: true } | Self::ArrayNegotiation => {
                Some(Strategy::ArrayNegotiation)
            }
            Self::FinalNdefRetry => Some(Strategy::FinalNdefRetry),
            Self::Committed(_) | Self::Failed(_) => None,
        }
    }

    /// Progress checkpoint reported on entry.
    pub fn checkpoint(&self) -> Option<Checkpoint> {
        match self {
            Self::ProbeFormatted => Some(progress::PROBE),
            Self::EstablishBaseCarrier => Some(progress::BASE_CARRIER),
            Self::AttemptFormat { negotiated: false } => Some(progress::FORMAT),
            Self::ArrayNegotiation => Some(progress::ARRAY_NEGOTIATION),
            Self::AttemptFormat { negotiated: true } => Some(progress::NEGOTIATED_FORMAT),
            Self::FinalNdefRetry => Some(progress::FINAL_RETRY),
            Self::Committed(_) => Some(progress::DONE),
            Self::Failed(_) => None,
        }
    }

    /// `true` for [`ChainState::Committed`] and [`ChainState::Failed`].
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed(_) | Self::Failed(_))
    }
}

/// What one step observed, reduced for [`transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Message committed to the tag.
    Committed,
    /// Preparatory step finished (its own success or failure is irrelevant).
    Proceed,
    /// Technology could not be acquired.
    AcquisitionFailed {
        /// Driver text.
        detail: String,
    },
    /// A command on an acquired technology failed.
    Rejected {
        /// Classified driver failure.
        fault: DriverFault,
        /// Driver text.
        detail: String,
    },
    /// Message does not fit.
    CapacityExceeded {
        /// Message bytes.
        needed: usize,
        /// Tag capacity.
        capacity: usize,
    },
    /// Tag reports NDEF but is locked.
    ReadOnly,
    /// Cancellation observed.
    Cancelled,
    /// Nested acquisition refused.
    SessionBusy,
}

impl StepOutcome {
    fn rejected(err: DriverError) -> Self {
        Self::Rejected {
            fault: classify(&err),
            detail: err.message().to_owned(),
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::AcquisitionFailed { detail } | Self::Rejected { detail, .. } => detail.clone(),
            Self::ReadOnly => READ_ONLY.to_owned(),
            other => format!("{other:?}"),
        }
    }
}

impl From<SessionError> for StepOutcome {
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

const READ_ONLY: &str = "tag is read-only";

/// Pure transition function of the fallback chain.
pub fn transition(state: ChainState, outcome: StepOutcome) -> ChainState {
    use ChainState as S;
    use StepOutcome as O;

    if state.is_terminal() {
        return state;
    }
    match outcome {
        O::Cancelled => return S::Failed(ChainFailure::Cancelled),
        O::SessionBusy => return S::Failed(ChainFailure::SessionBusy),
        O::CapacityExceeded { needed, capacity } => {
            return S::Failed(ChainFailure::CapacityExceeded { needed, capacity })
        }
        _ => {}
    }

    match (state, outcome) {
        (S::ProbeFormatted, O::Committed) => S::Committed(Strategy::ProbeFormatted),
        (S::ProbeFormatted, O::AcquisitionFailed { .. } | O::Proceed) => S::EstablishBaseCarrier,
        (
            S::ProbeFormatted,
            O::Rejected {
                fault: DriverFault::Unsupported,
                ..
            },
        ) => S::EstablishBaseCarrier,
        (S::ProbeFormatted, outcome) => S::Failed(ChainFailure::Fatal {
            strategy: Strategy::ProbeFormatted,
            detail: outcome.detail(),
        }),

        (S::EstablishBaseCarrier, _) => S::AttemptFormat { negotiated: false },

        (S::AttemptFormat { negotiated: false }, O::Committed) => {
            S::Committed(Strategy::AttemptFormat)
        }
        (
            S::AttemptFormat { negotiated: false },
            O::Rejected {
                fault: DriverFault::Unsupported,
                ..
            },
        ) => S::ArrayNegotiation,
        (S::AttemptFormat { negotiated: false }, _) => S::FinalNdefRetry,

        (S::ArrayNegotiation, _) => S::AttemptFormat { negotiated: true },

        (S::AttemptFormat { negotiated: true }, O::Committed) => {
            S::Committed(Strategy::ArrayNegotiation)
        }
        (S::AttemptFormat { negotiated: true }, _) => S::FinalNdefRetry,

        (S::FinalNdefRetry, O::Committed) => S::Committed(Strategy::FinalNdefRetry),
        (S::FinalNdefRetry, outcome) => S::Failed(ChainFailure::Exhausted {
            detail: outcome.detail(),
        }),

        (terminal @ (S::Committed(_) | S::Failed(_)), _) => terminal,
    }
}

/// Result of one pass through the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Committing strategy, or why the chain failed.
    pub outcome: Result<Strategy, ChainFailure>,
    /// Last strategy that ran.
    pub last_strategy: Strategy,
    /// Tag facts gathered on the way.
    pub capability: Option<TagCapability>,
}

/// Drives one tag through [`ChainState`] until a terminal state.
pub struct FallbackChain<'r, 'o, 'a, P: TagPort + ?Sized> {
    controller: &'r SessionController<'a, P>,
    message: &'r NdefMessage,
    reporter: &'r mut ProgressReporter<'o>,
    capability: Option<TagCapability>,
}

impl<'r, 'o, 'a, P: TagPort + ?Sized> FallbackChain<'r, 'o, 'a, P> {
    /// Chain writing `message` through `controller`.
    pub fn new(
        controller: &'r SessionController<'a, P>,
        message: &'r NdefMessage,
        reporter: &'r mut ProgressReporter<'o>,
    ) -> Self {
        Self {
            controller,
            message,
            reporter,
            capability: None,
        }
    }

    /// Run to a terminal state.
    pub fn run(mut self) -> ChainReport {
        let mut state = ChainState::ProbeFormatted;
        let mut last_strategy = Strategy::ProbeFormatted;
        loop {
            if let Some(checkpoint) = state.checkpoint() {
                self.reporter.report(checkpoint);
            }
            match state {
                ChainState::Committed(strategy) => {
                    info!(?strategy, attempt = self.reporter.attempt(), "tag provisioned");
                    return self.report(Ok(strategy), last_strategy);
                }
                ChainState::Failed(failure) => {
                    info!(?failure, attempt = self.reporter.attempt(), "fallback chain failed");
                    return self.report(Err(failure), last_strategy);
                }
                _ => {}
            }
            if let Some(strategy) = state.strategy() {
                last_strategy = strategy;
            }

            let outcome = if self.controller.is_cancelled() {
                StepOutcome::Cancelled
            } else {
                match self.step(&state) {
                    StepOutcome::Committed => StepOutcome::Committed,
                    _ if self.controller.is_cancelled() => StepOutcome::Cancelled,
                    other => other,
                }
            };
            let next = transition(state.clone(), outcome.clone());
            debug!(?state, ?outcome, ?next, "fallback transition");
            state = next;
        }
    }

    fn report(
        self,
        outcome: Result<Strategy, ChainFailure>,
        last_strategy: Strategy,
    ) -> ChainReport {
        ChainReport {
            outcome,
            last_strategy,
            capability: self.capability,
        }
    }

    fn step(&mut self, state: &ChainState) -> StepOutcome {
        match state {
            ChainState::ProbeFormatted | ChainState::FinalNdefRetry => self.write_formatted(),
            ChainState::EstablishBaseCarrier => self.establish_base_carrier(),
            ChainState::AttemptFormat { .. } => self.format_and_write(),
            ChainState::ArrayNegotiation => self.negotiate_array(),
            ChainState::Committed(_) | ChainState::Failed(_) => StepOutcome::Proceed,
        }
    }

    /// Generic-NDEF path: capability check, capacity check, write.
    fn write_formatted(&mut self) -> StepOutcome {
        let message = self.message;
        let mut capability = None;
        let result = self
            .controller
            .with_technology(TechnologyKind::Ndef, |session| {
                let info = session.tag_info().map_err(StepOutcome::rejected)?;
                let cap = TagCapability::from_tag_info(&info);
                debug!(tag = %info.id_hex(), ?cap, "tag reports ndef");
                let writable = cap.is_writable;
                let max = cap.max_payload_bytes;
                capability = Some(cap);
                if !writable {
                    return Err(StepOutcome::ReadOnly);
                }
                check_capacity(message, max)?;
                session.write_ndef(message).map_err(StepOutcome::rejected)
            });
        if capability.is_some() {
            self.capability = capability;
        }
        settle(result)
    }

    /// Wake the tag over the first base carrier that answers.
    fn establish_base_carrier(&mut self) -> StepOutcome {
        for tech in TechnologyKind::BASE_CARRIERS {
            let woke = self
                .controller
                .with_technology(tech, |session| session.tag_info().map_err(StepOutcome::rejected));
            match woke {
                Ok(info) => {
                    debug!(%tech, tag = %info.id_hex(), "base carrier answered");
                    if self.capability.is_none() {
                        self.capability = Some(TagCapability::from_tag_info(&info));
                    }
                    return StepOutcome::Proceed;
                }
                Err(outcome @ (StepOutcome::Cancelled | StepOutcome::SessionBusy)) => {
                    return outcome
                }
                Err(outcome) => debug!(%tech, ?outcome, "base carrier did not answer"),
            }
        }
        debug!("no base carrier answered; formatting anyway");
        StepOutcome::Proceed
    }

    fn format_and_write(&mut self) -> StepOutcome {
        let message = self.message;
        settle(
            self.controller
                .with_technology(TechnologyKind::NdefFormatable, |session| {
                    session.format_ndef(message).map_err(StepOutcome::rejected)
                }),
        )
    }

    fn negotiate_array(&mut self) -> StepOutcome {
        let techs = [TechnologyKind::NfcA, TechnologyKind::NdefFormatable];
        match self
            .controller
            .with_technologies(&techs, |_session| Ok::<(), StepOutcome>(()))
        {
            Ok(()) => StepOutcome::Proceed,
            Err(outcome) => outcome,
        }
    }
}

fn check_capacity(message: &NdefMessage, capacity: Option<usize>) -> Result<(), StepOutcome> {
    match capacity {
        Some(capacity) if message.len() > capacity => Err(StepOutcome::CapacityExceeded {
            needed: message.len(),
            capacity,
        }),
        _ => Ok(()),
    }
}

fn settle(result: Result<(), StepOutcome>) -> StepOutcome {
    match result {
        Ok(()) => StepOutcome::Committed,
        Err(outcome) => outcome,
    }
}
