// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted, instrumented fake NFC hardware.
//!
//! [`FakeTagPort`] simulates one tag in the field ([`FakeTag`]) and records
//! every driver call. Failures are scripted per call kind as FIFO queues of
//! driver messages; when a queue is empty the fake behaves like the simulated
//! tag would. Clones share state, so a test keeps one clone for assertions
//! while the engine owns another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tapcard_core::ndef::NdefMessage;
use tapcard_core::port::{DriverError, NdefInfo, TagHandle, TagInfo, TagPort, TechnologyKind};

/// Capacity a blank tag reports once formatted.
pub const DEFAULT_FORMATTED_CAPACITY: usize = 137;

/// Driver wording for a tag that refuses an NDEF command.
pub const UNSUPPORTED: &str = "Unsupported tag api";
/// Driver wording for a tag that left the field.
pub const TAG_LOST: &str = "android.nfc.TagLostException: Tag was lost.";

/// The simulated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeTag {
    /// Hardware identifier.
    pub id: Vec<u8>,
    /// Technologies the tag lets the driver acquire.
    pub technologies: Vec<TechnologyKind>,
    /// NDEF state; `Some` once formatted.
    pub ndef: Option<NdefInfo>,
    /// Capacity reported after a successful format.
    pub formatted_capacity: usize,
    /// Stored message.
    pub stored: Option<NdefMessage>,
}

impl FakeTag {
    /// Factory-fresh tag: NFC-A plus formattable-NDEF.
    pub fn blank() -> Self {
        Self {
            id: vec![0x04, 0xa2, 0x2c, 0x11],
            technologies: vec![TechnologyKind::NfcA, TechnologyKind::NdefFormatable],
            ndef: None,
            formatted_capacity: DEFAULT_FORMATTED_CAPACITY,
            stored: None,
        }
    }

    /// Writable NDEF tag with `capacity` bytes.
    pub fn formatted(capacity: usize) -> Self {
        Self {
            technologies: vec![TechnologyKind::NfcA, TechnologyKind::Ndef],
            ndef: Some(NdefInfo {
                max_size: capacity,
                is_writable: true,
            }),
            formatted_capacity: capacity,
            ..Self::blank()
        }
    }

    /// Locked NDEF tag.
    pub fn read_only(capacity: usize) -> Self {
        let mut tag = Self::formatted(capacity);
        tag.ndef = Some(NdefInfo {
            max_size: capacity,
            is_writable: false,
        });
        tag
    }

    /// Same tag holding `message`.
    #[must_use]
    pub fn with_message(mut self, message: NdefMessage) -> Self {
        self.stored = Some(message);
        self
    }

    /// Same tag advertising `tech` as well.
    #[must_use]
    pub fn with_technology(mut self, tech: TechnologyKind) -> Self {
        if !self.technologies.contains(&tech) {
            self.technologies.push(tech);
        }
        self
    }

    fn info(&self) -> TagInfo {
        TagInfo {
            id: self.id.clone(),
            technologies: self.technologies.clone(),
            ndef: self.ndef,
        }
    }
}

/// Driver call kinds that can carry scripted failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    /// `request_technology`, keyed by the first requested technology.
    Acquire(TechnologyKind),
    /// `tag_info`.
    TagInfo,
    /// `write_ndef`.
    Write,
    /// `format_ndef`.
    Format,
    /// `read_ndef`.
    Read,
    /// `release`.
    Release,
}

/// Where the fake parks the calling thread until `cancel_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Inside `request_technology` for this technology.
    Acquire(TechnologyKind),
    /// Inside `write_ndef`.
    Write,
}

/// Call counters and the request log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// Successful acquisitions.
    pub acquires: usize,
    /// Releases of live handles.
    pub releases: usize,
    /// Releases of unknown or already-released handles.
    pub bad_releases: usize,
    /// Acquisitions granted while another handle was live.
    pub overlaps: usize,
    /// Most handles live at once.
    pub max_live: usize,
    /// `write_ndef` calls.
    pub writes: usize,
    /// `format_ndef` calls.
    pub formats: usize,
    /// `read_ndef` calls.
    pub reads: usize,
    /// `cancel_request` calls.
    pub cancel_requests: usize,
    /// `start` calls.
    pub starts: usize,
    /// Every `request_technology` argument, in order.
    pub requests: Vec<Vec<TechnologyKind>>,
}

impl Counters {
    /// Requests whose technology list is exactly `techs`.
    pub fn requests_of(&self, techs: &[TechnologyKind]) -> usize {
        self.requests.iter().filter(|r| r.as_slice() == techs).count()
    }
}

#[derive(Debug)]
struct Inner {
    tag: Option<FakeTag>,
    supported: bool,
    enabled: bool,
    start_error: Option<String>,
    script: HashMap<Call, VecDeque<String>>,
    gate: Option<Gate>,
    parked: bool,
    wake: bool,
    live: HashSet<u64>,
    next_handle: u64,
    counters: Counters,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            tag: None,
            supported: true,
            enabled: true,
            start_error: None,
            script: HashMap::new(),
            gate: None,
            parked: false,
            wake: false,
            live: HashSet::new(),
            next_handle: 1,
            counters: Counters::default(),
        }
    }
}

impl Inner {
    fn scripted(&mut self, call: Call) -> Result<(), DriverError> {
        match self.script.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(message) => Err(DriverError::new(message)),
            None => Ok(()),
        }
    }

    fn check_live(&self, handle: &TagHandle) -> Result<(), DriverError> {
        if self.live.contains(&handle.id()) {
            Ok(())
        } else {
            Err(DriverError::new("technology handle is not connected"))
        }
    }

    fn tag(&mut self) -> Result<&mut FakeTag, DriverError> {
        self.tag.as_mut().ok_or_else(|| DriverError::new(TAG_LOST))
    }
}

#[derive(Debug, Default)]
struct Shared {
    inner: Mutex<Inner>,
    parked: Condvar,
}

/// In-memory [`TagPort`] for tests.
///
/// # Example
///
/// ```
/// use tapcard_dry_tests::{FakeTag, FakeTagPort};
/// use tapcard_core::port::{TagPort, TechnologyKind};
///
/// let port = FakeTagPort::with_tag(FakeTag::formatted(137));
/// let handle = port.request_technology(&[TechnologyKind::Ndef]).unwrap();
/// port.release(handle).unwrap();
/// assert_eq!(port.counters().acquires, 1);
/// assert_eq!(port.counters().releases, 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FakeTagPort {
    shared: Arc<Shared>,
}

impl FakeTagPort {
    /// Adapter with no tag in the field.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter with `tag` in the field.
    pub fn with_tag(tag: FakeTag) -> Self {
        let port = Self::new();
        port.present(tag);
        port
    }

    /// Put `tag` in the field (replacing any previous one).
    pub fn present(&self, tag: FakeTag) {
        self.lock().tag = Some(tag);
    }

    /// Take the tag out of the field.
    pub fn remove_tag(&self) {
        self.lock().tag = None;
    }

    /// Snapshot of the simulated tag.
    pub fn tag(&self) -> Option<FakeTag> {
        self.lock().tag.clone()
    }

    /// Message currently stored on the tag.
    pub fn stored_message(&self) -> Option<NdefMessage> {
        self.lock().tag.as_ref().and_then(|t| t.stored.clone())
    }

    /// Simulate a device with or without NFC hardware.
    pub fn set_supported(&self, supported: bool) {
        self.lock().supported = supported;
    }

    /// Simulate NFC switched on or off.
    pub fn set_enabled(&self, enabled: bool) {
        self.lock().enabled = enabled;
    }

    /// Make `start` fail with `message`.
    pub fn fail_start(&self, message: impl Into<String>) {
        self.lock().start_error = Some(message.into());
    }

    /// Queue failures for `call`; each one is consumed by one call.
    pub fn script<I, S>(&self, call: Call, messages: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .script
            .entry(call)
            .or_default()
            .extend(messages.into_iter().map(Into::into));
    }

    /// Park the next call at `gate` until `cancel_request` is called.
    pub fn park_at(&self, gate: Gate) {
        self.lock().gate = Some(gate);
    }

    /// Block until a call is parked at the configured gate.
    pub fn wait_until_parked(&self) {
        let mut inner = self.lock();
        while !inner.parked {
            inner = self
                .shared
                .parked
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Snapshot of the counters.
    pub fn counters(&self) -> Counters {
        self.lock().counters.clone()
    }

    /// Handles currently live.
    pub fn live_handles(&self) -> usize {
        self.lock().live.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Park at `gate` if configured. Returns the guard and whether the call
    /// was woken by `cancel_request`.
    fn maybe_park<'g>(
        &'g self,
        mut inner: MutexGuard<'g, Inner>,
        gate: Gate,
    ) -> (MutexGuard<'g, Inner>, bool) {
        if inner.gate != Some(gate) {
            return (inner, false);
        }
        inner.gate = None;
        inner.parked = true;
        inner.wake = false;
        self.shared.parked.notify_all();
        while !inner.wake {
            inner = self
                .shared
                .parked
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
        inner.parked = false;
        inner.wake = false;
        (inner, true)
    }
}

impl TagPort for FakeTagPort {
    fn is_supported(&self) -> bool {
        self.lock().supported
    }

    fn is_enabled(&self) -> bool {
        let inner = self.lock();
        inner.supported && inner.enabled
    }

    fn start(&self) -> Result<(), DriverError> {
        let mut inner = self.lock();
        inner.counters.starts += 1;
        match &inner.start_error {
            Some(message) => Err(DriverError::new(message.clone())),
            None => Ok(()),
        }
    }

    fn request_technology(
        &self,
        technologies: &[TechnologyKind],
    ) -> Result<TagHandle, DriverError> {
        let mut inner = self.lock();
        inner.counters.requests.push(technologies.to_vec());
        let Some(&first) = technologies.first() else {
            return Err(DriverError::new("no technology requested"));
        };
        let (mut inner, woken) = self.maybe_park(inner, Gate::Acquire(first));
        if woken {
            return Err(DriverError::new("UserCancel: request cancelled"));
        }
        inner.scripted(Call::Acquire(first))?;
        let tag = inner.tag()?;
        if !technologies.iter().any(|t| tag.technologies.contains(t)) {
            return Err(DriverError::new(format!(
                "Tag does not support {}",
                technologies
                    .iter()
                    .copied()
                    .map(TechnologyKind::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        if !inner.live.is_empty() {
            inner.counters.overlaps += 1;
        }
        let id = inner.next_handle;
        inner.next_handle += 1;
        inner.live.insert(id);
        inner.counters.acquires += 1;
        inner.counters.max_live = inner.counters.max_live.max(inner.live.len());
        Ok(TagHandle::new(id, technologies.to_vec()))
    }

    fn release(&self, handle: TagHandle) -> Result<(), DriverError> {
        let mut inner = self.lock();
        if inner.live.remove(&handle.id()) {
            inner.counters.releases += 1;
        } else {
            inner.counters.bad_releases += 1;
        }
        inner.scripted(Call::Release)
    }

    fn cancel_request(&self) -> Result<(), DriverError> {
        let mut inner = self.lock();
        inner.counters.cancel_requests += 1;
        if inner.parked {
            inner.wake = true;
            self.shared.parked.notify_all();
        }
        Ok(())
    }

    fn tag_info(&self, handle: &TagHandle) -> Result<TagInfo, DriverError> {
        let mut inner = self.lock();
        inner.check_live(handle)?;
        inner.scripted(Call::TagInfo)?;
        Ok(inner.tag()?.info())
    }

    fn write_ndef(&self, handle: &TagHandle, message: &NdefMessage) -> Result<(), DriverError> {
        let mut inner = self.lock();
        inner.check_live(handle)?;
        inner.counters.writes += 1;
        let (mut inner, woken) = self.maybe_park(inner, Gate::Write);
        if woken {
            return Err(DriverError::new("write cancelled"));
        }
        inner.scripted(Call::Write)?;
        let tag = inner.tag()?;
        let Some(ndef) = tag.ndef else {
            return Err(DriverError::new(UNSUPPORTED));
        };
        if !ndef.is_writable {
            return Err(DriverError::new("Tag is read-only"));
        }
        if message.len() > ndef.max_size {
            return Err(DriverError::new("Tag capacity exceeded"));
        }
        tag.stored = Some(message.clone());
        Ok(())
    }

    fn format_ndef(&self, handle: &TagHandle, message: &NdefMessage) -> Result<(), DriverError> {
        let mut inner = self.lock();
        inner.check_live(handle)?;
        inner.counters.formats += 1;
        inner.scripted(Call::Format)?;
        let tag = inner.tag()?;
        if message.len() > tag.formatted_capacity {
            return Err(DriverError::new("Tag capacity exceeded"));
        }
        tag.ndef = Some(NdefInfo {
            max_size: tag.formatted_capacity,
            is_writable: true,
        });
        tag.technologies.retain(|t| *t != TechnologyKind::NdefFormatable);
        if !tag.technologies.contains(&TechnologyKind::Ndef) {
            tag.technologies.push(TechnologyKind::Ndef);
        }
        tag.stored = Some(message.clone());
        Ok(())
    }

    fn read_ndef(&self, handle: &TagHandle) -> Result<Option<NdefMessage>, DriverError> {
        let mut inner = self.lock();
        inner.check_live(handle)?;
        inner.counters.reads += 1;
        inner.scripted(Call::Read)?;
        Ok(inner.tag()?.stored.clone())
    }
}
