// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine settings and their storage port.
//!
//! Settings are persisted as a JSON blob under [`SETTINGS_KEY`] through a
//! [`SettingsStore`]. Missing fields fall back to defaults, so older blobs keep
//! loading after new fields are added.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::codec::{TemplateError, UrlCodec, DEFAULT_URL_BASE};

/// Store key for [`EngineSettings`].
pub const SETTINGS_KEY: &str = "nfc-engine";

/// Upper bound for the technology switch pause.
pub const MAX_TECH_SWITCH_DELAY_MS: u64 = 1_000;
/// Upper bound for the backoff between the two write attempts.
pub const MAX_RETRY_BACKOFF_MS: u64 = 2_000;

/// Storage port for raw settings blobs (keyed by logical name).
pub trait SettingsStore {
    /// Load a raw blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for settings operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// The configured URL base is unusable.
    #[error("invalid url base: {0}")]
    Template(#[from] TemplateError),
    /// A value is outside its allowed range.
    #[error("invalid setting: {0}")]
    Invalid(String),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Tunables for the provisioning engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Card-link template base shared with the backend resolver.
    pub url_base: String,
    /// Pause between releasing one technology and acquiring the next.
    pub tech_switch_delay_ms: u64,
    /// Pause before the automatic second write attempt.
    pub retry_backoff_ms: u64,
    /// Write latency target; slower writes are logged.
    pub write_budget_ms: u64,
    /// Read latency target; slower reads are logged.
    pub read_budget_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url_base: DEFAULT_URL_BASE.to_owned(),
            tech_switch_delay_ms: 50,
            retry_backoff_ms: 150,
            write_budget_ms: 1_000,
            read_budget_ms: 500,
        }
    }
}

/// Durations derived from [`EngineSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// See [`EngineSettings::tech_switch_delay_ms`].
    pub tech_switch_delay: Duration,
    /// See [`EngineSettings::retry_backoff_ms`].
    pub retry_backoff: Duration,
    /// See [`EngineSettings::write_budget_ms`].
    pub write_budget: Duration,
    /// See [`EngineSettings::read_budget_ms`].
    pub read_budget: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        EngineSettings::default().timing()
    }
}

impl EngineSettings {
    /// Check ranges and the URL base.
    pub fn validate(&self) -> Result<(), ConfigError> {
        UrlCodec::new(&self.url_base)?;
        if self.tech_switch_delay_ms > MAX_TECH_SWITCH_DELAY_MS {
            return Err(ConfigError::Invalid(format!(
                "tech_switch_delay_ms {} exceeds {MAX_TECH_SWITCH_DELAY_MS}",
                self.tech_switch_delay_ms
            )));
        }
        if self.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(ConfigError::Invalid(format!(
                "retry_backoff_ms {} exceeds {MAX_RETRY_BACKOFF_MS}",
                self.retry_backoff_ms
            )));
        }
        Ok(())
    }

    /// Codec for the configured base.
    pub fn codec(&self) -> Result<UrlCodec, TemplateError> {
        UrlCodec::new(&self.url_base)
    }

    /// Durations view.
    pub fn timing(&self) -> Timing {
        Timing {
            tech_switch_delay: Duration::from_millis(self.tech_switch_delay_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            write_budget: Duration::from_millis(self.write_budget_ms),
            read_budget: Duration::from_millis(self.read_budget_ms),
        }
    }
}

/// Thin service that (de)serializes [`EngineSettings`] and delegates storage
/// to a [`SettingsStore`].
pub struct SettingsService<S> {
    store: S,
}

impl<S> SettingsService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> SettingsService<S>
where
    S: SettingsStore,
{
    /// Load and validate settings. Returns `Ok(None)` if nothing is stored.
    pub fn load(&self) -> Result<Option<EngineSettings>, ConfigError> {
        match self.store.load_raw(SETTINGS_KEY) {
            Ok(bytes) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                let settings: EngineSettings = serde_json::from_slice(&bytes)?;
                settings.validate()?;
                Ok(Some(settings))
            }
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Load settings, falling back to defaults when missing or unusable.
    pub fn load_or_default(&self) -> EngineSettings {
        match self.load() {
            Ok(Some(settings)) => settings,
            Ok(None) => EngineSettings::default(),
            Err(err) => {
                warn!(error = %err, "engine settings unusable; using defaults");
                EngineSettings::default()
            }
        }
    }

    /// Validate and persist settings.
    pub fn save(&self, settings: &EngineSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        let data = serde_json::to_vec_pretty(settings)?;
        self.store.save_raw(SETTINGS_KEY, &data)
    }
}
