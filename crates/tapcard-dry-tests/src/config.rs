// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory settings store fake for testing without filesystem I/O.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tapcard_core::config::{ConfigError, SettingsStore};

/// In-memory implementation of [`SettingsStore`] for testing.
///
/// Clones share state and call counters.
///
/// # Example
///
/// ```
/// use tapcard_dry_tests::InMemorySettingsStore;
/// use tapcard_core::config::{EngineSettings, SettingsService};
///
/// let store = InMemorySettingsStore::new();
/// let service = SettingsService::new(store.clone());
///
/// service.save(&EngineSettings::default()).unwrap();
/// assert_eq!(store.load_count(), 0);
/// assert_eq!(store.save_count(), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemorySettingsStore {
    inner: Arc<Mutex<InMemorySettingsStoreInner>>,
}

#[derive(Default)]
struct InMemorySettingsStoreInner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemorySettingsStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `data` under `key`.
    pub fn with_blob(key: &str, data: impl Into<Vec<u8>>) -> Self {
        let store = Self::new();
        store.lock().data.insert(key.to_owned(), data.into());
        store
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Configure the store to fail on save operations.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` calls, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` calls, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Raw blob stored under `key`.
    pub fn blob(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().data.get(key).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, InMemorySettingsStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;

        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }

        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;

        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }

        inner.data.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tapcard_core::config::{EngineSettings, SettingsService, SETTINGS_KEY};

    #[test]
    fn round_trip_save_load() {
        let store = InMemorySettingsStore::new();
        store.save_raw("test", b"hello").unwrap();
        assert_eq!(store.load_raw("test").unwrap(), b"hello");
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn load_missing_key_returns_not_found() {
        let store = InMemorySettingsStore::new();
        assert!(matches!(store.load_raw("missing"), Err(ConfigError::NotFound)));
    }

    #[test]
    fn fail_flags_still_count_and_do_not_store() {
        let store = InMemorySettingsStore::new();
        store.set_fail_on_save(true);
        assert!(matches!(store.save_raw("k", b"v"), Err(ConfigError::Other(_))));
        assert_eq!(store.save_count(), 1);
        assert_eq!(store.blob("k"), None);

        store.set_fail_on_load(true);
        assert!(matches!(store.load_raw("k"), Err(ConfigError::Other(_))));
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn seeded_blob_loads_through_the_settings_service() {
        let store = InMemorySettingsStore::with_blob(SETTINGS_KEY, r#"{ "retry_backoff_ms": 40 }"#);
        let service = SettingsService::new(store.clone());

        let settings = service.load().unwrap().unwrap();

        assert_eq!(settings.retry_backoff_ms, 40);
        assert_eq!(settings.url_base, EngineSettings::default().url_base);
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn clone_shares_state_between_instances() {
        let a = InMemorySettingsStore::new();
        let b = a.clone();
        a.save_raw("shared", b"value").unwrap();
        assert_eq!(b.load_raw("shared").unwrap(), b"value");
        assert_eq!(b.save_count(), 1);
    }
}
