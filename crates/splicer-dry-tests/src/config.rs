// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use splicer_config::{ConfigError, ConfigStore};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-memory [`ConfigStore`] whose clones share state.
///
/// # Example
///
/// ```
/// use splicer_dry_tests::InMemoryConfigStore;
/// use splicer_config::{ConcretizerConfig, ConfigService, CONCRETIZER_KEY};
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
/// service.save(CONCRETIZER_KEY, &ConcretizerConfig::default()).unwrap();
/// assert_eq!(store.save_count(), 1);
/// assert!(store.contains_key(CONCRETIZER_KEY));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
}

impl InMemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `json` under `key`.
    pub fn with_json(key: &str, json: &str) -> Self {
        let store = Self::new();
        store.lock().data.insert(key.to_string(), json.as_bytes().to_vec());
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Makes every subsequent load fail with [`ConfigError::Other`].
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Number of `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` calls.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Returns `true` if `key` holds a blob.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }
}

impl ConfigStore for InMemoryConfigStore {
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
        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}
