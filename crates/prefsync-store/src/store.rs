//! Settings store.
//!
//! A [`SettingsStore`] owns the canonical in-memory copy of one mounted
//! [`SettingsConfig`] and keeps it in step with the other two tiers:
//!
//! - Reads reconcile lazily, per key: URL, then durable storage, then the
//!   schema default. A malformed value in one tier falls through to the next
//!   and never affects other keys.
//! - Writes merge a patch, persist the changed keys that carry a storage
//!   key, rewrite the owned query parameters and notify subscribers.
//!
//! Nothing here returns an error to the caller. Bad input is logged and
//! skipped, storage failures are absorbed by the [`StorageAdapter`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use prefsync_core::{
    FromSettingValue, QueryParams, SettingSpec, SettingValue, SettingsConfig, SettingsPatch,
    SettingsState, StorageAdapter,
};

use crate::location::Location;
use crate::subscription::{SettingsCallback, Subscribers, SubscriptionId};

/// Lifecycle of a mounted store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    /// Created, nothing read yet.
    Uninitialized,
    /// Reading the URL and storage tiers.
    Reconciling,
    /// State published; every write keeps it here.
    Ready,
}

/// Where a setting's current value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Url,
    Storage,
    Default,
    /// Written through the store since the last reconciliation.
    Memory,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Url => "url",
            Tier::Storage => "storage",
            Tier::Default => "default",
            Tier::Memory => "memory",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a write is reflected in browser history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    /// Rewrite the current history entry.
    #[default]
    Replace,
    /// Add a new history entry.
    Push,
}

#[derive(Debug)]
struct Inner {
    status: StoreStatus,
    state: SettingsState,
    sources: BTreeMap<String, Tier>,
}

/// Reactive, tier-synchronised settings for one config.
pub struct SettingsStore {
    config: Arc<SettingsConfig>,
    adapter: StorageAdapter,
    location: Arc<dyn Location>,
    inner: Mutex<Inner>,
    subscribers: Mutex<Subscribers>,
}

impl fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsStore")
            .field("storage_path", &self.config.storage_path())
            .field("adapter", &self.adapter)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SettingsStore {
    /// Create an uninitialized store. Nothing is read until first access.
    pub fn new(
        config: impl Into<Arc<SettingsConfig>>,
        adapter: StorageAdapter,
        location: Arc<dyn Location>,
    ) -> Self {
        Self {
            config: config.into(),
            adapter,
            location,
            inner: Mutex::new(Inner {
                status: StoreStatus::Uninitialized,
                state: SettingsState::new(),
                sources: BTreeMap::new(),
            }),
            subscribers: Mutex::new(Subscribers::new()),
        }
    }

    pub fn config(&self) -> &Arc<SettingsConfig> {
        &self.config
    }

    pub fn storage_path(&self) -> &str {
        self.config.storage_path()
    }

    pub fn adapter(&self) -> &StorageAdapter {
        &self.adapter
    }

    pub fn status(&self) -> StoreStatus {
        self.lock_inner().status
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the state, reconciling first if it has never been read.
    fn ready(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.lock_inner();
        if inner.status != StoreStatus::Ready {
            self.reconcile_into(&mut inner);
        }
        inner
    }

    fn reconcile_into(&self, inner: &mut Inner) {
        inner.status = StoreStatus::Reconciling;

        let params = QueryParams::parse(&self.location.query());
        let mut state = SettingsState::new();
        let mut sources = BTreeMap::new();
        for spec in self.config.settings() {
            let (value, tier) = self.read_setting(spec, &params);
            state.insert(spec.key(), value);
            sources.insert(spec.key().to_string(), tier);
        }

        inner.state = state;
        inner.sources = sources;
        inner.status = StoreStatus::Ready;
        debug!(storage_path = %self.storage_path(), "Settings reconciled");
    }

    /// Resolve one setting: URL > storage > default.
    fn read_setting(&self, spec: &SettingSpec, params: &QueryParams) -> (SettingValue, Tier) {
        let persistence = spec.persistence();
        let codec = spec.codec();

        if persistence.in_url() {
            let raw = params.get_all(spec.key());
            if let Some(value) = codec.decode_params(&raw) {
                return (value, Tier::Url);
            }
            if !raw.is_empty() {
                debug!(key = spec.key(), ?raw, "Ignoring malformed query value");
            }
        }

        if let Some(storage_key) = persistence.storage_key() {
            if let Some(stored) = self.adapter.get::<serde_json::Value>(storage_key) {
                match codec.decode_stored(&stored) {
                    Some(value) => return (value, Tier::Storage),
                    None => debug!(key = spec.key(), %stored, "Ignoring malformed stored value"),
                }
            }
        }

        (spec.default_value().clone(), Tier::Default)
    }

    /// Current merged state, reconciling on first access.
    pub fn state(&self) -> SettingsState {
        self.ready().state.clone()
    }

    /// Current value of one setting.
    pub fn get(&self, key: &str) -> Option<SettingValue> {
        self.ready().state.get(key).cloned()
    }

    /// Typed value of one setting.
    pub fn get_as<T: FromSettingValue>(&self, key: &str) -> Option<T> {
        self.ready().state.get_as(key)
    }

    /// Tier the current value of `key` came from.
    pub fn source_of(&self, key: &str) -> Option<Tier> {
        self.ready().sources.get(key).copied()
    }

    /// Apply a partial update, replacing the current history entry.
    pub fn update(&self, patch: SettingsPatch) -> SettingsState {
        self.update_with(patch, UpdateMode::Replace)
    }

    /// Apply a partial update.
    ///
    /// Entries for undeclared keys, or with values that do not fit the
    /// setting's codec, are skipped with a warning. Only keys whose value
    /// actually changed are written to storage. Subscribers are notified
    /// with the merged state even if nothing changed.
    pub fn update_with(&self, patch: SettingsPatch, mode: UpdateMode) -> SettingsState {
        let mut inner = self.ready();
        let mut changed: Vec<&SettingSpec> = Vec::new();

        for (key, value) in patch {
            let Some(spec) = self.config.get(&key) else {
                warn!(
                    storage_path = %self.storage_path(),
                    %key,
                    "Ignoring update for undeclared setting"
                );
                continue;
            };
            let value = match spec.codec().coerce(value) {
                Ok(value) => value,
                Err(e) => {
                    warn!(
                        storage_path = %self.storage_path(),
                        %key,
                        error = %e,
                        "Ignoring update with mismatched type"
                    );
                    continue;
                }
            };
            if inner.state.get(&key) == Some(&value) {
                continue;
            }
            inner.state.insert(key.clone(), value);
            inner.sources.insert(key, Tier::Memory);
            if !changed.iter().any(|s| s.key() == spec.key()) {
                changed.push(spec);
            }
        }

        for spec in &changed {
            if let Some(value) = inner.state.get(spec.key()) {
                self.persist(spec, value);
            }
        }
        self.write_query(&inner.state, mode);

        let snapshot = inner.state.clone();
        drop(inner);
        self.notify(&snapshot);
        snapshot
    }

    fn persist(&self, spec: &SettingSpec, value: &SettingValue) {
        let Some(storage_key) = spec.persistence().storage_key() else {
            return;
        };
        match value {
            SettingValue::Unset => self.adapter.remove(storage_key),
            value => self.adapter.set(storage_key, value),
        }
    }

    /// True if dropping `value` from the URL would let a different stored
    /// value win the next reconciliation.
    fn shadowed_by_storage(&self, spec: &SettingSpec, value: &SettingValue) -> bool {
        let Some(storage_key) = spec.persistence().storage_key() else {
            return false;
        };
        self.adapter
            .get::<serde_json::Value>(storage_key)
            .and_then(|stored| spec.codec().decode_stored(&stored))
            .is_some_and(|stored| &stored != value)
    }

    /// Rewrite this config's query parameters from `state`.
    ///
    /// Settings at their default value are dropped from the URL unless a
    /// different stored value would then take over. Parameters owned by
    /// anything else are kept as they are.
    fn write_query(&self, state: &SettingsState, mode: UpdateMode) {
        let current = QueryParams::parse(&self.location.query());
        let mut params = current.clone();

        for spec in self.config.settings().iter().filter(|s| s.persistence().in_url()) {
            let value = state.get(spec.key()).unwrap_or(spec.default_value());
            if value == spec.default_value() && !self.shadowed_by_storage(spec, value) {
                params.remove(spec.key());
            } else {
                params.set_all(spec.key(), spec.codec().encode(value));
            }
        }

        if params == current {
            return;
        }
        let query = params.to_query_string();
        debug!(storage_path = %self.storage_path(), %query, ?mode, "Rewriting query string");
        match mode {
            UpdateMode::Replace => self.location.replace_query(&query),
            UpdateMode::Push => self.location.push_query(&query),
        }
    }

    /// Remove this config's parameters from the query string.
    ///
    /// Storage and in-memory state are untouched, and so are parameters
    /// owned by other configs or by the router.
    pub fn clear_query_settings(&self) {
        let mut params = QueryParams::parse(&self.location.query());
        let mut removed = false;
        for key in self.config.url_keys() {
            removed |= params.remove(key);
        }
        if removed {
            debug!(storage_path = %self.storage_path(), "Clearing settings from query string");
            self.location.replace_query(&params.to_query_string());
        }
    }

    fn select(&self, keys: Option<&[&str]>) -> Vec<&SettingSpec> {
        match keys {
            None => self.config.settings().iter().collect(),
            Some(keys) => keys
                .iter()
                .filter_map(|key| {
                    let spec = self.config.get(key);
                    if spec.is_none() {
                        warn!(storage_path = %self.storage_path(), %key, "Unknown setting");
                    }
                    spec
                })
                .collect(),
        }
    }

    /// Restore settings to their defaults.
    ///
    /// `None` resets every setting. Stored values are removed, the query
    /// string is rewritten and subscribers are notified.
    pub fn reset_settings(&self, keys: Option<&[&str]>) -> SettingsState {
        let mut inner = self.ready();

        for spec in self.select(keys) {
            inner.state.insert(spec.key(), spec.default_value().clone());
            inner.sources.insert(spec.key().to_string(), Tier::Default);
            if let Some(storage_key) = spec.persistence().storage_key() {
                self.adapter.remove(storage_key);
            }
        }
        self.write_query(&inner.state, UpdateMode::Replace);

        let snapshot = inner.state.clone();
        drop(inner);
        self.notify(&snapshot);
        snapshot
    }

    /// Keys whose current value differs from the default, in declaration
    /// order. `None` considers every setting.
    pub fn active_settings(&self, keys: Option<&[&str]>) -> Vec<String> {
        let inner = self.ready();
        self.select(keys)
            .into_iter()
            .filter(|spec| inner.state.get(spec.key()) != Some(spec.default_value()))
            .map(|spec| spec.key().to_string())
            .collect()
    }

    /// Re-read the URL and storage tiers and notify subscribers.
    pub fn reload(&self) -> SettingsState {
        let mut inner = self.lock_inner();
        self.reconcile_into(&mut inner);
        let snapshot = inner.state.clone();
        drop(inner);
        self.notify(&snapshot);
        snapshot
    }

    /// Register a callback for state changes.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SettingsState) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(callback))
    }

    pub fn subscribe_arc(&self, callback: SettingsCallback) -> SubscriptionId {
        self.lock_subscribers().add(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock_subscribers().remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn notify(&self, state: &SettingsState) {
        let callbacks = self.lock_subscribers().snapshot();
        for callback in callbacks {
            callback(state);
        }
    }
}
