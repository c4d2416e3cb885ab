//! Durable settings storage.
//!
//! The backing store is a flat string-keyed map shared by every feature and
//! every user on the same profile (browser local storage, a JSON file, NVS
//! flash). [`StorageAdapter`] scopes all access to one namespace,
//! `"{base_path}{delimiter}{key}"`, and turns backing-store failures into
//! logged no-ops.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors reported by a [`BackingStore`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store cannot be reached (disabled, locked, poisoned).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The write would exceed the store's capacity.
    #[error("storage quota exceeded writing {key} ({needed} bytes, {available} available)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    /// A value could not be serialized.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Reading or writing the underlying medium failed.
    #[error("storage I/O failed: {0}")]
    Io(String),
}

/// Flat key/value store holding serialized settings.
///
/// All methods are synchronous; the store is expected to be in-process
/// (local storage, a file, flash).
pub trait BackingStore: Send + Sync {
    /// Read the raw value for a full key.
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write the raw value for a full key.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a full key. Deleting a missing key is not an error.
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    /// List every key in the store.
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory backing store, optionally capped to a byte quota.
#[derive(Debug, Default)]
pub struct MemoryBackingStore {
    data: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total size of keys plus values, like browser local storage.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            data: RwLock::default(),
            quota: Some(quota),
        }
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StorageError {
        StorageError::Unavailable("memory store lock poisoned".to_string())
    }
}

impl BackingStore for MemoryBackingStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        if let Some(quota) = self.quota {
            let used: usize = data
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = key.len() + value.len();
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_string(),
                    needed,
                    available,
                });
            }
        }
        data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        data.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data.keys().cloned().collect())
    }
}

/// Options for building a [`StorageAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterOptions {
    /// Separator between the base path and a key.
    pub delimiter: String,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            delimiter: "/".to_string(),
        }
    }
}

/// Base path for a user's feature namespace: `u:<user_id>{delimiter}<feature>`.
pub fn user_base_path(user_id: u32, delimiter: &str, feature_path: &str) -> String {
    if feature_path.is_empty() {
        format!("u:{user_id}")
    } else {
        format!("u:{user_id}{delimiter}{feature_path}")
    }
}

/// Namespaced view over a shared [`BackingStore`].
///
/// Every operation is best-effort: backing-store failures are logged and
/// swallowed, unreadable values read back as `None`.
#[derive(Clone)]
pub struct StorageAdapter {
    base_path: String,
    delimiter: String,
    backing: Arc<dyn BackingStore>,
}

impl std::fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("base_path", &self.base_path)
            .field("delimiter", &self.delimiter)
            .finish_non_exhaustive()
    }
}

impl StorageAdapter {
    /// Create an adapter with the default `/` delimiter.
    pub fn new(backing: Arc<dyn BackingStore>, base_path: impl Into<String>) -> Self {
        Self::with_options(backing, base_path, AdapterOptions::default())
    }

    pub fn with_options(
        backing: Arc<dyn BackingStore>,
        base_path: impl Into<String>,
        options: AdapterOptions,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            delimiter: options.delimiter,
            backing,
        }
    }

    /// Adapter for one user's feature namespace (`u:<id>/<feature_path>`).
    pub fn for_user(backing: Arc<dyn BackingStore>, user_id: u32, feature_path: &str) -> Self {
        let options = AdapterOptions::default();
        let base_path = user_base_path(user_id, &options.delimiter, feature_path);
        Self::with_options(backing, base_path, options)
    }

    /// Adapter for a nested namespace below this one.
    pub fn child(&self, path: &str) -> Self {
        Self {
            base_path: self.namespaced(path),
            delimiter: self.delimiter.clone(),
            backing: Arc::clone(&self.backing),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn delimiter(&self) -> &str {
        &self.delimiter
    }

    pub fn backing(&self) -> &Arc<dyn BackingStore> {
        &self.backing
    }

    fn prefix(&self) -> String {
        format!("{}{}", self.base_path, self.delimiter)
    }

    fn namespaced(&self, key: &str) -> String {
        format!("{}{}{}", self.base_path, self.delimiter, key)
    }

    /// Read and JSON-decode a value. `None` if absent, unreadable or not
    /// valid JSON for `T`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(
                    key = %self.namespaced(key),
                    error = %e,
                    "Ignoring unparseable stored value"
                );
                None
            }
        }
    }

    /// Read the raw stored string.
    pub fn get_raw(&self, key: &str) -> Option<String> {
        let full_key = self.namespaced(key);
        match self.backing.get_item(&full_key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %full_key, error = %e, "Failed to read setting from storage");
                None
            }
        }
    }

    /// JSON-encode and write a value.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set_raw(key, &raw),
            Err(e) => {
                warn!(key = %self.namespaced(key), error = %e, "Failed to serialize setting");
            }
        }
    }

    /// Write a raw string.
    pub fn set_raw(&self, key: &str, raw: &str) {
        let full_key = self.namespaced(key);
        if let Err(e) = self.backing.set_item(&full_key, raw) {
            warn!(key = %full_key, error = %e, "Failed to persist setting");
        }
    }

    /// Delete one key in this namespace.
    pub fn remove(&self, key: &str) {
        let full_key = self.namespaced(key);
        if let Err(e) = self.backing.remove_item(&full_key) {
            warn!(key = %full_key, error = %e, "Failed to remove setting");
        }
    }

    /// Keys in this namespace, without the namespace prefix.
    ///
    /// Includes keys of nested namespaces (`child/key`).
    pub fn keys(&self) -> Vec<String> {
        let prefix = self.prefix();
        match self.backing.keys() {
            Ok(keys) => keys
                .into_iter()
                .filter_map(|k| k.strip_prefix(&prefix).map(String::from))
                .collect(),
            Err(e) => {
                warn!(base_path = %self.base_path, error = %e, "Failed to list stored settings");
                Vec::new()
            }
        }
    }

    /// Delete every key under `base_path + delimiter`.
    ///
    /// Keys outside the namespace, including ones that merely share a
    /// textual prefix with the base path (`u:1` vs `u:10/...`), are left
    /// alone. Returns the number of keys removed.
    pub fn reset(&self) -> usize {
        let prefix = self.prefix();
        let keys = match self.backing.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(
                    base_path = %self.base_path,
                    error = %e,
                    "Failed to reset settings namespace"
                );
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys.iter().filter(|k| k.starts_with(&prefix)) {
            match self.backing.remove_item(key) {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %key, error = %e, "Failed to remove setting during reset"),
            }
        }
        debug!(base_path = %self.base_path, removed, "Reset settings namespace");
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Backing store that fails every operation.
    struct BrokenStore;

    impl BackingStore for BrokenStore {
        fn get_item(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }

        fn set_item(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }

        fn remove_item(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            Err(StorageError::Unavailable("disabled".to_string()))
        }
    }

    fn shared() -> Arc<dyn BackingStore> {
        Arc::new(MemoryBackingStore::new())
    }

    #[test]
    fn test_set_get_round_trip() {
        let adapter = StorageAdapter::new(shared(), "u:1/x");
        adapter.set("pageSize", &25);
        adapter.set("tags", &vec!["a", "b"]);

        assert_eq!(adapter.get::<i64>("pageSize"), Some(25));
        assert_eq!(
            adapter.get::<Vec<String>>("tags"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(adapter.get_raw("pageSize"), Some("25".to_string()));
    }

    #[test]
    fn test_keys_are_namespaced() {
        let backing = shared();
        let adapter = StorageAdapter::new(Arc::clone(&backing), "u:1/x");
        adapter.set("k", "v");
        assert_eq!(backing.get_item("u:1/x/k").unwrap(), Some("\"v\"".to_string()));
    }

    #[test]
    fn test_namespace_isolation_between_users() {
        let backing = shared();
        StorageAdapter::new(Arc::clone(&backing), "u:1/x").set("k", "v");
        assert_eq!(
            StorageAdapter::new(Arc::clone(&backing), "u:2/x").get::<String>("k"),
            None
        );
    }

    #[test]
    fn test_get_missing_or_malformed_is_none() {
        let backing = shared();
        backing.set_item("u:1/x/bad", "{not json").unwrap();
        let adapter = StorageAdapter::new(backing, "u:1/x");
        assert_eq!(adapter.get::<i64>("missing"), None);
        assert_eq!(adapter.get::<i64>("bad"), None);
        adapter.set("text", "hello");
        assert_eq!(adapter.get::<i64>("text"), None);
    }

    #[test]
    fn test_remove() {
        let adapter = StorageAdapter::new(shared(), "u:1/x");
        adapter.set("k", &1);
        adapter.remove("k");
        assert_eq!(adapter.get::<i64>("k"), None);
        adapter.remove("never-set");
    }

    #[test]
    fn test_reset_is_scoped() {
        let backing = shared();
        let x = StorageAdapter::new(Arc::clone(&backing), "u:1/x");
        let y = StorageAdapter::new(Arc::clone(&backing), "u:1/y");
        let other_user = StorageAdapter::new(Arc::clone(&backing), "u:10/x");
        let lookalike = StorageAdapter::new(Arc::clone(&backing), "u:1/xy");
        x.set("a", &1);
        x.set("b", &2);
        y.set("a", &3);
        other_user.set("a", &4);
        lookalike.set("a", &5);
        backing.set_item("theme", "dark").unwrap();

        assert_eq!(x.reset(), 2);

        assert_eq!(x.keys(), Vec::<String>::new());
        assert_eq!(y.get::<i64>("a"), Some(3));
        assert_eq!(other_user.get::<i64>("a"), Some(4));
        assert_eq!(lookalike.get::<i64>("a"), Some(5));
        assert_eq!(backing.get_item("theme").unwrap(), Some("dark".to_string()));
    }

    #[test]
    fn test_user_root_reset_covers_features() {
        let backing = shared();
        let root = StorageAdapter::for_user(Arc::clone(&backing), 7, "");
        let feature = StorageAdapter::for_user(Arc::clone(&backing), 7, "navigation");
        feature.set("navbarCollapsed", &true);
        assert_eq!(root.base_path(), "u:7");
        assert_eq!(root.keys(), vec!["navigation/navbarCollapsed".to_string()]);
        assert_eq!(root.reset(), 1);
        assert_eq!(feature.get::<bool>("navbarCollapsed"), None);
    }

    #[test]
    fn test_child_namespace() {
        let backing = shared();
        let parent = StorageAdapter::new(Arc::clone(&backing), "u:1");
        let child = parent.child("jupyter-lab");
        assert_eq!(child.base_path(), "u:1/jupyter-lab");
        child.set("slots", &2);
        assert_eq!(parent.keys(), vec!["jupyter-lab/slots".to_string()]);
    }

    #[test]
    fn test_custom_delimiter() {
        let backing = shared();
        let adapter = StorageAdapter::with_options(
            Arc::clone(&backing),
            "u:1:x",
            AdapterOptions {
                delimiter: ":".to_string(),
            },
        );
        adapter.set("k", &1);
        assert_eq!(backing.keys().unwrap(), vec!["u:1:x:k".to_string()]);
    }

    #[test]
    fn test_broken_store_degrades_to_no_op() {
        let adapter = StorageAdapter::new(Arc::new(BrokenStore), "u:1/x");
        adapter.set("k", &1);
        adapter.remove("k");
        assert_eq!(adapter.get::<i64>("k"), None);
        assert_eq!(adapter.keys(), Vec::<String>::new());
        assert_eq!(adapter.reset(), 0);
    }

    #[test]
    fn test_quota_exceeded_is_swallowed() {
        let backing = Arc::new(MemoryBackingStore::with_quota(16));
        let adapter = StorageAdapter::new(backing.clone(), "u:1");
        adapter.set("a", &1);
        assert_eq!(adapter.get::<i64>("a"), Some(1));

        adapter.set("big", "this value is far too long for the quota");
        assert_eq!(adapter.get::<String>("big"), None);
        assert_eq!(backing.len(), 1);

        let err = backing.set_item("u:1/big", "0123456789abcdef").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_quota_counts_overwrite_once() {
        let backing = MemoryBackingStore::with_quota(10);
        backing.set_item("k", "12345678").unwrap();
        backing.set_item("k", "87654321").unwrap();
        assert_eq!(backing.get_item("k").unwrap(), Some("87654321".to_string()));
    }
}
