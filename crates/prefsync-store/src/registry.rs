//! Mounted settings stores.
//!
//! The registry owns one [`SettingsStore`] per storage path. Every consumer
//! mounting the same config shares that store, so all of them observe the
//! same state. Mounting checks that a new config cannot write into another
//! config's storage namespace.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use prefsync_core::{
    user_base_path, AdapterOptions, BackingStore, SettingsConfig, SettingsState, StorageAdapter,
};

use crate::location::Location;
use crate::store::SettingsStore;
use crate::subscription::SubscriptionId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("storage path '{storage_path}' collides with mounted path '{mounted}'")]
    NamespaceCollision {
        storage_path: String,
        mounted: String,
    },
}

/// Who the settings belong to and how storage keys are joined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryOptions {
    pub user_id: u32,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

fn default_delimiter() -> String {
    AdapterOptions::default().delimiter
}

impl RegistryOptions {
    pub fn new(user_id: u32) -> Self {
        Self {
            user_id,
            delimiter: default_delimiter(),
        }
    }
}

/// A subscription to a mounted store. Unsubscribes when dropped.
pub struct SettingsHandle {
    store: Arc<SettingsStore>,
    id: SubscriptionId,
}

impl SettingsHandle {
    pub fn store(&self) -> &Arc<SettingsStore> {
        &self.store
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Deref for SettingsHandle {
    type Target = SettingsStore;

    fn deref(&self) -> &SettingsStore {
        &self.store
    }
}

impl Drop for SettingsHandle {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for SettingsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsHandle")
            .field("storage_path", &self.store.storage_path())
            .field("id", &self.id)
            .finish()
    }
}

pub struct SettingsRegistry {
    options: RegistryOptions,
    root: StorageAdapter,
    location: Arc<dyn Location>,
    stores: RwLock<BTreeMap<String, Arc<SettingsStore>>>,
}

impl std::fmt::Debug for SettingsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsRegistry")
            .field("options", &self.options)
            .field("mounted", &self.mounted())
            .finish_non_exhaustive()
    }
}

impl SettingsRegistry {
    pub fn new(
        backing: Arc<dyn BackingStore>,
        location: Arc<dyn Location>,
        options: RegistryOptions,
    ) -> Self {
        let adapter_options = AdapterOptions {
            delimiter: options.delimiter.clone(),
        };
        let root = StorageAdapter::with_options(
            backing,
            user_base_path(options.user_id, &options.delimiter, ""),
            adapter_options,
        );
        Self {
            options,
            root,
            location,
            stores: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn user_id(&self) -> u32 {
        self.options.user_id
    }

    pub fn location(&self) -> &Arc<dyn Location> {
        &self.location
    }

    /// Adapter over the whole user namespace (`u:<id>`).
    pub fn user_adapter(&self) -> &StorageAdapter {
        &self.root
    }

    /// True if one namespace contains the other.
    fn overlaps(&self, a: &str, b: &str) -> bool {
        let delimiter = &self.options.delimiter;
        a == b
            || a.starts_with(&format!("{b}{delimiter}"))
            || b.starts_with(&format!("{a}{delimiter}"))
    }

    /// Mount `config`, or return the store already mounted for its path.
    ///
    /// Fails if the path is mounted with a different schema, or if it is
    /// nested inside (or contains) another mounted path.
    pub fn mount(&self, config: SettingsConfig) -> Result<Arc<SettingsStore>, RegistryError> {
        let mut stores = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        let storage_path = config.storage_path().to_string();

        if let Some(store) = stores.get(&storage_path) {
            if store.config().as_ref() == &config {
                return Ok(Arc::clone(store));
            }
            return Err(RegistryError::NamespaceCollision {
                storage_path: storage_path.clone(),
                mounted: storage_path,
            });
        }

        if let Some(mounted) = stores.keys().find(|p| self.overlaps(p, &storage_path)) {
            return Err(RegistryError::NamespaceCollision {
                storage_path,
                mounted: mounted.clone(),
            });
        }

        let adapter = self.root.child(&storage_path);
        let store = Arc::new(SettingsStore::new(config, adapter, Arc::clone(&self.location)));
        info!(%storage_path, user_id = self.options.user_id, "Mounted settings");
        stores.insert(storage_path, Arc::clone(&store));
        Ok(store)
    }

    /// Mount `config` and subscribe to it in one step.
    pub fn subscribe<F>(
        &self,
        config: SettingsConfig,
        callback: F,
    ) -> Result<SettingsHandle, RegistryError>
    where
        F: Fn(&SettingsState) + Send + Sync + 'static,
    {
        let store = self.mount(config)?;
        let id = store.subscribe(callback);
        Ok(SettingsHandle { store, id })
    }

    pub fn get(&self, storage_path: &str) -> Option<Arc<SettingsStore>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(storage_path)
            .cloned()
    }

    /// Forget a mounted store. Existing handles keep working on their own copy.
    pub fn unmount(&self, storage_path: &str) -> bool {
        let removed = self
            .stores
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(storage_path)
            .is_some();
        if removed {
            debug!(%storage_path, "Unmounted settings");
        }
        removed
    }

    /// Mounted storage paths, sorted.
    pub fn mounted(&self) -> Vec<String> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn all_stores(&self) -> Vec<Arc<SettingsStore>> {
        self.stores
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Re-read every mounted store.
    pub fn reload_all(&self) {
        for store in self.all_stores() {
            store.reload();
        }
    }

    /// Return every setting of the current user to its default.
    ///
    /// Mounted stores drop their query parameters, the user's storage
    /// namespace is cleared and every mounted store is reloaded. Returns
    /// the number of stored keys removed.
    pub fn reset_user(&self) -> usize {
        let stores = self.all_stores();
        for store in &stores {
            store.clear_query_settings();
        }
        let removed = self.root.reset();
        info!(user_id = self.options.user_id, removed, "Reset user settings");
        for store in &stores {
            store.reload();
        }
        removed
    }
}
