//! JSON-file backing store.
//!
//! The whole store is one flat `{ "full/key": "raw value" }` object. It is
//! read once on open and rewritten after every mutation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use prefsync_core::{BackingStore, StorageError};

#[derive(Debug)]
pub struct FileBackingStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, String>>,
}

impl FileBackingStore {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let data = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| StorageError::Io(e.to_string()))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, data: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, content).map_err(|e| StorageError::Io(e.to_string()))
    }
}

impl BackingStore for FileBackingStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(key.to_string(), value.to_string());
        self.save(&data)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        if data.remove(key).is_some() {
            self.save(&data)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect())
    }
}
