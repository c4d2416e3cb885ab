//! # prefsync-core
//!
//! Building blocks for persisted UI settings.
//!
//! This crate provides:
//! - Codecs translating typed setting values to URL and storage strings
//! - The declarative settings schema (`SettingsConfig`, `SettingSpec`)
//! - Query string editing that leaves unrelated parameters alone
//! - Namespaced, best-effort access to a shared key/value store
//!
//! This crate is intentionally runtime-agnostic and contains no async code
//! and no file I/O, so it can sit under a browser, desktop or CLI front-end.

pub mod codec;
pub mod config;
pub mod query;
pub mod state;
pub mod storage;

pub use codec::{Codec, CodecError, FromSettingValue, Scalar, ScalarKind, SettingValue};
pub use config::{ConfigError, Persistence, SettingSpec, SettingsConfig};
pub use query::QueryParams;
pub use state::{SettingsPatch, SettingsState};
pub use storage::{
    user_base_path, AdapterOptions, BackingStore, MemoryBackingStore, StorageAdapter, StorageError,
};
