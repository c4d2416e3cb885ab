//! # prefsync-store
//!
//! Reactive settings stores that keep three tiers in step:
//! the URL query string, durable per-user storage and in-memory state.
//! Reads resolve URL > storage > default, writes go to all three.
//!
//! Enable features based on the front-end:
//! - `tokio-runtime` - `SettingsStore::watch` over a tokio watch channel

pub mod location;
pub mod registry;
pub mod store;
pub mod subscription;
#[cfg(feature = "tokio-runtime")]
pub mod watch;

pub use location::{Location, MemoryLocation};
pub use registry::{RegistryError, RegistryOptions, SettingsHandle, SettingsRegistry};
pub use store::{SettingsStore, StoreStatus, Tier, UpdateMode};
pub use subscription::{SettingsCallback, Subscribers, SubscriptionId};

pub use prefsync_core::{
    Codec, MemoryBackingStore, SettingSpec, SettingValue, SettingsConfig, SettingsPatch,
    SettingsState, StorageAdapter,
};
