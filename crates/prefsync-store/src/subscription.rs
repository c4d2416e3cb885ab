//! Subscriber management for settings stores.
//!
//! Each mounted store keeps a list of callbacks that receive the merged
//! state after every change. Callbacks run synchronously on the thread that
//! applied the change, outside any store lock, so a callback may read the
//! store again.

use std::fmt;
use std::sync::Arc;

use prefsync_core::SettingsState;

/// Callback invoked with the new merged state.
pub type SettingsCallback = Arc<dyn Fn(&SettingsState) + Send + Sync>;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Registered callbacks for one store, in subscription order.
#[derive(Default)]
pub struct Subscribers {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, SettingsCallback)>,
}

impl fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscribers")
            .field("next_id", &self.next_id)
            .field("count", &self.callbacks.len())
            .finish()
    }
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn add(&mut self, callback: SettingsCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.callbacks.push((id, callback));
        id
    }

    /// Remove a callback. Returns false if the id was not registered.
    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|(sid, _)| *sid != id);
        self.callbacks.len() != before
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Clone the current callbacks so they can be invoked without holding
    /// the subscriber lock.
    pub fn snapshot(&self) -> Vec<SettingsCallback> {
        self.callbacks.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }
}
