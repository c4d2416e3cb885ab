//! Async change notification.
//!
//! Bridges the synchronous subscriber list onto a `tokio::sync::watch`
//! channel for consumers that live on a tokio runtime.

use tokio::sync::watch;

use prefsync_core::SettingsState;

use crate::store::SettingsStore;
use crate::subscription::SubscriptionId;

impl SettingsStore {
    /// Receive every published state on a watch channel.
    ///
    /// The channel starts with the current state. Pass the returned id to
    /// [`unsubscribe`](SettingsStore::unsubscribe) to stop publishing.
    pub fn watch(&self) -> (watch::Receiver<SettingsState>, SubscriptionId) {
        let (sender, receiver) = watch::channel(self.state());
        let id = self.subscribe(move |state| {
            sender.send_replace(state.clone());
        });
        (receiver, id)
    }
}
