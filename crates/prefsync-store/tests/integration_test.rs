//! Integration tests for mounted settings stores.
//!
//! These tests drive the registry the way a front-end would: mount a
//! config against a shared backing store and an in-memory history, then
//! navigate, update and reload.

use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use prefsync_core::{BackingStore, Codec, MemoryBackingStore, SettingSpec, SettingsConfig};
use prefsync_store::{
    Location, MemoryLocation, RegistryOptions, SettingsPatch, SettingsRegistry, StoreStatus, Tier,
};

/// The table-filter config used throughout.
fn table_filter() -> SettingsConfig {
    SettingsConfig::new(
        "experiment-list",
        vec![
            SettingSpec::new("searchText", Codec::string(), ""),
            SettingSpec::new("pageSize", Codec::integer(), 10i64).storage_key("pageSize"),
        ],
    )
    .unwrap()
}

struct Browser {
    backing: Arc<MemoryBackingStore>,
    location: Arc<MemoryLocation>,
}

impl Browser {
    fn new(query: &str) -> Self {
        Self {
            backing: Arc::new(MemoryBackingStore::new()),
            location: Arc::new(MemoryLocation::new(query)),
        }
    }

    /// A fresh page load for `user_id` sharing this browser's storage.
    fn registry(&self, user_id: u32) -> SettingsRegistry {
        SettingsRegistry::new(
            self.backing.clone(),
            self.location.clone(),
            RegistryOptions::new(user_id),
        )
    }
}

#[test]
fn test_table_filter_scenario() {
    let browser = Browser::new("");
    let registry = browser.registry(1);
    let store = registry.mount(table_filter()).unwrap();

    let state = store.state();
    assert_eq!(state.get_as::<String>("searchText"), Some(String::new()));
    assert_eq!(state.get_as::<i64>("pageSize"), Some(10));

    store.update(
        SettingsPatch::new()
            .set("searchText", "loss")
            .set("pageSize", 25i64),
    );
    assert_eq!(browser.location.query(), "searchText=loss&pageSize=25");
    assert_eq!(
        browser.backing.get_item("u:1/experiment-list/pageSize").unwrap(),
        Some("25".to_string())
    );
    assert_eq!(
        browser.backing.get_item("u:1/experiment-list/searchText").unwrap(),
        None
    );

    // Same URL, cleared storage: the URL wins.
    browser.backing.remove_item("u:1/experiment-list/pageSize").unwrap();
    let reloaded = browser.registry(1).mount(table_filter()).unwrap();
    let state = reloaded.state();
    assert_eq!(state.get_as::<String>("searchText"), Some("loss".to_string()));
    assert_eq!(state.get_as::<i64>("pageSize"), Some(25));

    // Restore the stored value, then navigate to a bare URL: storage wins
    // over the default for the persisted key.
    browser
        .backing
        .set_item("u:1/experiment-list/pageSize", "25")
        .unwrap();
    browser.location.navigate("");
    let reloaded = browser.registry(1).mount(table_filter()).unwrap();
    let state = reloaded.state();
    assert_eq!(state.get_as::<String>("searchText"), Some(String::new()));
    assert_eq!(state.get_as::<i64>("pageSize"), Some(25));
    assert_eq!(reloaded.source_of("pageSize"), Some(Tier::Storage));
}

#[test]
fn test_precedence_across_tiers() {
    let browser = Browser::new("pageSize=50");
    browser
        .backing
        .set_item("u:1/experiment-list/pageSize", "25")
        .unwrap();
    let registry = browser.registry(1);
    let store = registry.mount(table_filter()).unwrap();
    assert_eq!(store.status(), StoreStatus::Uninitialized);

    assert_eq!(store.get_as::<i64>("pageSize"), Some(50));

    browser.location.navigate("");
    store.reload();
    assert_eq!(store.get_as::<i64>("pageSize"), Some(25));

    browser.backing.remove_item("u:1/experiment-list/pageSize").unwrap();
    store.reload();
    assert_eq!(store.get_as::<i64>("pageSize"), Some(10));
}

#[test]
fn test_users_do_not_see_each_other() {
    let browser = Browser::new("");
    let alice = browser.registry(1).mount(table_filter()).unwrap();
    alice.update(SettingsPatch::new().set("pageSize", 50i64));
    alice.clear_query_settings();

    let bob = browser.registry(2).mount(table_filter()).unwrap();
    assert_eq!(bob.get_as::<i64>("pageSize"), Some(10));
}

#[test]
fn test_reset_user_leaves_other_users() {
    let browser = Browser::new("");
    let one = browser.registry(1);
    one.mount(table_filter())
        .unwrap()
        .update(SettingsPatch::new().set("pageSize", 20i64));
    let ten = browser.registry(10);
    ten.mount(table_filter())
        .unwrap()
        .update(SettingsPatch::new().set("pageSize", 30i64));

    one.reset_user();

    assert_eq!(
        browser.backing.get_item("u:1/experiment-list/pageSize").unwrap(),
        None
    );
    assert_eq!(
        browser.backing.get_item("u:10/experiment-list/pageSize").unwrap(),
        Some("30".to_string())
    );
}

#[test]
fn test_array_setting_empty_round_trip() {
    let browser = Browser::new("");
    let config = SettingsConfig::new(
        "model-registry",
        vec![SettingSpec::new("tags", Codec::string().array(), Vec::<String>::new())
            .storage_key("tags")],
    )
    .unwrap();
    let registry = browser.registry(1);
    let store = registry.mount(config.clone()).unwrap();

    store.update(SettingsPatch::new().set("tags", vec!["prod"]));
    store.update(SettingsPatch::new().set("tags", Vec::<String>::new()));
    assert_eq!(browser.location.query(), "");

    let reloaded = browser.registry(1).mount(config).unwrap();
    assert_eq!(reloaded.get_as::<Vec<String>>("tags"), Some(vec![]));
}

#[test]
fn test_clear_query_settings_keeps_foreign_params() {
    let browser = Browser::new("utm_source=newsletter&searchText=loss&pageSize=25");
    let registry = browser.registry(1);
    let store = registry.mount(table_filter()).unwrap();
    assert_eq!(store.active_settings(None).len(), 2);

    store.clear_query_settings();
    assert_eq!(browser.location.query(), "utm_source=newsletter");
}

#[test]
fn test_two_configs_share_one_url() {
    let browser = Browser::new("");
    let registry = browser.registry(1);
    let table = registry.mount(table_filter()).unwrap();
    let chart = registry
        .mount(
            SettingsConfig::new(
                "experiment-chart",
                vec![SettingSpec::new("smoothing", Codec::float(), 0.0)],
            )
            .unwrap(),
        )
        .unwrap();

    table.update(SettingsPatch::new().set("searchText", "loss"));
    chart.update(SettingsPatch::new().set("smoothing", 0.6));
    assert_eq!(browser.location.query(), "searchText=loss&smoothing=0.6");

    chart.clear_query_settings();
    assert_eq!(browser.location.query(), "searchText=loss");
}

#[test]
fn test_consumers_of_one_config_observe_same_state() {
    let browser = Browser::new("");
    let registry = browser.registry(1);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    let first = registry
        .subscribe(table_filter(), move |state| {
            sink.lock().unwrap().push(state.get_as::<i64>("pageSize"));
        })
        .unwrap();
    let second = registry.subscribe(table_filter(), |_| {}).unwrap();

    second.update(SettingsPatch::new().set("pageSize", 40i64));
    assert_eq!(first.get_as::<i64>("pageSize"), Some(40));
    assert_eq!(*seen.lock().unwrap(), vec![Some(40)]);
}

#[test]
fn test_default_in_url_survives_unrelated_update() {
    let browser = Browser::new("pageSize=10");
    browser
        .backing
        .set_item("u:1/experiment-list/pageSize", "25")
        .unwrap();
    let store = browser.registry(1).mount(table_filter()).unwrap();
    assert_eq!(store.get_as::<i64>("pageSize"), Some(10));

    store.update(SettingsPatch::new().set("searchText", "loss"));

    let reloaded = browser.registry(1).mount(table_filter()).unwrap();
    assert_eq!(reloaded.state(), store.state());
    assert_eq!(reloaded.get_as::<i64>("pageSize"), Some(10));
}

#[test]
fn test_reset_user_drops_url_state() {
    let browser = Browser::new("utm_source=newsletter");
    let registry = browser.registry(1);
    let store = registry.mount(table_filter()).unwrap();
    store.update(
        SettingsPatch::new()
            .set("searchText", "loss")
            .set("pageSize", 25i64),
    );

    registry.reset_user();

    assert_eq!(browser.location.query(), "utm_source=newsletter");
    assert_eq!(store.get_as::<String>("searchText"), Some(String::new()));
    assert_eq!(store.get_as::<i64>("pageSize"), Some(10));
    assert_eq!(store.active_settings(None), Vec::<String>::new());
}
