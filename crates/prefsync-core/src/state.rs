//! Settings state and partial updates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::codec::{FromSettingValue, SettingValue};

/// Current decoded value of every setting in one config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsState {
    values: BTreeMap<String, SettingValue>,
}

impl SettingsState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Typed lookup; `None` if the key is missing or holds another type.
    pub fn get_as<T: FromSettingValue>(&self, key: &str) -> Option<T> {
        self.values.get(key).and_then(T::from_setting_value)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: SettingValue) -> Option<SettingValue> {
        self.values.insert(key.into(), value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl FromIterator<(String, SettingValue)> for SettingsState {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// An ordered set of setting changes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SettingsPatch {
    entries: Vec<(String, SettingValue)>,
}

impl SettingsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a change. A later entry for the same key wins.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for SettingsPatch {
    type Item = (String, SettingValue);
    type IntoIter = std::vec::IntoIter<(String, SettingValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K: Into<String>, V: Into<SettingValue>> FromIterator<(K, V)> for SettingsPatch {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_typed_get() {
        let mut state = SettingsState::new();
        state.insert("pageSize", 25i64.into());
        state.insert("columns", vec!["name", "state"].into());

        assert_eq!(state.get_as::<i64>("pageSize"), Some(25));
        assert_eq!(state.get_as::<String>("pageSize"), None);
        assert_eq!(
            state.get_as::<Vec<String>>("columns"),
            Some(vec!["name".to_string(), "state".to_string()])
        );
        assert_eq!(state.get_as::<i64>("missing"), None);
    }

    #[test]
    fn test_state_json() {
        let state: SettingsState = vec![
            ("a".to_string(), SettingValue::from(1i64)),
            ("b".to_string(), SettingValue::Unset),
        ]
        .into_iter()
        .collect();
        assert_eq!(state.to_json(), serde_json::json!({ "a": 1, "b": null }));
    }

    #[test]
    fn test_patch_keeps_order() {
        let patch = SettingsPatch::new().set("b", 1i64).set("a", "x");
        let keys: Vec<&str> = patch.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
    }
}
