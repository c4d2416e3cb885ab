//! Declarative settings schema.
//!
//! A [`SettingsConfig`] groups the settings of one UI surface under a
//! storage path. Each [`SettingSpec`] carries its codec, default value and a
//! [`Persistence`] descriptor that decides which tiers the value reaches.
//!
//! Configs are validated on construction, whether built in code or loaded
//! from JSON:
//!
//! ```json
//! {
//!   "storagePath": "model-registry",
//!   "settings": [
//!     { "key": "tableLimit", "type": { "kind": "integer" }, "defaultValue": 10,
//!       "storageKey": "tableLimit" },
//!     { "key": "name", "type": { "kind": "string", "optional": true },
//!       "defaultValue": null }
//!   ]
//! }
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use thiserror::Error;

use crate::codec::{Codec, CodecError, SettingValue};
use crate::state::SettingsState;

/// Errors raised while building or loading a settings schema.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("duplicate setting key: {0}")]
    DuplicateKey(String),

    #[error("duplicate storage key: {0}")]
    DuplicateStorageKey(String),

    #[error("invalid setting key: {0:?}")]
    InvalidKey(String),

    #[error("invalid storage path: {0:?}")]
    InvalidStoragePath(String),

    #[error("default value for {key} does not match its codec: {source}")]
    DefaultMismatch {
        key: String,
        #[source]
        source: CodecError,
    },

    #[error("invalid schema document: {0}")]
    Schema(#[from] serde_json::Error),
}

fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("valid key regex"))
}

fn storage_path_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.:\-]+(/[A-Za-z0-9_.:\-]+)*$").expect("valid path regex")
    })
}

/// Check that a name is usable as a query parameter and storage key.
pub fn is_valid_key(key: &str) -> bool {
    key_pattern().is_match(key)
}

/// Check that a storage path is a non-empty, `/`-separated list of segments.
pub fn is_valid_storage_path(path: &str) -> bool {
    storage_path_pattern().is_match(path)
}

/// Which tiers a setting is written to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Persistence {
    /// Query string only, never stored.
    UrlOnly,
    /// Query string and durable storage.
    UrlAndStorage { storage_key: String },
    /// Durable storage only, never reflected in the URL.
    StorageOnly { storage_key: String },
    /// In-memory only.
    Ephemeral,
}

impl Persistence {
    /// Build from the loose `storageKey` / `skipUrlEncoding` flag pair.
    pub fn from_flags(storage_key: Option<String>, skip_url_encoding: bool) -> Self {
        match (storage_key, skip_url_encoding) {
            (None, false) => Persistence::UrlOnly,
            (Some(storage_key), false) => Persistence::UrlAndStorage { storage_key },
            (Some(storage_key), true) => Persistence::StorageOnly { storage_key },
            (None, true) => Persistence::Ephemeral,
        }
    }

    pub fn storage_key(&self) -> Option<&str> {
        match self {
            Persistence::UrlAndStorage { storage_key }
            | Persistence::StorageOnly { storage_key } => Some(storage_key),
            Persistence::UrlOnly | Persistence::Ephemeral => None,
        }
    }

    pub fn in_url(&self) -> bool {
        matches!(self, Persistence::UrlOnly | Persistence::UrlAndStorage { .. })
    }

    pub fn skip_url_encoding(&self) -> bool {
        !self.in_url()
    }
}

/// One named setting.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingSpec {
    key: String,
    codec: Codec,
    default_value: SettingValue,
    persistence: Persistence,
}

impl SettingSpec {
    /// A URL-only setting. Use [`storage_key`](Self::storage_key) and
    /// [`skip_url_encoding`](Self::skip_url_encoding) to change its tiers.
    pub fn new(
        key: impl Into<String>,
        codec: Codec,
        default_value: impl Into<SettingValue>,
    ) -> Self {
        Self {
            key: key.into(),
            codec,
            default_value: default_value.into(),
            persistence: Persistence::UrlOnly,
        }
    }

    /// Persist the value in durable storage under `storage_key`.
    pub fn storage_key(mut self, storage_key: impl Into<String>) -> Self {
        let storage_key = storage_key.into();
        let skip_url_encoding = self.persistence.skip_url_encoding();
        self.persistence = Persistence::from_flags(Some(storage_key), skip_url_encoding);
        self
    }

    /// Keep the value out of the query string.
    pub fn skip_url_encoding(mut self) -> Self {
        let storage_key = self.persistence.storage_key().map(String::from);
        self.persistence = Persistence::from_flags(storage_key, true);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn default_value(&self) -> &SettingValue {
        &self.default_value
    }

    pub fn persistence(&self) -> &Persistence {
        &self.persistence
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if !is_valid_key(&self.key) {
            return Err(ConfigError::InvalidKey(self.key.clone()));
        }
        if let Some(storage_key) = self.persistence.storage_key() {
            if !is_valid_key(storage_key) {
                return Err(ConfigError::InvalidKey(storage_key.to_string()));
            }
        }
        let default = std::mem::take(&mut self.default_value);
        self.default_value =
            self.codec
                .coerce(default)
                .map_err(|source| ConfigError::DefaultMismatch {
                    key: self.key.clone(),
                    source,
                })?;
        Ok(())
    }
}

/// A validated group of settings sharing one storage path.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsConfig {
    storage_path: String,
    settings: Vec<SettingSpec>,
    index: HashMap<String, usize>,
}

impl SettingsConfig {
    /// Build and validate a schema. Declaration order is kept and decides
    /// the order of parameters in the query string.
    pub fn new(
        storage_path: impl Into<String>,
        settings: Vec<SettingSpec>,
    ) -> Result<Self, ConfigError> {
        let storage_path = storage_path.into();
        if !is_valid_storage_path(&storage_path) {
            return Err(ConfigError::InvalidStoragePath(storage_path));
        }

        let mut settings = settings;
        let mut index = HashMap::with_capacity(settings.len());
        let mut storage_keys = HashSet::new();

        for (i, spec) in settings.iter_mut().enumerate() {
            spec.validate()?;
            if index.insert(spec.key.clone(), i).is_some() {
                return Err(ConfigError::DuplicateKey(spec.key.clone()));
            }
            if let Some(storage_key) = spec.persistence.storage_key() {
                if !storage_keys.insert(storage_key.to_string()) {
                    return Err(ConfigError::DuplicateStorageKey(storage_key.to_string()));
                }
            }
        }

        Ok(Self {
            storage_path,
            settings,
            index,
        })
    }

    /// Load a schema from its JSON document form.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let doc: SettingsConfigDoc = serde_json::from_str(json)?;
        doc.try_into()
    }

    /// Load several schemas from a JSON array of documents.
    pub fn list_from_json(json: &str) -> Result<Vec<Self>, ConfigError> {
        let docs: Vec<SettingsConfigDoc> = serde_json::from_str(json)?;
        docs.into_iter().map(Self::try_from).collect()
    }

    /// Export the schema as its JSON document form.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(SettingsConfigDoc::from(self)).unwrap_or(serde_json::Value::Null)
    }

    pub fn storage_path(&self) -> &str {
        &self.storage_path
    }

    pub fn settings(&self) -> &[SettingSpec] {
        &self.settings
    }

    pub fn get(&self, key: &str) -> Option<&SettingSpec> {
        self.index.get(key).map(|&i| &self.settings[i])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Keys of settings that appear in the query string.
    pub fn url_keys(&self) -> impl Iterator<Item = &str> {
        self.settings
            .iter()
            .filter(|s| s.persistence.in_url())
            .map(|s| s.key.as_str())
    }

    /// Storage keys claimed by this schema.
    pub fn storage_keys(&self) -> impl Iterator<Item = &str> {
        self.settings.iter().filter_map(|s| s.persistence.storage_key())
    }

    /// State holding every setting's default value.
    pub fn defaults(&self) -> SettingsState {
        self.settings
            .iter()
            .map(|s| (s.key.clone(), s.default_value.clone()))
            .collect()
    }
}

/// Serialized form of one [`SettingSpec`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingSpecDoc {
    key: String,
    #[serde(rename = "type")]
    codec: Codec,
    #[serde(default)]
    default_value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    storage_key: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    skip_url_encoding: bool,
}

/// Serialized form of a [`SettingsConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsConfigDoc {
    storage_path: String,
    settings: Vec<SettingSpecDoc>,
}

impl TryFrom<SettingsConfigDoc> for SettingsConfig {
    type Error = ConfigError;

    fn try_from(doc: SettingsConfigDoc) -> Result<Self, Self::Error> {
        let settings = doc
            .settings
            .into_iter()
            .map(|s| {
                let default_value = s.codec.value_from_json(&s.default_value).map_err(|source| {
                    ConfigError::DefaultMismatch {
                        key: s.key.clone(),
                        source,
                    }
                })?;
                Ok(SettingSpec {
                    key: s.key,
                    codec: s.codec,
                    default_value,
                    persistence: Persistence::from_flags(s.storage_key, s.skip_url_encoding),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        SettingsConfig::new(doc.storage_path, settings)
    }
}

impl From<&SettingsConfig> for SettingsConfigDoc {
    fn from(config: &SettingsConfig) -> Self {
        Self {
            storage_path: config.storage_path.clone(),
            settings: config
                .settings
                .iter()
                .map(|s| SettingSpecDoc {
                    key: s.key.clone(),
                    codec: s.codec,
                    default_value: s.default_value.to_json(),
                    storage_key: s.persistence.storage_key().map(String::from),
                    skip_url_encoding: s.persistence.skip_url_encoding(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table_config() -> SettingsConfig {
        SettingsConfig::new(
            "experiment-list",
            vec![
                SettingSpec::new("searchText", Codec::string(), ""),
                SettingSpec::new("pageSize", Codec::integer(), 10i64).storage_key("pageSize"),
                SettingSpec::new("token", Codec::string().optional(), SettingValue::Unset)
                    .storage_key("token")
                    .skip_url_encoding(),
                SettingSpec::new("expanded", Codec::boolean(), false).skip_url_encoding(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_persistence_flags() {
        let config = table_config();
        assert_eq!(config.get("searchText").unwrap().persistence(), &Persistence::UrlOnly);
        assert_eq!(
            config.get("pageSize").unwrap().persistence(),
            &Persistence::UrlAndStorage {
                storage_key: "pageSize".to_string()
            }
        );
        assert_eq!(
            config.get("token").unwrap().persistence(),
            &Persistence::StorageOnly {
                storage_key: "token".to_string()
            }
        );
        assert_eq!(config.get("expanded").unwrap().persistence(), &Persistence::Ephemeral);
    }

    #[test]
    fn test_skip_then_storage_key_order_does_not_matter() {
        let a = SettingSpec::new("k", Codec::integer(), 1i64)
            .skip_url_encoding()
            .storage_key("k");
        let b = SettingSpec::new("k", Codec::integer(), 1i64)
            .storage_key("k")
            .skip_url_encoding();
        assert_eq!(a, b);
    }

    #[test]
    fn test_url_and_storage_keys() {
        let config = table_config();
        assert_eq!(config.url_keys().collect::<Vec<_>>(), vec!["searchText", "pageSize"]);
        assert_eq!(config.storage_keys().collect::<Vec<_>>(), vec!["pageSize", "token"]);
    }

    #[test]
    fn test_defaults() {
        let defaults = table_config().defaults();
        assert_eq!(defaults.get("pageSize"), Some(&SettingValue::from(10i64)));
        assert_eq!(defaults.get("token"), Some(&SettingValue::Unset));
        assert_eq!(defaults.len(), 4);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let err = SettingsConfig::new(
            "x",
            vec![
                SettingSpec::new("a", Codec::integer(), 0i64),
                SettingSpec::new("a", Codec::string(), ""),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateKey(k) if k == "a"));
    }

    #[test]
    fn test_duplicate_storage_key_rejected() {
        let err = SettingsConfig::new(
            "x",
            vec![
                SettingSpec::new("a", Codec::integer(), 0i64).storage_key("shared"),
                SettingSpec::new("b", Codec::integer(), 0i64).storage_key("shared"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStorageKey(k) if k == "shared"));
    }

    #[test]
    fn test_default_mismatch_rejected() {
        let err = SettingsConfig::new(
            "x",
            vec![SettingSpec::new("a", Codec::integer(), "ten")],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DefaultMismatch { key, .. } if key == "a"));

        let err = SettingsConfig::new(
            "x",
            vec![SettingSpec::new("a", Codec::integer(), SettingValue::Unset)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DefaultMismatch {
                source: CodecError::NotOptional,
                ..
            }
        ));
    }

    #[test]
    fn test_float_default_widened() {
        let config = SettingsConfig::new(
            "x",
            vec![SettingSpec::new("lr", Codec::float(), 1i64)],
        )
        .unwrap();
        assert_eq!(config.get("lr").unwrap().default_value(), &SettingValue::from(1.0));
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(matches!(
            SettingsConfig::new("", vec![]),
            Err(ConfigError::InvalidStoragePath(_))
        ));
        assert!(matches!(
            SettingsConfig::new("a//b", vec![]),
            Err(ConfigError::InvalidStoragePath(_))
        ));
        assert!(matches!(
            SettingsConfig::new("x", vec![SettingSpec::new("has space", Codec::string(), "")]),
            Err(ConfigError::InvalidKey(_))
        ));
        assert!(is_valid_storage_path("selected-file-42"));
        assert!(is_valid_storage_path("workspace/7/model-registry"));
    }

    #[test]
    fn test_from_json() {
        let config = SettingsConfig::from_json(
            r#"{
                "storagePath": "jupyter-lab",
                "settings": [
                    { "key": "name", "type": { "kind": "string", "optional": true },
                      "storageKey": "name", "skipUrlEncoding": true },
                    { "key": "slots", "type": { "kind": "integer" }, "defaultValue": 1,
                      "storageKey": "slots", "skipUrlEncoding": true },
                    { "key": "tags", "type": { "kind": "string", "isArray": true },
                      "defaultValue": [] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.storage_path(), "jupyter-lab");
        let names: Vec<&str> = config.settings().iter().map(SettingSpec::key).collect();
        assert_eq!(names, vec!["name", "slots", "tags"]);
        assert_eq!(config.get("name").unwrap().default_value(), &SettingValue::Unset);
        assert_eq!(config.get("slots").unwrap().default_value(), &SettingValue::from(1i64));
        assert_eq!(
            config.get("tags").unwrap().default_value(),
            &SettingValue::List(vec![])
        );
    }

    #[test]
    fn test_from_json_bad_default() {
        let err = SettingsConfig::from_json(
            r#"{ "storagePath": "x",
                 "settings": [
                     { "key": "n", "type": { "kind": "integer" }, "defaultValue": "1" }
                 ] }"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DefaultMismatch { .. }));

        assert!(matches!(
            SettingsConfig::from_json("{ not json"),
            Err(ConfigError::Schema(_))
        ));
    }

    #[test]
    fn test_json_export_reloads_to_same_config() {
        let config = table_config();
        let reloaded = SettingsConfig::from_json(&config.to_json().to_string()).unwrap();
        assert_eq!(reloaded, config);
    }
}
