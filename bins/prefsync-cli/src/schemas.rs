//! Settings schemas known to the CLI.
//!
//! Without `--schema` the CLI works against a few demo schemas modelled on
//! real pages: the navigation sidebar, the JupyterLab launcher form and a
//! model registry table.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use prefsync_core::{Codec, SettingSpec, SettingValue, SettingsConfig};

const DEFAULT_SLOT_COUNT: i64 = 1;

pub fn navigation() -> Result<SettingsConfig> {
    Ok(SettingsConfig::new(
        "navigation",
        vec![SettingSpec::new("navbarCollapsed", Codec::boolean(), false)
            .storage_key("navbarCollapsed")
            .skip_url_encoding()],
    )?)
}

pub fn jupyter_lab() -> Result<SettingsConfig> {
    let launcher_field = |key: &str, codec: Codec, default: SettingValue| {
        SettingSpec::new(key, codec.optional(), default)
            .storage_key(key)
            .skip_url_encoding()
    };
    Ok(SettingsConfig::new(
        "jupyter-lab",
        vec![
            launcher_field("name", Codec::string(), "".into()),
            launcher_field("pool", Codec::string(), "".into()),
            launcher_field("slots", Codec::integer(), DEFAULT_SLOT_COUNT.into()),
            launcher_field("template", Codec::string(), SettingValue::Unset),
            launcher_field("workspaceId", Codec::integer(), SettingValue::Unset),
        ],
    )?)
}

pub fn model_registry() -> Result<SettingsConfig> {
    Ok(SettingsConfig::new(
        "model-registry",
        vec![
            SettingSpec::new(
                "columns",
                Codec::string().array(),
                vec!["name", "description", "versions", "lastUpdatedTime", "tags"],
            )
            .storage_key("columns"),
            SettingSpec::new("sortKey", Codec::string(), "name").storage_key("sortKey"),
            SettingSpec::new("sortDesc", Codec::boolean(), false).storage_key("sortDesc"),
            SettingSpec::new("tableLimit", Codec::integer(), 20i64).storage_key("tableLimit"),
            SettingSpec::new("tableOffset", Codec::integer(), 0i64),
            SettingSpec::new("name", Codec::string().optional(), SettingValue::Unset),
            SettingSpec::new("tags", Codec::string().array(), Vec::<String>::new()),
            SettingSpec::new("archived", Codec::boolean().optional(), SettingValue::Unset),
        ],
    )?)
}

pub fn builtin() -> Result<Vec<SettingsConfig>> {
    Ok(vec![navigation()?, jupyter_lab()?, model_registry()?])
}

/// Load schemas from a JSON array of config documents.
pub fn load(path: &Path) -> Result<Vec<SettingsConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file {}", path.display()))?;
    SettingsConfig::list_from_json(&content)
        .with_context(|| format!("Invalid schema file {}", path.display()))
}
