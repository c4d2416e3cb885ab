//! Command-line front-end for persisted UI settings.
//!
//! Mounts settings schemas against a JSON-file backing store and a single
//! query string, the same way a browser page would, so stored preferences
//! can be inspected and edited from a terminal.

mod file_store;
mod schemas;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prefsync_core::{BackingStore, ScalarKind, SettingValue, SettingsConfig, SettingsPatch};
use prefsync_store::{
    Location, MemoryLocation, RegistryOptions, SettingsRegistry, SettingsStore, UpdateMode,
};

use crate::file_store::FileBackingStore;

#[derive(Parser, Debug)]
#[command(name = "prefsync", version, about = "Inspect and edit persisted UI settings")]
struct Cli {
    /// JSON file holding the backing store
    #[arg(long, env = "PREFSYNC_STORE", default_value = "prefsync.json")]
    store: PathBuf,

    /// User whose settings namespace to use
    #[arg(long, env = "PREFSYNC_USER", default_value_t = 1)]
    user: u32,

    /// Current URL query string
    #[arg(long, default_value = "")]
    query: String,

    /// Schema file (JSON array of settings configs). Defaults to the built-in demo schemas
    #[arg(long)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the reconciled settings of one config
    Show {
        storage_path: String,
    },
    /// Update settings with key=value pairs
    Set {
        storage_path: String,

        /// Assignments such as pageSize=25 or columns=name,state
        #[arg(required = true)]
        assignments: Vec<String>,

        /// Add a history entry instead of replacing the current one
        #[arg(long)]
        push: bool,
    },
    /// Reset one config to defaults, or the whole user namespace
    Reset {
        storage_path: Option<String>,
    },
    /// List raw keys in the backing store
    Keys,
    /// List the available schemas
    Schemas,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn,prefsync_store=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let configs = match &cli.schema {
        Some(path) => schemas::load(path)?,
        None => schemas::builtin()?,
    };

    let backing = Arc::new(
        FileBackingStore::open(&cli.store)
            .with_context(|| format!("Failed to open store {}", cli.store.display()))?,
    );
    let location = Arc::new(MemoryLocation::new(&cli.query));
    let registry = SettingsRegistry::new(
        backing.clone(),
        location.clone(),
        RegistryOptions::new(cli.user),
    );

    match cli.command {
        Commands::Show { storage_path } => {
            let store = mount(&registry, &configs, &storage_path)?;
            print_json(&describe(&store, location.as_ref()))?;
        }
        Commands::Set {
            storage_path,
            assignments,
            push,
        } => {
            let store = mount(&registry, &configs, &storage_path)?;
            let patch = parse_assignments(store.config(), &assignments)?;
            let mode = if push { UpdateMode::Push } else { UpdateMode::Replace };
            store.update_with(patch, mode);
            print_json(&describe(&store, location.as_ref()))?;
        }
        Commands::Reset { storage_path } => match storage_path {
            Some(storage_path) => {
                let store = mount(&registry, &configs, &storage_path)?;
                store.reset_settings(None);
                print_json(&describe(&store, location.as_ref()))?;
            }
            None => {
                let removed = registry.reset_user();
                println!("Removed {removed} stored setting(s) for user {}", cli.user);
            }
        },
        Commands::Keys => {
            for key in backing.keys()? {
                println!("{key}");
            }
        }
        Commands::Schemas => {
            let docs: Vec<_> = configs.iter().map(SettingsConfig::to_json).collect();
            print_json(&json!(docs))?;
        }
    }

    Ok(())
}

fn mount(
    registry: &SettingsRegistry,
    configs: &[SettingsConfig],
    storage_path: &str,
) -> Result<Arc<SettingsStore>> {
    let config = configs
        .iter()
        .find(|c| c.storage_path() == storage_path)
        .cloned()
        .ok_or_else(|| anyhow!("No schema for storage path '{storage_path}'"))?;
    Ok(registry.mount(config)?)
}

/// Parse `key=value` pairs against the config's codecs.
///
/// Array values are comma separated. An empty value clears an optional
/// setting, empties an array or sets a string to `""`.
fn parse_assignments(config: &SettingsConfig, assignments: &[String]) -> Result<SettingsPatch> {
    let mut patch = SettingsPatch::new();
    for assignment in assignments {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("Expected key=value, got '{assignment}'"))?;
        let spec = config
            .get(key)
            .ok_or_else(|| anyhow!("'{key}' is not a setting of '{}'", config.storage_path()))?;
        let codec = spec.codec();

        let value = if raw.is_empty() && codec.optional {
            SettingValue::Unset
        } else if raw.is_empty() && codec.is_array {
            SettingValue::List(Vec::new())
        } else if raw.is_empty() && codec.kind == ScalarKind::String {
            SettingValue::from("")
        } else {
            let params: Vec<String> = if codec.is_array {
                raw.split(',').map(str::to_string).collect()
            } else {
                vec![raw.to_string()]
            };
            match codec.decode_params(&params) {
                Some(value) => value,
                None => bail!("Invalid {} value for '{key}': '{raw}'", codec.kind),
            }
        };
        patch = patch.set(key, value);
    }
    Ok(patch)
}

fn describe(store: &SettingsStore, location: &dyn Location) -> serde_json::Value {
    let sources: serde_json::Map<String, serde_json::Value> = store
        .config()
        .settings()
        .iter()
        .filter_map(|spec| {
            let tier = store.source_of(spec.key())?;
            Some((spec.key().to_string(), json!(tier.as_str())))
        })
        .collect();

    json!({
        "storagePath": store.storage_path(),
        "query": location.query(),
        "state": store.state().to_json(),
        "sources": sources,
        "active": store.active_settings(None),
    })
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
