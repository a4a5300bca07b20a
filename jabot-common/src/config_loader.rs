//! Modular configuration loader.
//!
//! Loads configuration from up to two files in the config directory:
//! - `config.json` - Core configuration
//! - `secrets.json` - Credentials (account password, backend API key)
//!
//! `secrets.json` has the same shape as `config.json` and is deep-merged on top
//! of it, so credentials can live in a file with tighter permissions.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::config_dir;
use crate::error::{Error, Result, ResultExt};

/// Configuration file names, lowest priority first.
pub const CONFIG_FILES: &[&str] = &["config.json", "secrets.json"];

/// Load a JSON file and return its contents as a Value.
/// Returns None if file doesn't exist.
fn load_json_file(path: &Path) -> Result<Option<Value>> {
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(path).context(format!("Failed to read {}", path.display()))?;
    let value: Value =
        serde_json::from_str(&content).context(format!("Failed to parse {}", path.display()))?;
    if !value.is_object() {
        return Err(Error::InvalidInput(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }

    Ok(Some(value))
}

/// Deep merge two JSON values.
/// Source values override target values, with object merging at each level.
fn merge_json(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_value) in source_map {
                match target_map.get_mut(&key) {
                    Some(target_value) => merge_json(target_value, source_value),
                    None => {
                        target_map.insert(key, source_value);
                    }
                }
            }
        }
        (target, source) => {
            *target = source;
        }
    }
}

/// Load modular configuration from the config directory.
pub fn load_modular_config(dir: Option<PathBuf>) -> Result<Value> {
    let cfg_dir = dir.unwrap_or_else(config_dir);
    tracing::debug!("Loading modular config from {}", cfg_dir.display());

    let mut config = Value::Object(Default::default());
    for file in CONFIG_FILES {
        if let Some(layer) = load_json_file(&cfg_dir.join(file))? {
            merge_json(&mut config, layer);
            tracing::debug!("Loaded {file}");
        }
    }

    Ok(config)
}

/// Check which modular config files exist.
pub fn check_modular_files(dir: Option<PathBuf>) -> Vec<(String, bool)> {
    let cfg_dir = dir.unwrap_or_else(config_dir);

    CONFIG_FILES
        .iter()
        .map(|file| (file.to_string(), cfg_dir.join(file).exists()))
        .collect()
}
