// Configuration loader for the transcription router
//
// Loads the flat TOML configuration file into the process environment. Variables already
// set in the environment win over file values; compiled defaults apply to the rest.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use toml::Value;

const CONFIG_FILE_PATH: &str = "transcription_router.conf";

/// Environment variable overriding the configuration file location
pub const CONFIG_PATH_VAR: &str = "TRANSCRIPTION_ROUTER_CONFIG";

/// Location of the configuration file
pub fn config_file_path() -> PathBuf {
    env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE_PATH))
}

/// Flatten a TOML document into key/value strings. Arrays of scalars become comma
/// separated lists; nested tables are skipped with a warning.
pub fn parse_flat_toml(content: &str) -> Result<HashMap<String, String>, toml::de::Error> {
    let table: toml::Table = content.parse()?;
    let mut config_map = HashMap::new();

    for (key, value) in table {
        let text = match value {
            Value::String(s) => s,
            Value::Integer(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Array(items) => {
                let parts: Option<Vec<String>> = items
                    .into_iter()
                    .map(|item| match item {
                        Value::String(s) => Some(s),
                        Value::Integer(i) => Some(i.to_string()),
                        Value::Float(f) => Some(f.to_string()),
                        _ => None,
                    })
                    .collect();
                match parts {
                    Some(parts) => parts.join(","),
                    None => {
                        warn!("Skipping array with non-scalar items for key: {}", key);
                        continue;
                    }
                }
            }
            _ => {
                warn!("Skipping unsupported TOML value type for key: {}", key);
                continue;
            }
        };
        config_map.insert(key, text);
    }
    Ok(config_map)
}

/// Loads configuration from the TOML file into environment variables
///
/// Configuration precedence (highest to lowest):
/// 1. Environment variables
/// 2. Configuration file values
/// 3. Default values (`config::defaults`)
///
/// Returns true if the config file was successfully loaded, false otherwise
pub fn load_config() -> bool {
    load_config_from(&config_file_path())
}

pub fn load_config_from(config_path: &Path) -> bool {
    if !config_path.exists() {
        debug!("Configuration file not found at: {}", config_path.display());
        return false;
    }

    let config_content = match fs::read_to_string(config_path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read configuration file: {}", e);
            return false;
        }
    };

    let config_map = match parse_flat_toml(&config_content) {
        Ok(values) => values,
        Err(e) => {
            warn!("Failed to parse configuration file: {}", e);
            return false;
        }
    };

    for (key, value) in config_map {
        if env::var(&key).is_err() {
            debug!("Setting env var from config file: {}", key);
            env::set_var(key, value);
        } else {
            debug!("Env var already exists, skipping: {}", key);
        }
    }

    info!("Configuration loaded from {}", config_path.display());
    true
}
