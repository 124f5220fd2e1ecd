/// `load_config` module: connection settings from the environment, and the
/// template values used when rendering resource definitions.
///
/// # Responsibilities
/// - Read `FLOWSYNC_HOST`, `FLOWSYNC_ACCESS_KEY` and `FLOWSYNC_SECRET_KEY`
///   (a `.env` file is honoured, see `main`) into a [`ClientConfig`].
/// - Parse the `--config` YAML file into the JSON value handed to the loader
///   as `config.*` template values.
///
/// # Errors
/// All errors use `anyhow::Error` and name the missing variable or the
/// offending file; they are surfaced at the CLI boundary.
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub const HOST_ENV: &str = "FLOWSYNC_HOST";
pub const ACCESS_KEY_ENV: &str = "FLOWSYNC_ACCESS_KEY";
pub const SECRET_KEY_ENV: &str = "FLOWSYNC_SECRET_KEY";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Host name, or a full base URL including scheme.
    pub host: String,
    pub access_key: String,
    pub secret_key: String,
}

fn required_env(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => {
            error!(variable = name, "Missing environment variable");
            Err(anyhow::anyhow!("environment variable {name} must be set"))
        }
    }
}

/// Builds the client settings. `host` overrides `FLOWSYNC_HOST`.
pub fn client_config(host: Option<String>) -> Result<ClientConfig> {
    let host = match host.filter(|h| !h.trim().is_empty()) {
        Some(host) => host,
        None => required_env(HOST_ENV)?,
    };
    let access_key = required_env(ACCESS_KEY_ENV)?;
    let secret_key = required_env(SECRET_KEY_ENV)?;
    info!(host = %host, "Loaded client configuration from environment");
    Ok(ClientConfig {
        host,
        access_key,
        secret_key,
    })
}

/// Loads the render-config YAML file. The top level must be a mapping.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Value> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading render configuration from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Config file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
            return Err(anyhow::anyhow!(
                "Failed to read config file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    let raw: serde_yaml::Value = match serde_yaml::from_str(&config_content) {
        Ok(conf) => {
            info!(config_path = ?path_ref, "Parsed config YAML successfully");
            conf
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
            return Err(anyhow::anyhow!("Failed to parse config YAML: {e}"));
        }
    };

    let values = match raw {
        serde_yaml::Value::Null => Value::Object(Default::default()),
        mapping @ serde_yaml::Value::Mapping(_) => serde_json::to_value(mapping)
            .with_context(|| format!("config file {path_ref:?} has non-string keys"))?,
        _ => {
            error!(config_path = ?path_ref, "Config YAML is not a mapping");
            return Err(anyhow::anyhow!(
                "Failed to parse config YAML: top level of {path_ref:?} must be a mapping"
            ));
        }
    };
    Ok(values)
}
