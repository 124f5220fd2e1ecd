//! File-backed credential store.
//!
//! Reads `~/.flowsync/component-credentials.yaml` (or an explicit path):
//!
//! ```yaml
//! credentials:
//!   - id: warehouse
//!     name: Warehouse user
//!     snowflake: { user: loader, password: secret }
//! ```
//!
//! The single key besides `id` and `name` names the credential type.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tracing::{error, info};

use flowsync_core::contract::{Credential, CredentialProvider};

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    credentials: Vec<serde_yaml::Mapping>,
}

#[derive(Debug, Default)]
pub struct FileCredentialProvider {
    credentials: BTreeMap<String, Credential>,
}

pub fn default_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".flowsync").join("component-credentials.yaml"))
}

fn text(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        // `id: { value: x }` is accepted as well.
        serde_yaml::Value::Mapping(m) => m.get("value").and_then(text),
        _ => None,
    }
}

fn parse_entry(entry: serde_yaml::Mapping) -> Result<Credential> {
    let mut id = None;
    let mut name = None;
    let mut typed = Vec::new();
    for (key, value) in entry {
        match key.as_str() {
            Some("id") => id = text(&value),
            Some("name") => name = text(&value),
            Some(kind) => typed.push((kind.to_string(), value)),
            None => return Err(anyhow::anyhow!("credential keys must be strings")),
        }
    }
    let id = id.ok_or_else(|| anyhow::anyhow!("credential entry without id"))?;
    let (kind, value) = match typed.len() {
        1 => typed.remove(0),
        n => {
            return Err(anyhow::anyhow!(
                "credential {id} must have exactly one type section, found {n}"
            ))
        }
    };
    let value: Value =
        serde_json::to_value(value).with_context(|| format!("credential {id} is not valid"))?;
    Ok(Credential {
        id,
        name,
        kind,
        value,
    })
}

impl FileCredentialProvider {
    /// Loads from `path`, or from the default location when `None`. A missing
    /// default file yields an empty store; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_path() {
                Some(p) => (p, false),
                None => {
                    info!("No home directory; continuing without credentials");
                    return Ok(Self::default());
                }
            },
        };
        if !explicit && !path.exists() {
            info!(path = ?path, "No credentials file found");
            return Ok(Self::default());
        }
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            error!(error = ?e, path = ?path, "Failed to read credentials file");
            anyhow::anyhow!("Failed to read credentials file {path:?}: {e}")
        })?;
        let file: CredentialsFile = serde_yaml::from_str(&content).map_err(|e| {
            error!(error = ?e, path = ?path, "Failed to parse credentials file");
            anyhow::anyhow!("Bad credentials file {path:?}: {e}")
        })?;
        let mut credentials = BTreeMap::new();
        for entry in file.credentials {
            let credential =
                parse_entry(entry).with_context(|| format!("Bad credentials file {path:?}"))?;
            credentials.insert(credential.id.clone(), credential);
        }
        info!(path = ?path, count = credentials.len(), "Loaded credentials");
        Ok(FileCredentialProvider { credentials })
    }
}

impl CredentialProvider for FileCredentialProvider {
    fn resolve(&self, credential_id: &str) -> Option<Credential> {
        self.credentials.get(credential_id).cloned()
    }
}
