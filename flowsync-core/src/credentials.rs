//! Injection of locally stored credentials into connector configuration.
//!
//! Connector containers reference a credential by `credentialId.value`. When
//! the provider knows the id, its secret fields are written to the sibling
//! `credentials` key, after checking that the credential has the type the
//! container expects. Unknown ids are left alone so the remote keeps
//! whatever it already stores.

use serde_json::{Map, Value};
use tracing::debug;

use crate::contract::CredentialProvider;
use crate::error::{Result, SyncError};

enum Staging {
    None,
    /// Credentials for a staging area stored under a fixed field.
    Field(&'static str, &'static str),
    /// Staging area stored under whichever of the blob-store keys is present.
    BlobStore,
}

struct Rule {
    container: &'static str,
    kind: &'static str,
    staging: Staging,
}

const RULES: &[Rule] = &[
    Rule { container: "s3", kind: "aws", staging: Staging::None },
    Rule { container: "gcs", kind: "gcp", staging: Staging::None },
    Rule { container: "abs", kind: "azure", staging: Staging::None },
    Rule { container: "mysql", kind: "mysql", staging: Staging::None },
    Rule { container: "mysqlPartition", kind: "mysql", staging: Staging::None },
    Rule { container: "bigQuery", kind: "gcp", staging: Staging::Field("stagingContainer", "gcp") },
    Rule { container: "redshift", kind: "redshift", staging: Staging::Field("stagingContainer", "aws") },
    Rule { container: "snowflake", kind: "snowflake", staging: Staging::BlobStore },
    Rule { container: "msSqlServer", kind: "ms_sql_server", staging: Staging::BlobStore },
];

const BLOB_STORES: &[(&str, &str)] = &[("s3", "aws"), ("gcs", "gcp"), ("abs", "azure")];

const FUNCTION_CONTAINERS: &[&str] = &["byteFunction", "recordFunction"];

/// Walks `config` and fills in every credential the provider can resolve.
pub fn inject_credentials(
    config: &mut Map<String, Value>,
    provider: &dyn CredentialProvider,
) -> Result<()> {
    for (key, child) in config.iter_mut() {
        match child {
            Value::Object(child) => {
                if let Some(rule) = RULES.iter().find(|r| r.container == key.as_str()) {
                    apply_rule(rule, child, provider)?;
                } else if FUNCTION_CONTAINERS.contains(&key.as_str()) {
                    apply_function(child, provider)?;
                }
                inject_credentials(child, provider)?;
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    if let Value::Object(item) = item {
                        inject_credentials(item, provider)?;
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn apply_rule(
    rule: &Rule,
    container: &mut Map<String, Value>,
    provider: &dyn CredentialProvider,
) -> Result<()> {
    if !apply(container, rule.kind, provider)? {
        return Ok(());
    }
    match rule.staging {
        Staging::None => Ok(()),
        Staging::Field(field, kind) => match container.get_mut(field) {
            Some(Value::Object(staging)) => apply(staging, kind, provider).map(|_| ()),
            _ => Ok(()),
        },
        Staging::BlobStore => {
            for (field, kind) in BLOB_STORES {
                if let Some(Value::Object(staging)) = container.get_mut(*field) {
                    apply(staging, kind, provider)?;
                }
            }
            Ok(())
        }
    }
}

fn apply_function(function: &mut Map<String, Value>, provider: &dyn CredentialProvider) -> Result<()> {
    let config = function
        .get_mut("container")
        .and_then(Value::as_object_mut)
        .and_then(|c| c.get_mut("credentialsConfiguration"))
        .and_then(Value::as_object_mut);
    let Some(config) = config else {
        debug!("No credential configuration for function");
        return Ok(());
    };
    let id = config
        .get("id")
        .and_then(|id| id.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string);
    match id {
        Some(id) => set_credentials(config, &id, "function", provider).map(|_| ()),
        None => Ok(()),
    }
}

/// Returns whether the container referenced a credential at all.
fn apply(
    container: &mut Map<String, Value>,
    kind: &str,
    provider: &dyn CredentialProvider,
) -> Result<bool> {
    let id = container
        .get("credentialId")
        .and_then(|id| id.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string);
    match id {
        Some(id) => {
            set_credentials(container, &id, kind, provider)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

fn set_credentials(
    target: &mut Map<String, Value>,
    id: &str,
    expected: &str,
    provider: &dyn CredentialProvider,
) -> Result<bool> {
    let Some(credential) = provider.resolve(id) else {
        debug!(credential = %id, "Credential not found locally");
        return Ok(false);
    };
    if credential.kind != expected {
        return Err(SyncError::CredentialTypeMismatch {
            id: id.to_string(),
            expected: expected.to_string(),
            found: credential.kind,
        });
    }
    debug!(credential = %id, kind = %expected, "Applying credential");
    target.insert("credentials".to_string(), credential.value);
    Ok(true)
}
