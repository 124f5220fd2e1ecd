#![allow(unused)]

//! # contract: collaborator interfaces of the reconciliation engine
//!
//! The engine never talks HTTP, reads files or parses credential files
//! itself. It goes through the three traits below:
//!
//! - [`SessionClient`]: a thin authenticated façade over the remote API.
//! - [`DefinitionLoader`]: renders a tree of authored documents into
//!   [`LoadedDocument`]s rooted at an address.
//! - [`CredentialProvider`]: looks up credentials referenced by component
//!   payloads while the creation/update payloads are built.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall` (`MockSessionClient`,
//!   `MockDefinitionLoader`, `MockCredentialProvider`) when compiled for tests
//!   or with the `test-export-mocks` feature, so dependents can script remote
//!   behaviour deterministically.

use std::path::PathBuf;

use async_trait::async_trait;
use mockall::{automock, predicate::*};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::address::Address;
use crate::definition::ResourceDocument;
use crate::error::ClientError;

/// Error type for [`DefinitionLoader`] (simple boxed error, like the other
/// collaborator boundaries).
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

/// Authenticated request/response access to the remote resource graph.
///
/// Paths are relative to the API prefix (e.g. `organizations/ds/projects`).
/// A 404 must surface as [`ClientError::NotFound`]; everything else that
/// fails is [`ClientError::Transport`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Fetch a JSON document.
    async fn get(&self, path: &str) -> Result<Value, ClientError>;

    /// Create a resource in a collection; returns the HTTP status.
    async fn post(&self, path: &str, document: Value) -> Result<u16, ClientError>;

    /// Update a resource in place; returns the HTTP status.
    async fn patch(&self, path: &str, document: Value) -> Result<u16, ClientError>;

    /// Remove a resource; returns the HTTP status.
    async fn delete(&self, path: &str) -> Result<u16, ClientError>;

    /// Fetch a JSON-lines endpoint, one document per line.
    async fn stream(
        &self,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<Vec<Value>, ClientError>;
}

/// Rendering options handed to the [`DefinitionLoader`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderConfig {
    /// File or directory the definitions are read from.
    pub input: PathBuf,
    /// Descend into child files and directories.
    pub recursive: bool,
    /// Values made available to templates under `config`.
    #[serde(default)]
    pub values: Value,
}

/// One authored document and the address it was found at.
///
/// `address` is either the full address of the resource, or its parent when
/// the document supplies its own `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedDocument {
    pub address: Address,
    pub document: ResourceDocument,
}

/// Turns a tree of authored files into typed documents.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait DefinitionLoader: Send + Sync {
    /// Load every document at or below `root`. Output is treated as
    /// validated by the engine.
    async fn load_tree(
        &self,
        root: &Address,
        render: &RenderConfig,
    ) -> Result<Vec<LoadedDocument>, LoadError>;
}

/// A credential that can be embedded into a component payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Credential type, e.g. `aws`, `gcp`, `snowflake`, `function`.
    pub kind: String,
    /// Type-specific secret fields.
    pub value: Value,
}

/// Looks up credentials by id.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait CredentialProvider: Send + Sync {
    fn resolve(&self, credential_id: &str) -> Option<Credential>;
}
