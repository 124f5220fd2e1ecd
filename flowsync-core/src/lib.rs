#![doc = "flowsync-core: reconciliation engine for flowsync."]

//! Reconciles locally authored resource definitions (organization →
//! pipeline → component, group, feed) against a remote resource graph.
//! Transport, file loading and credential storage are reached through the
//! traits in [`contract`]; the `flowsync` crate provides the concrete ones.
//!
//! # Usage
//! Build a [`ReconcileSession`] around a [`contract::SessionClient`], attach
//! a loader and a credential provider, then call `apply`, `delete`, `list`,
//! `get` or `records`.

pub mod address;
pub mod cache;
pub mod contract;
pub mod credentials;
pub mod definition;
pub mod error;
pub mod graph;
pub mod groups;
pub mod reconcile;
pub mod remote;
pub mod resolver;

pub use address::Address;
pub use definition::{ResourceDefinition, ResourceDocument, SUPPORTED_VERSION};
pub use error::{ClientError, Result, SyncError};
pub use reconcile::{
    ApplyOptions, ApplyReport, DeleteOptions, DeleteReport, ListEntry, ReconcileSession,
};
pub use remote::{RemoteResource, ResourceKind};
