//! Error taxonomy for the reconciliation engine.
//!
//! Every fallible core operation returns [`SyncError`]. Errors raised by a
//! [`crate::contract::SessionClient`] are surfaced as [`ClientError`] and
//! wrapped transparently, so callers can still tell a 404 from a transport
//! failure.

use thiserror::Error;

use crate::address::Address;
use crate::remote::ResourceKind;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Failure reported by the transport collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("transport failure: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("resource does not exist: {0}")]
    NotFound(Address),

    #[error("unable to load dependency {0}")]
    MissingDependency(Address),

    #[error("dependency cycle between {}", format_addresses(.0))]
    CycleDetected(Vec<Address>),

    #[error("cannot delete {address}: {reason}")]
    IllegalDelete { reason: String, address: Address },

    #[error("wrong type for credential {id} (expected {expected}, but found {found})")]
    CredentialTypeMismatch {
        id: String,
        expected: String,
        found: String,
    },

    #[error("definition version out of date (found {found}, supported {supported})")]
    VersionMismatch { found: u32, supported: u32 },

    #[error("invalid address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },

    #[error("no child possible for {0}")]
    InvalidExtension(Address),

    #[error("invalid reference {reference:?} in {address}")]
    InvalidReference { reference: String, address: Address },

    #[error("invalid definition at {address}: {reason}")]
    InvalidDefinition { address: String, reason: String },

    #[error("not able to read records from {address} ({kind})")]
    NotReadable { address: Address, kind: ResourceKind },

    #[error("unable to load resource definitions: {0}")]
    Load(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl SyncError {
    pub(crate) fn invalid_address(input: &str, reason: impl Into<String>) -> Self {
        SyncError::InvalidAddress {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_definition(address: impl ToString, reason: impl Into<String>) -> Self {
        SyncError::InvalidDefinition {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn illegal_delete(address: &Address, reason: impl Into<String>) -> Self {
        SyncError::IllegalDelete {
            reason: reason.into(),
            address: address.clone(),
        }
    }
}

fn format_addresses(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
