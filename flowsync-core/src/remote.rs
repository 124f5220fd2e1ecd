//! Remote resources as returned by the API, and the path scheme used to
//! address them.
//!
//! Paths are relative to the API prefix handled by the transport:
//!
//! | kind | collection |
//! |---|---|
//! | organization | `organizations` |
//! | pipeline | `organizations/{o}/projects` |
//! | component, feed, subscription | `organizations/{o}/projects/{p}/{type}s` |
//! | group | `organizations/{o}/projects/{p}/groups` |
//!
//! A single resource lives at `{collection}/{id}`. Responses wrap their
//! payload in a `data` field.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info};

use crate::address::Address;
use crate::contract::SessionClient;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    Organization,
    Pipeline,
    Group,
    ReadConnector,
    Transform,
    WriteConnector,
    Feed,
    FeedSubscription,
}

impl ResourceKind {
    /// The `type` discriminator the API uses for pipeline children.
    pub fn api_type(&self) -> Option<&'static str> {
        match self {
            ResourceKind::Organization | ResourceKind::Pipeline => None,
            ResourceKind::Group => Some("group"),
            ResourceKind::ReadConnector => Some("source"),
            ResourceKind::Transform => Some("view"),
            ResourceKind::WriteConnector => Some("sink"),
            ResourceKind::Feed => Some("pub"),
            ResourceKind::FeedSubscription => Some("sub"),
        }
    }

    pub fn from_api_type(api_type: &str) -> Option<Self> {
        match api_type {
            "group" => Some(ResourceKind::Group),
            "source" => Some(ResourceKind::ReadConnector),
            "view" => Some(ResourceKind::Transform),
            "sink" => Some(ResourceKind::WriteConnector),
            "pub" => Some(ResourceKind::Feed),
            "sub" => Some(ResourceKind::FeedSubscription),
            _ => None,
        }
    }

    /// Depth of addresses of this kind.
    pub fn level(&self) -> usize {
        match self {
            ResourceKind::Organization => 1,
            ResourceKind::Pipeline => 2,
            _ => 3,
        }
    }

    /// Kinds whose records can be streamed.
    pub fn is_readable(&self) -> bool {
        matches!(
            self,
            ResourceKind::ReadConnector
                | ResourceKind::Transform
                | ResourceKind::Feed
                | ResourceKind::FeedSubscription
        )
    }

    pub fn is_component(&self) -> bool {
        matches!(
            self,
            ResourceKind::ReadConnector | ResourceKind::Transform | ResourceKind::WriteConnector
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResourceKind::Organization => "Organization",
            ResourceKind::Pipeline => "Pipeline",
            ResourceKind::Group => "Group",
            ResourceKind::ReadConnector => "ReadConnector",
            ResourceKind::Transform => "Transform",
            ResourceKind::WriteConnector => "WriteConnector",
            ResourceKind::Feed => "Feed",
            ResourceKind::FeedSubscription => "FeedSubscription",
        };
        f.write_str(label)
    }
}

/// Collection path under which resources of `kind` at `address` are created.
pub fn collection_path(kind: ResourceKind, address: &Address) -> Result<String> {
    let shape_error = || {
        SyncError::invalid_definition(address, format!("address cannot hold a {kind}"))
    };
    if address.depth() != kind.level() {
        return Err(shape_error());
    }
    match kind {
        ResourceKind::Organization => Ok("organizations".to_string()),
        ResourceKind::Pipeline => Ok(format!(
            "organizations/{}/projects",
            address.scope().ok_or_else(shape_error)?
        )),
        _ => {
            let api_type = kind.api_type().ok_or_else(shape_error)?;
            Ok(format!(
                "{}/{}s",
                pipeline_path(&address.parent())?,
                api_type
            ))
        }
    }
}

/// Path of a single resource.
pub fn resource_path(kind: ResourceKind, address: &Address) -> Result<String> {
    let leaf = address
        .leaf()
        .ok_or_else(|| SyncError::invalid_definition(address, "the root has no resource path"))?;
    Ok(format!("{}/{}", collection_path(kind, address)?, leaf))
}

pub(crate) fn organization_path(address: &Address) -> Result<String> {
    match address.scope() {
        Some(scope) => Ok(format!("organizations/{scope}")),
        None => Err(SyncError::invalid_definition(address, "not inside an organization")),
    }
}

pub(crate) fn pipeline_path(address: &Address) -> Result<String> {
    match (address.scope(), address.pipeline_id()) {
        (Some(scope), Some(pipeline)) => {
            Ok(format!("organizations/{scope}/projects/{pipeline}"))
        }
        _ => Err(SyncError::invalid_definition(address, "not inside a pipeline")),
    }
}

/// Strips the `data` envelope from an API response.
pub fn unwrap_data(document: Value) -> Value {
    match document {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Cached materialization of a resource that exists remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteResource {
    pub address: Address,
    pub uuid: String,
    pub kind: ResourceKind,
    pub payload: Value,
}

impl RemoteResource {
    /// Builds a resource from one entry of a listing under `parent`.
    ///
    /// Pipeline children carry their kind in a `type` field; when it is
    /// missing the payload keys are inspected, then `hint` is used.
    pub fn from_listing(parent: &Address, entry: Value, hint: Option<ResourceKind>) -> Result<Self> {
        let id = entry
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::invalid_definition(parent, "listed resource without id"))?
            .to_string();
        let address = parent.extend(&id)?;
        let kind = match parent.depth() {
            0 => ResourceKind::Organization,
            1 => ResourceKind::Pipeline,
            _ => parse_component_kind(&entry)
                .or(hint)
                .ok_or_else(|| SyncError::invalid_definition(&address, "unknown resource type"))?,
        };
        Self::from_payload(address, kind, entry)
    }

    pub fn from_payload(address: Address, kind: ResourceKind, payload: Value) -> Result<Self> {
        let uuid = payload
            .get("uuid")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::invalid_definition(&address, "remote resource without uuid"))?
            .to_string();
        Ok(RemoteResource {
            address,
            uuid,
            kind,
            payload,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.payload.get("name").and_then(Value::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.payload.get("description").and_then(Value::as_str)
    }

    pub fn path(&self) -> Result<String> {
        resource_path(self.kind, &self.address)
    }

    /// `{uuid, type}` reference used by inputs and group content.
    pub fn reference(&self) -> Value {
        serde_json::json!({
            "uuid": self.uuid,
            "type": self.kind.api_type().unwrap_or_default(),
        })
    }

    /// Remote identifiers this resource reads from: transform inputs, the
    /// single input of sinks and feeds, or group content.
    pub fn upstream_uuids(&self) -> Vec<String> {
        let mut uuids = Vec::new();
        for key in ["inputs", "content"] {
            if let Some(items) = self.payload.get(key).and_then(Value::as_array) {
                uuids.extend(
                    items
                        .iter()
                        .filter_map(|i| i.get("uuid").and_then(Value::as_str))
                        .map(str::to_string),
                );
            }
        }
        if let Some(uuid) = self.payload.get("inputUUID").and_then(Value::as_str) {
            uuids.push(uuid.to_string());
        }
        uuids
    }

    /// Creates or updates the resource at `address`, then reads it back.
    ///
    /// Returns the materialized resource and whether it was created.
    pub async fn upsert<C>(
        client: &C,
        kind: ResourceKind,
        address: &Address,
        payload: Value,
    ) -> Result<(RemoteResource, bool)>
    where
        C: SessionClient + ?Sized,
    {
        let path = resource_path(kind, address)?;
        let exists = match client.get(&path).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => {
                error!(error = ?e, %address, "Existence check failed");
                return Err(e.into());
            }
        };
        debug!(%address, payload = %payload, "Upserting resource");
        let result = if exists {
            client.patch(&path, payload).await
        } else {
            client.post(&collection_path(kind, address)?, payload).await
        };
        if let Err(e) = result {
            error!(error = ?e, %address, created = !exists, "Unable to apply resource");
            return Err(e.into());
        }
        let stored = unwrap_data(client.get(&path).await?);
        let resource = RemoteResource::from_payload(address.clone(), kind, stored)?;
        info!(%address, uuid = %resource.uuid, created = !exists, "Applied resource");
        Ok((resource, !exists))
    }
}

fn parse_component_kind(entry: &Value) -> Option<ResourceKind> {
    if let Some(kind) = entry
        .get("type")
        .and_then(Value::as_str)
        .and_then(ResourceKind::from_api_type)
    {
        return Some(kind);
    }
    let object = entry.as_object()?;
    ["source", "view", "sink", "sub", "pub"]
        .into_iter()
        .find(|k| object.contains_key(*k))
        .and_then(ResourceKind::from_api_type)
}
