//! Session-scoped view of the remote resource graph.
//!
//! Scopes are listed lazily, at most once per session. Entries are only
//! replaced by [`ResourceCache::remember`] after a successful apply and
//! removed by [`ResourceCache::forget`] after a delete; concurrent remote
//! changes are not observed.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, error, info};

use crate::address::Address;
use crate::contract::SessionClient;
use crate::error::{Result, SyncError};
use crate::remote::{organization_path, pipeline_path, unwrap_data, RemoteResource, ResourceKind};

const EVERYONE_ROLE: &str = "Everyone";

#[derive(Debug, Default)]
pub struct ResourceCache {
    by_address: BTreeMap<Address, RemoteResource>,
    address_by_uuid: HashMap<String, Address>,
    loaded: HashSet<Address>,
    roles: Option<Vec<Value>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists the children of `scope` into the cache unless already done.
    pub async fn ensure_scope_loaded<C>(&mut self, client: &C, scope: &Address) -> Result<()>
    where
        C: SessionClient + ?Sized,
    {
        if self.loaded.contains(scope) {
            return Ok(());
        }
        let listings: Vec<(String, Option<ResourceKind>)> = match scope.depth() {
            0 => vec![("organizations".to_string(), None)],
            1 => vec![(format!("{}/projects", organization_path(scope)?), None)],
            2 => {
                let base = pipeline_path(scope)?;
                vec![
                    (format!("{base}/components"), None),
                    (format!("{base}/groups"), Some(ResourceKind::Group)),
                ]
            }
            _ => {
                self.loaded.insert(scope.clone());
                return Ok(());
            }
        };

        info!(scope = %scope, "[CACHE] Loading scope");
        for (path, hint) in listings {
            let listing = client.get(&path).await.map_err(|e| {
                error!(error = ?e, scope = %scope, path = %path, "Unable to list scope");
                if e.is_not_found() {
                    SyncError::NotFound(scope.clone())
                } else {
                    e.into()
                }
            })?;
            let entries = match unwrap_data(listing) {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(SyncError::invalid_definition(
                        scope,
                        format!("expected a listing at {path}, got {other}"),
                    ))
                }
            };
            debug!(scope = %scope, path = %path, count = entries.len(), "Listed scope");
            for entry in entries {
                let resource = RemoteResource::from_listing(scope, entry, hint)?;
                self.insert(resource);
            }
        }
        self.loaded.insert(scope.clone());
        Ok(())
    }

    /// Loads the scope chain above `address` and returns its entry.
    pub async fn resolve<C>(&mut self, client: &C, address: &Address) -> Result<RemoteResource>
    where
        C: SessionClient + ?Sized,
    {
        if address.is_root() {
            return Err(SyncError::invalid_definition(
                address,
                "the root is not a remote resource",
            ));
        }
        let mut scope = Address::root();
        for segment in address.segments() {
            self.ensure_scope_loaded(client, &scope).await?;
            let next = scope.extend(segment)?;
            if !self.by_address.contains_key(&next) {
                debug!(address = %address, missing = %next, "Lookup miss");
                return Err(SyncError::NotFound(address.clone()));
            }
            scope = next;
        }
        self.lookup(address)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(address.clone()))
    }

    /// Cached entry without any remote call.
    pub fn lookup(&self, address: &Address) -> Option<&RemoteResource> {
        self.by_address.get(address)
    }

    pub fn by_uuid(&self, uuid: &str) -> Option<&RemoteResource> {
        self.address_by_uuid
            .get(uuid)
            .and_then(|a| self.by_address.get(a))
    }

    pub fn remember(&mut self, resource: RemoteResource) {
        self.insert(resource);
    }

    pub fn forget(&mut self, address: &Address) {
        if let Some(old) = self.by_address.remove(address) {
            self.address_by_uuid.remove(&old.uuid);
        }
    }

    fn insert(&mut self, resource: RemoteResource) {
        if let Some(old) = self.by_address.get(&resource.address) {
            if old.uuid != resource.uuid {
                self.address_by_uuid.remove(&old.uuid);
            }
        }
        self.address_by_uuid
            .insert(resource.uuid.clone(), resource.address.clone());
        self.by_address.insert(resource.address.clone(), resource);
    }

    /// Direct children of `scope`, loading it first. A missing scope is
    /// `NotFound`.
    pub async fn children<C>(&mut self, client: &C, scope: &Address) -> Result<Vec<RemoteResource>>
    where
        C: SessionClient + ?Sized,
    {
        if !scope.is_root() {
            self.resolve(client, scope).await?;
        }
        self.ensure_scope_loaded(client, scope).await?;
        Ok(self.cached_children(scope).cloned().collect())
    }

    fn cached_children(&self, scope: &Address) -> impl Iterator<Item = &RemoteResource> + '_ {
        let scope = scope.clone();
        self.by_address
            .values()
            .filter(move |r| !r.address.is_root() && r.address.parent() == scope && r.address != scope)
    }

    pub fn subscriptions_in(&self, pipeline: &Address) -> Vec<&RemoteResource> {
        self.cached_children(pipeline)
            .filter(|r| r.kind == ResourceKind::FeedSubscription)
            .collect()
    }

    pub fn feeds_in(&self, pipeline: &Address) -> Vec<&RemoteResource> {
        self.cached_children(pipeline)
            .filter(|r| r.kind == ResourceKind::Feed)
            .collect()
    }

    /// Finds feed `feed_id` in any pipeline of organization `scope`.
    pub async fn find_feed<C>(
        &mut self,
        client: &C,
        scope: &str,
        feed_id: &str,
    ) -> Result<RemoteResource>
    where
        C: SessionClient + ?Sized,
    {
        let reference = Address::pipeline(scope, feed_id);
        let organization = Address::organization(scope);
        let pipelines = match self.children(client, &organization).await {
            Ok(p) => p,
            Err(SyncError::NotFound(_)) => return Err(SyncError::NotFound(reference)),
            Err(e) => return Err(e),
        };
        for pipeline in pipelines {
            self.ensure_scope_loaded(client, &pipeline.address).await?;
            if let Some(feed) = self
                .feeds_in(&pipeline.address)
                .into_iter()
                .find(|f| f.address.leaf() == Some(feed_id))
            {
                return Ok(feed.clone());
            }
        }
        debug!(scope = %scope, feed = %feed_id, "Feed not found");
        Err(SyncError::NotFound(reference))
    }

    /// Members recorded in a remote group's `content`.
    pub fn group_members(&self, group: &RemoteResource) -> Vec<Address> {
        group
            .upstream_uuids()
            .iter()
            .filter_map(|uuid| self.address_by_uuid.get(uuid).cloned())
            .collect()
    }

    pub async fn roles<C>(&mut self, client: &C) -> Result<&[Value]>
    where
        C: SessionClient + ?Sized,
    {
        if self.roles.is_none() {
            let listing = client.get("roles").await.map_err(|e| {
                error!(error = ?e, "Unable to list roles");
                SyncError::from(e)
            })?;
            let roles = match unwrap_data(listing) {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            self.roles = Some(roles);
        }
        Ok(self.roles.as_deref().unwrap_or_default())
    }

    /// Uuid of the `Everyone` role of the organization with `org_uuid`.
    pub async fn everyone_role<C>(&mut self, client: &C, org_uuid: &str) -> Result<Option<String>>
    where
        C: SessionClient + ?Sized,
    {
        let roles = self.roles(client).await?;
        Ok(roles
            .iter()
            .find(|r| {
                r.get("orgId").and_then(Value::as_str) == Some(org_uuid)
                    && r.get("id").and_then(Value::as_str) == Some(EVERYONE_ROLE)
            })
            .and_then(|r| r.get("uuid").and_then(Value::as_str))
            .map(str::to_string))
    }
}
