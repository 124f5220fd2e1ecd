//! # reconcile: the session that applies, deletes, lists and exports
//!
//! A [`ReconcileSession`] owns everything one invocation learns about the
//! remote: the [`ResourceCache`], the [`GroupMembership`] relation and the
//! loaded definitions. It is created per command and dropped afterwards.
//!
//! ## Apply
//! 1. Load documents through the [`DefinitionLoader`] and turn them into
//!    definitions (rejecting newer schema versions).
//! 2. Schedule them ([`schedule`]): dependencies first, groups deferred.
//! 3. Resolve dependencies that are not defined locally, read-only.
//! 4. Walk the order: resolve inputs (creating feed subscriptions on the
//!    way), inject credentials, create or update, record group membership.
//! 5. Re-apply every local group and every group whose membership changed.
//! 6. With `recursive` and `delete`, remove remote children of the root
//!    that are not defined locally.
//!
//! ## Delete
//! Deletion is planned first, with every check done before the first
//! mutating call, then executed. A failed check leaves the remote untouched.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::cache::ResourceCache;
use crate::contract::{CredentialProvider, DefinitionLoader, RenderConfig, SessionClient};
use crate::credentials::inject_credentials;
use crate::definition::{
    flatten, ComponentDetails, ComponentSpec, DocumentBody, FeedSpec, GroupSpec, Named,
    OrganizationSpec, Payload, PayloadContext, PipelineSpec, ReadConnectorSpec, ResourceDefinition,
    ResourceDocument, Sharing, TransformSpec, WriteConnectorSpec, SUPPORTED_VERSION,
};
use crate::error::{Result, SyncError};
use crate::graph::{delete_order, schedule};
use crate::groups::GroupMembership;
use crate::remote::{resource_path, RemoteResource, ResourceKind};
use crate::resolver::ReferenceResolver;

#[derive(Debug, Clone, Default)]
pub struct ApplyOptions {
    /// Include contained definitions and child files.
    pub recursive: bool,
    /// Remove remote children of the root that are not defined locally.
    /// Only honoured together with `recursive`.
    pub delete: bool,
    pub dry_run: bool,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOptions {
    pub recursive: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    pub created: Vec<Address>,
    pub updated: Vec<Address>,
    /// Addresses only checked because of a dry run.
    pub skipped: Vec<Address>,
    /// Feed subscriptions created while resolving inputs.
    pub subscriptions: Vec<Address>,
    pub groups: Vec<Address>,
    pub deleted: Vec<Address>,
}

impl ApplyReport {
    /// Every address that was created or updated, groups included. Feed
    /// subscriptions created along the way are only in `subscriptions`.
    pub fn applied(&self) -> Vec<&Address> {
        self.created.iter().chain(self.updated.iter()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeleteReport {
    /// Deleted addresses in the order they were (or would be) removed.
    pub deleted: Vec<Address>,
    pub dry_run: bool,
}

/// One row of `list` output.
#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub depth: usize,
    pub kind: ResourceKind,
    /// Address relative to the listed origin.
    pub path: String,
}

impl fmt::Display for ListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{} - {}", "\t".repeat(self.depth), self.kind, self.path)
    }
}

pub struct ReconcileSession<'a, C: SessionClient + ?Sized> {
    client: &'a C,
    loader: Option<&'a dyn DefinitionLoader>,
    credentials: Option<&'a dyn CredentialProvider>,
    cache: ResourceCache,
    groups: GroupMembership,
    definitions: BTreeMap<Address, ResourceDefinition>,
}

impl<'a, C> ReconcileSession<'a, C>
where
    C: SessionClient + ?Sized,
{
    pub fn new(client: &'a C) -> Self {
        ReconcileSession {
            client,
            loader: None,
            credentials: None,
            cache: ResourceCache::new(),
            groups: GroupMembership::new(),
            definitions: BTreeMap::new(),
        }
    }

    pub fn with_loader(mut self, loader: &'a dyn DefinitionLoader) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_credentials(mut self, credentials: &'a dyn CredentialProvider) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn definitions(&self) -> &BTreeMap<Address, ResourceDefinition> {
        &self.definitions
    }

    /// Loads the definitions at or below `root` and reconciles the remote
    /// with them.
    pub async fn apply(&mut self, root: &Address, options: &ApplyOptions) -> Result<ApplyReport> {
        let loader = self
            .loader
            .ok_or_else(|| SyncError::Load("no definition loader configured".to_string()))?;
        info!(root = %root, input = %options.render.input.display(), "[APPLY] Loading definitions");
        let documents = loader.load_tree(root, &options.render).await.map_err(|e| {
            error!(error = %e, root = %root, "Unable to load definitions");
            SyncError::Load(e.to_string())
        })?;

        let mut definitions = Vec::new();
        for loaded in &documents {
            let definition = ResourceDefinition::from_document(&loaded.document, &loaded.address)
                .map_err(|e| {
                    error!(error = %e, address = %loaded.address, "Invalid definition");
                    e
                })?;
            if options.recursive {
                definitions.extend(flatten(definition)?);
            } else {
                definitions.push(definition);
            }
        }
        self.apply_definitions(root, definitions, options).await
    }

    /// Reconciles already built definitions. `root` bounds pruning.
    pub async fn apply_definitions(
        &mut self,
        root: &Address,
        definitions: Vec<ResourceDefinition>,
        options: &ApplyOptions,
    ) -> Result<ApplyReport> {
        for definition in definitions {
            let address = definition.address.clone();
            if self.definitions.insert(address.clone(), definition).is_some() {
                error!(address = %address, "Duplicate definition");
                return Err(SyncError::invalid_definition(&address, "defined more than once"));
            }
        }

        let plan = schedule(&self.definitions)?;
        let mut report = ApplyReport::default();

        for dependency in &plan.external {
            match self.cache.resolve(self.client, dependency).await {
                Ok(resource) => debug!(address = %dependency, uuid = %resource.uuid, "Resolved dependency"),
                Err(SyncError::NotFound(_)) => {
                    error!(address = %dependency, "Unable to load dependency");
                    return Err(SyncError::MissingDependency(dependency.clone()));
                }
                Err(e) => return Err(e),
            }
        }

        for address in &plan.ordered {
            let definition = match self.definitions.get(address) {
                Some(d) => d.clone(),
                None => continue,
            };
            self.apply_one(definition, options.dry_run, &mut report).await?;
        }

        self.apply_groups(&plan.groups, options.dry_run, &mut report).await?;

        if options.recursive && options.delete {
            self.prune(root, options.dry_run, &mut report).await?;
        }
        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            skipped = report.skipped.len(),
            subscriptions = report.subscriptions.len(),
            groups = report.groups.len(),
            deleted = report.deleted.len(),
            "[APPLY] Finished"
        );
        Ok(report)
    }

    async fn apply_one(
        &mut self,
        mut definition: ResourceDefinition,
        dry_run: bool,
        report: &mut ApplyReport,
    ) -> Result<()> {
        let address = definition.address.clone();
        let pipeline = definition.pipeline_address();
        let mut context = PayloadContext::default();
        let mut unresolved = false;

        for reference in definition.references()? {
            let mut resolver = ReferenceResolver::new(&mut self.cache, self.client);
            match resolver.resolve(&pipeline, &reference, dry_run).await {
                Ok((Some(input), created)) => {
                    if let Some(subscription) = created {
                        report.subscriptions.push(subscription);
                    }
                    context.inputs.push(input);
                }
                Ok((None, _)) => unresolved = true,
                Err(SyncError::NotFound(missing)) if dry_run => {
                    info!(address = %address, missing = %missing, "[DRY RUN] Input does not exist yet");
                    unresolved = true;
                }
                Err(e) => {
                    error!(error = %e, address = %address, "Unable to resolve input");
                    return Err(e);
                }
            }
        }

        if dry_run {
            match self.cache.resolve(self.client, &address).await {
                Ok(_) => info!(address = %address, unresolved, "[DRY RUN] Would update"),
                Err(SyncError::NotFound(_)) => {
                    info!(address = %address, unresolved, "[DRY RUN] Would create")
                }
                Err(e) => return Err(e),
            }
            report.skipped.push(address);
            return Ok(());
        }

        if let Payload::Feed(spec) = &definition.payload {
            context.pub_to_roles = self.feed_roles(&address, &spec.sharing).await?;
        }
        if let (Some(provider), Some(config)) =
            (self.credentials, definition.connector_config_mut())
        {
            inject_credentials(config, provider)?;
        }

        info!(address = %address, kind = %definition.kind(), "[APPLY] Applying");
        let payload = definition.to_remote_payload(&context)?;
        let (resource, created) =
            RemoteResource::upsert(self.client, definition.kind(), &address, payload).await?;
        self.cache.remember(resource);
        if created {
            report.created.push(address.clone());
        } else {
            report.updated.push(address.clone());
        }

        let kind = definition.kind();
        if kind.is_component() || kind == ResourceKind::Feed {
            self.seed_groups(&pipeline).await?;
            let group = definition.group_address();
            let previous = self.groups.group_of(&address).cloned();
            if self.groups.update_membership(&address, group.as_ref()) {
                debug!(address = %address, from = ?previous, to = ?group, "Group membership changed");
            }
        }
        Ok(())
    }

    /// Role ids a feed is published to.
    async fn feed_roles(&mut self, feed: &Address, sharing: &Sharing) -> Result<Vec<String>> {
        if sharing.all {
            return Ok(Vec::new());
        }
        let mut organizations: Vec<Address> = sharing
            .organizations
            .iter()
            .map(|o| Address::organization(o.as_str()))
            .collect();
        if !sharing.hidden {
            organizations.push(feed.parent().parent());
        }
        let mut roles = Vec::new();
        for organization in organizations {
            let org = match self.cache.resolve(self.client, &organization).await {
                Ok(org) => org,
                Err(SyncError::NotFound(_)) => {
                    debug!(organization = %organization, "Cannot share with unknown organization");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match self.cache.everyone_role(self.client, &org.uuid).await? {
                Some(role) => roles.push(role),
                None => warn!(organization = %organization, "Organization has no Everyone role"),
            }
        }
        Ok(roles)
    }

    /// Records the remote membership of every group in `pipeline` once.
    async fn seed_groups(&mut self, pipeline: &Address) -> Result<()> {
        if self.groups.is_seeded(pipeline) {
            return Ok(());
        }
        match self.cache.children(self.client, pipeline).await {
            Ok(children) => {
                for group in children.iter().filter(|c| c.kind == ResourceKind::Group) {
                    let members = self.cache.group_members(group);
                    self.groups.seed(&group.address, members);
                }
            }
            Err(SyncError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.groups.mark_seeded(pipeline);
        Ok(())
    }

    async fn apply_groups(
        &mut self,
        local: &[Address],
        dry_run: bool,
        report: &mut ApplyReport,
    ) -> Result<()> {
        for group in local {
            if dry_run {
                info!(address = %group, "[DRY RUN] Would apply group");
                report.skipped.push(group.clone());
                continue;
            }
            self.seed_groups(&group.parent()).await?;
            let definition = match self.definitions.get(group) {
                Some(d) => d.clone(),
                None => continue,
            };
            let context = PayloadContext {
                members: self.member_resources(group),
                ..Default::default()
            };
            info!(address = %group, members = context.members.len(), "[APPLY] Applying group");
            let payload = definition.to_remote_payload(&context)?;
            let (resource, created) =
                RemoteResource::upsert(self.client, ResourceKind::Group, group, payload).await?;
            self.cache.remember(resource);
            self.groups.mark_applied(group);
            if created {
                report.created.push(group.clone());
            } else {
                report.updated.push(group.clone());
            }
            report.groups.push(group.clone());
        }

        for group in self.groups.take_dirty() {
            let remote = match self.cache.resolve(self.client, &group).await {
                Ok(remote) => remote,
                Err(SyncError::NotFound(_)) => {
                    error!(address = %group, "Group referenced but not defined");
                    return Err(SyncError::MissingDependency(group));
                }
                Err(e) => return Err(e),
            };
            let members = self.member_resources(&group);
            let mut payload = remote.payload.clone();
            if let Value::Object(map) = &mut payload {
                map.insert(
                    "content".to_string(),
                    Value::Array(members.iter().map(RemoteResource::reference).collect()),
                );
            }
            info!(address = %group, members = members.len(), "[APPLY] Updating group membership");
            let (resource, _) =
                RemoteResource::upsert(self.client, ResourceKind::Group, &group, payload).await?;
            self.cache.remember(resource);
            report.updated.push(group.clone());
            report.groups.push(group);
        }
        Ok(())
    }

    fn member_resources(&self, group: &Address) -> Vec<RemoteResource> {
        self.groups
            .members_of(group)
            .iter()
            .filter_map(|member| {
                let found = self.cache.lookup(member).cloned();
                if found.is_none() {
                    debug!(group = %group, member = %member, "Group member not found remotely");
                }
                found
            })
            .collect()
    }

    /// Deletes remote descendants of `root` without a local definition.
    /// Groups and subscriptions are never pruned.
    async fn prune(&mut self, root: &Address, dry_run: bool, report: &mut ApplyReport) -> Result<()> {
        if root.depth() >= 3 {
            return Ok(());
        }
        let mut candidates = Vec::new();
        let mut scopes = vec![root.clone()];
        while let Some(scope) = scopes.pop() {
            let children = match self.cache.children(self.client, &scope).await {
                Ok(children) => children,
                Err(SyncError::NotFound(_)) if dry_run => continue,
                Err(e) => return Err(e),
            };
            for child in children {
                if self.definitions.contains_key(&child.address) {
                    if child.address.depth() < 3 {
                        scopes.push(child.address.clone());
                    }
                } else if !matches!(
                    child.kind,
                    ResourceKind::Group | ResourceKind::FeedSubscription
                ) {
                    candidates.push(child.address.clone());
                }
            }
        }
        candidates.sort();
        for candidate in candidates {
            info!(address = %candidate, "[APPLY] Pruning resource without definition");
            let deleted = self
                .delete(
                    &candidate,
                    &DeleteOptions {
                        recursive: true,
                        dry_run,
                    },
                )
                .await?;
            report.deleted.extend(deleted.deleted);
        }
        Ok(())
    }

    /// Deletes the resource at `address`; with `recursive`, its descendants
    /// first.
    pub async fn delete(&mut self, address: &Address, options: &DeleteOptions) -> Result<DeleteReport> {
        if address.is_root() {
            error!("Refusing to delete the root");
            return Err(SyncError::illegal_delete(address, "the root cannot be deleted"));
        }
        let plan = self.plan_delete(address, options.recursive).await.map_err(|e| {
            error!(error = %e, address = %address, "Delete rejected");
            e
        })?;

        let mut report = DeleteReport {
            deleted: Vec::with_capacity(plan.len()),
            dry_run: options.dry_run,
        };
        for resource in plan {
            if options.dry_run {
                info!(address = %resource.address, "[DRY RUN] Would delete");
            } else {
                info!(address = %resource.address, kind = %resource.kind, "[DELETE]");
                self.client.delete(&resource.path()?).await.map_err(|e| {
                    error!(error = ?e, address = %resource.address, "Unable to delete");
                    SyncError::from(e)
                })?;
                self.cache.forget(&resource.address);
            }
            report.deleted.push(resource.address);
        }
        Ok(report)
    }

    /// Every resource to remove, in removal order. Performs all checks.
    async fn plan_delete(&mut self, address: &Address, recursive: bool) -> Result<Vec<RemoteResource>> {
        let target = self.cache.resolve(self.client, address).await?;
        match target.kind {
            ResourceKind::Organization => {
                let pipelines = self.cache.children(self.client, address).await?;
                if !pipelines.is_empty() && !recursive {
                    return Err(SyncError::illegal_delete(
                        address,
                        "contains children, delete recursively",
                    ));
                }
                let mut plan = Vec::new();
                for pipeline in pipelines {
                    plan.extend(self.plan_pipeline_delete(pipeline, true).await?);
                }
                plan.push(target);
                Ok(plan)
            }
            ResourceKind::Pipeline => self.plan_pipeline_delete(target, recursive).await,
            _ => Ok(vec![target]),
        }
    }

    async fn plan_pipeline_delete(
        &mut self,
        pipeline: RemoteResource,
        recursive: bool,
    ) -> Result<Vec<RemoteResource>> {
        let children = self.cache.children(self.client, &pipeline.address).await?;
        let feeds: Vec<String> = self
            .cache
            .feeds_in(&pipeline.address)
            .iter()
            .map(|f| f.address.to_string())
            .collect();
        if !feeds.is_empty() {
            return Err(SyncError::illegal_delete(
                &pipeline.address,
                format!("pipeline publishes feeds: {}", feeds.join(", ")),
            ));
        }
        if !children.is_empty() && !recursive {
            return Err(SyncError::illegal_delete(
                &pipeline.address,
                "contains children, delete recursively",
            ));
        }
        let mut plan: Vec<RemoteResource> = delete_order(&children)
            .iter()
            .filter_map(|a| children.iter().find(|c| &c.address == a).cloned())
            .collect();
        plan.push(pipeline);
        Ok(plan)
    }

    /// Read-only listing of `address` and its children; descendants too
    /// when `recursive`. Groups and feed subscriptions only appear when
    /// listed by their own address.
    pub async fn list(&mut self, address: &Address, recursive: bool) -> Result<Vec<ListEntry>> {
        let mut entries = Vec::new();
        let mut stack: Vec<(RemoteResource, usize)> = Vec::new();
        if address.is_root() {
            for child in self.cache.children(self.client, address).await?.into_iter().rev() {
                stack.push((child, 0));
            }
        } else {
            stack.push((self.cache.resolve(self.client, address).await?, 0));
        }

        while let Some((resource, depth)) = stack.pop() {
            let is_origin = &resource.address == address;
            entries.push(ListEntry {
                depth,
                kind: resource.kind,
                path: resource.address.relative_to(address),
            });
            if (is_origin || recursive) && resource.address.depth() < 3 {
                let child_depth = if is_origin { depth } else { depth + 1 };
                let children = self.cache.children(self.client, &resource.address).await?;
                for child in children.into_iter().rev().filter(|c| is_listed(c.kind)) {
                    stack.push((child, child_depth));
                }
            }
        }
        Ok(entries)
    }

    /// Exports the remote resource at `address` as a document; with
    /// `recursive`, nested pipelines and pipeline children are included.
    pub async fn get(&mut self, address: &Address, recursive: bool) -> Result<ResourceDocument> {
        if address.is_root() {
            return Err(SyncError::invalid_definition(address, "the root cannot be exported"));
        }
        let resource = self.cache.resolve(self.client, address).await?;
        let body = match resource.kind {
            ResourceKind::Organization => {
                let mut spec = OrganizationSpec::default();
                if recursive {
                    for pipeline in self.cache.children(self.client, address).await? {
                        let nested = self.export_pipeline(&pipeline.address, true).await?;
                        spec.pipelines.push(named(&pipeline, nested));
                    }
                }
                DocumentBody::Organization(spec)
            }
            ResourceKind::Pipeline => {
                DocumentBody::Pipeline(self.export_pipeline(address, recursive).await?)
            }
            ResourceKind::Group => DocumentBody::Group(GroupSpec {}),
            ResourceKind::FeedSubscription => {
                return Err(SyncError::invalid_definition(
                    address,
                    "subscriptions are managed automatically",
                ))
            }
            ResourceKind::Feed => DocumentBody::Feed(self.export_feed(&resource).await?),
            _ => DocumentBody::Component(self.export_component(&resource).await?),
        };
        Ok(ResourceDocument {
            version: SUPPORTED_VERSION,
            id: address.leaf().map(str::to_string),
            name: resource.name().map(str::to_string),
            description: resource.description().map(str::to_string),
            body,
        })
    }

    async fn export_pipeline(&mut self, address: &Address, recursive: bool) -> Result<PipelineSpec> {
        let mut spec = PipelineSpec::default();
        if !recursive {
            return Ok(spec);
        }
        for child in self.cache.children(self.client, address).await? {
            match child.kind {
                ResourceKind::Group => spec.groups.push(named(&child, GroupSpec {})),
                ResourceKind::Feed => {
                    let feed = self.export_feed(&child).await?;
                    spec.feeds.push(named(&child, feed));
                }
                ResourceKind::FeedSubscription => {}
                _ => {
                    let component = self.export_component(&child).await?;
                    spec.components.push(named(&child, component));
                }
            }
        }
        Ok(spec)
    }

    async fn export_component(&mut self, resource: &RemoteResource) -> Result<ComponentSpec> {
        let config = |key: &str| {
            resource
                .payload
                .get(key)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default()
        };
        let details = match resource.kind {
            ResourceKind::ReadConnector => ComponentDetails::ReadConnector(ReadConnectorSpec {
                config: config("source"),
            }),
            ResourceKind::Transform => ComponentDetails::Transform(TransformSpec {
                input_ids: resource
                    .upstream_uuids()
                    .iter()
                    .map(|uuid| self.reference_id(uuid))
                    .collect(),
                config: config("view"),
            }),
            ResourceKind::WriteConnector => ComponentDetails::WriteConnector(WriteConnectorSpec {
                input_id: self.single_input_id(resource),
                config: config("sink"),
            }),
            other => {
                return Err(SyncError::invalid_definition(
                    &resource.address,
                    format!("a {other} is not a component"),
                ))
            }
        };
        Ok(ComponentSpec {
            group_id: self.group_id_of(resource).await?,
            details,
        })
    }

    async fn export_feed(&mut self, resource: &RemoteResource) -> Result<FeedSpec> {
        let all = resource
            .payload
            .get("open")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let role_ids: Vec<String> = resource
            .payload
            .get("pubToRoles")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .split(',')
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .collect();

        let own = resource.address.scope().unwrap_or_default().to_string();
        let mut organizations = Vec::new();
        if !role_ids.is_empty() {
            let roles = self.cache.roles(self.client).await?.to_vec();
            for role_id in &role_ids {
                let org = roles
                    .iter()
                    .find(|r| r.get("uuid").and_then(Value::as_str) == Some(role_id.as_str()))
                    .and_then(|r| r.get("orgId").and_then(Value::as_str))
                    .and_then(|org_uuid| self.cache.by_uuid(org_uuid))
                    .and_then(|org| org.address.leaf().map(str::to_string));
                match org {
                    Some(org) => organizations.push(org),
                    None => debug!(role = %role_id, "Shared with an unknown role"),
                }
            }
        }
        let hidden = !all && !organizations.contains(&own);
        organizations.retain(|o| o != &own);

        Ok(FeedSpec {
            input_id: self.single_input_id(resource),
            group_id: self.group_id_of(resource).await?,
            sharing: Sharing {
                all,
                organizations,
                hidden,
            },
        })
    }

    fn single_input_id(&self, resource: &RemoteResource) -> String {
        resource
            .payload
            .get("inputUUID")
            .and_then(Value::as_str)
            .map(|uuid| self.reference_id(uuid))
            .unwrap_or_default()
    }

    /// Input id for an upstream uuid: the sibling id, or `scope.feed` when
    /// the input is a feed subscription.
    fn reference_id(&self, uuid: &str) -> String {
        let Some(input) = self.cache.by_uuid(uuid) else {
            return uuid.to_string();
        };
        let leaf = input.address.leaf().unwrap_or_default().to_string();
        if input.kind != ResourceKind::FeedSubscription {
            return leaf;
        }
        input
            .payload
            .get("pubUUID")
            .and_then(Value::as_str)
            .and_then(|feed| self.cache.by_uuid(feed))
            .and_then(|feed| Some(format!("{}.{}", feed.address.scope()?, feed.address.leaf()?)))
            .unwrap_or(leaf)
    }

    async fn group_id_of(&mut self, resource: &RemoteResource) -> Result<Option<String>> {
        let pipeline = resource.address.parent();
        let children = self.cache.children(self.client, &pipeline).await?;
        Ok(children
            .iter()
            .filter(|c| c.kind == ResourceKind::Group)
            .find(|g| g.upstream_uuids().contains(&resource.uuid))
            .and_then(|g| g.address.leaf().map(str::to_string)))
    }

    /// Streams records of a readable component. Zero means "not set" for
    /// both `offset` and `limit`.
    pub async fn records(&mut self, address: &Address, offset: u64, limit: u64) -> Result<Vec<Value>> {
        let resource = self.cache.resolve(self.client, address).await?;
        if !resource.kind.is_readable() {
            return Err(SyncError::NotReadable {
                address: address.clone(),
                kind: resource.kind,
            });
        }
        let mut query = Vec::new();
        if offset > 0 {
            query.push(("offset".to_string(), offset.to_string()));
        }
        if limit > 0 {
            query.push(("limit".to_string(), limit.to_string()));
        }
        let path = format!("{}/records-stream", resource_path(resource.kind, address)?);
        debug!(address = %address, path = %path, "Streaming records");
        self.client.stream(&path, query).await.map_err(|e| {
            error!(error = ?e, address = %address, "Unable to stream records");
            SyncError::from(e)
        })
    }
}

fn is_listed(kind: ResourceKind) -> bool {
    !matches!(kind, ResourceKind::Group | ResourceKind::FeedSubscription)
}

fn named<T>(resource: &RemoteResource, spec: T) -> Named<T> {
    Named {
        id: resource.address.leaf().unwrap_or_default().to_string(),
        name: resource.name().map(str::to_string),
        description: resource.description().map(str::to_string),
        spec,
    }
}
