//! Component input references and their resolution to remote resources.
//!
//! A bare id names a sibling in the same pipeline. `scope.feed` names a feed
//! published by another organization; consuming it requires a subscription
//! in the consuming pipeline. Resolving such a reference may therefore
//! create a subscription, which happens in two steps: [`ReferenceResolver::plan`]
//! finds or plans the subscription and [`ReferenceResolver::commit`] creates
//! it. Dry runs stop after planning.

use serde_json::Value;
use tracing::{info, warn};

use crate::address::{Address, SEPARATOR};
use crate::cache::ResourceCache;
use crate::contract::SessionClient;
use crate::definition::{PayloadContext, ResourceDefinition};
use crate::error::{Result, SyncError};
use crate::remote::{RemoteResource, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Sibling(String),
    Feed { scope: String, feed: String },
}

impl Reference {
    /// Parses an input id declared by the resource at `at`.
    pub fn parse(raw: &str, at: &Address) -> Result<Self> {
        let invalid = || SyncError::InvalidReference {
            reference: raw.to_string(),
            address: at.clone(),
        };
        let parts: Vec<&str> = raw.split(SEPARATOR).collect();
        match parts.as_slice() {
            [id] if !id.is_empty() => Ok(Reference::Sibling(id.to_string())),
            [scope, feed] if !scope.is_empty() && !feed.is_empty() => Ok(Reference::Feed {
                scope: scope.to_string(),
                feed: feed.to_string(),
            }),
            _ => Err(invalid()),
        }
    }

    /// Address that has to exist before the reference can resolve, seen
    /// from `pipeline`.
    pub fn dependency_address(&self, pipeline: &Address) -> Address {
        match self {
            Reference::Sibling(id) => Address::resource(
                pipeline.scope().unwrap_or_default(),
                pipeline.pipeline_id().unwrap_or_default(),
                id.as_str(),
            ),
            Reference::Feed { scope, .. } => Address::organization(scope.as_str()),
        }
    }
}

/// A subscription that must be created before a feed reference resolves.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPlan {
    pub feed: RemoteResource,
    pub definition: ResourceDefinition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Resolved(RemoteResource),
    NeedsSubscription(SubscriptionPlan),
}

pub struct ReferenceResolver<'s, C: ?Sized> {
    cache: &'s mut ResourceCache,
    client: &'s C,
}

impl<'s, C> ReferenceResolver<'s, C>
where
    C: SessionClient + ?Sized,
{
    pub fn new(cache: &'s mut ResourceCache, client: &'s C) -> Self {
        ReferenceResolver { cache, client }
    }

    /// Resolves `reference` as seen from `pipeline`, without mutating the
    /// remote.
    pub async fn plan(&mut self, pipeline: &Address, reference: &Reference) -> Result<Resolution> {
        match reference {
            Reference::Sibling(_) => {
                let address = reference.dependency_address(pipeline);
                Ok(Resolution::Resolved(
                    self.cache.resolve(self.client, &address).await?,
                ))
            }
            Reference::Feed { scope, feed } => {
                let upstream = self.cache.find_feed(self.client, scope, feed).await?;
                self.cache.ensure_scope_loaded(self.client, pipeline).await?;
                let existing = self
                    .cache
                    .subscriptions_in(pipeline)
                    .into_iter()
                    .find(|s| {
                        s.payload.get("pubUUID").and_then(Value::as_str)
                            == Some(upstream.uuid.as_str())
                    })
                    .cloned();
                match existing {
                    Some(subscription) => Ok(Resolution::Resolved(subscription)),
                    None => Ok(Resolution::NeedsSubscription(SubscriptionPlan {
                        definition: ResourceDefinition::subscription(pipeline, &upstream)?,
                        feed: upstream,
                    })),
                }
            }
        }
    }

    /// Creates the planned subscription and caches it.
    pub async fn commit(&mut self, plan: SubscriptionPlan) -> Result<RemoteResource> {
        let address = plan.definition.address.clone();
        info!(
            address = %address,
            feed = %plan.feed.address,
            "[APPLY] Creating subscription"
        );
        let payload = plan.definition.to_remote_payload(&PayloadContext::default())?;
        let (subscription, _) =
            RemoteResource::upsert(self.client, ResourceKind::FeedSubscription, &address, payload)
                .await?;
        self.cache.remember(subscription.clone());
        Ok(subscription)
    }

    /// Plans and, unless `dry_run`, commits. A dry-run subscription plan is
    /// logged and reported as `None`.
    pub async fn resolve(
        &mut self,
        pipeline: &Address,
        reference: &Reference,
        dry_run: bool,
    ) -> Result<(Option<RemoteResource>, Option<Address>)> {
        match self.plan(pipeline, reference).await? {
            Resolution::Resolved(resource) => Ok((Some(resource), None)),
            Resolution::NeedsSubscription(plan) if dry_run => {
                warn!(
                    address = %plan.definition.address,
                    feed = %plan.feed.address,
                    "[DRY RUN] Would create subscription"
                );
                Ok((None, None))
            }
            Resolution::NeedsSubscription(plan) => {
                let subscription = self.commit(plan).await?;
                let created = subscription.address.clone();
                Ok((Some(subscription), Some(created)))
            }
        }
    }
}
