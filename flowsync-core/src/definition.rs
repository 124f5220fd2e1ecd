//! Authored resource documents and the typed definitions derived from them.
//!
//! A [`ResourceDocument`] is what a user writes (and what `get` exports):
//!
//! ```yaml
//! version: 7
//! id: my_pipeline
//! name: My pipeline
//! pipeline:
//!   components:
//!     - id: source
//!       readConnector: { container: { s3: { bucket: b } } }
//!     - id: clean
//!       groupId: staging
//!       transform: { inputIds: [source], operator: { sqlQuery: { sql: "..." } } }
//!   groups:
//!     - id: staging
//!       name: Staging
//!   feeds:
//!     - id: clean_feed
//!       inputId: clean
//!       sharing: { all: true }
//! ```
//!
//! [`ResourceDefinition`] is the flattened, addressed form the scheduler and
//! reconciler work with. Nested documents become separate definitions through
//! [`ResourceDefinition::contained_definitions`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::address::Address;
use crate::error::{Result, SyncError};
use crate::remote::{RemoteResource, ResourceKind};
use crate::resolver::Reference;

/// Highest document schema version this engine understands.
pub const SUPPORTED_VERSION: u32 = 7;

fn default_version() -> u32 {
    SUPPORTED_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub body: DocumentBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DocumentBody {
    Organization(OrganizationSpec),
    Pipeline(PipelineSpec),
    Component(ComponentSpec),
    Group(GroupSpec),
    Feed(FeedSpec),
}

/// A nested document: id, name and description next to the kind's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Named<T> {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub spec: T,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipelines: Vec<Named<PipelineSpec>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<Named<ComponentSpec>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<Named<GroupSpec>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feeds: Vec<Named<FeedSpec>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(flatten)]
    pub details: ComponentDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentDetails {
    ReadConnector(ReadConnectorSpec),
    Transform(TransformSpec),
    WriteConnector(WriteConnectorSpec),
}

/// Connector configuration is passed through to the API untouched, apart
/// from credential injection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadConnectorSpec {
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    pub input_ids: Vec<String>,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteConnectorSpec {
    pub input_id: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedSpec {
    /// Sibling component (same pipeline) the feed publishes.
    pub input_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub sharing: Sharing,
}

/// Who may subscribe to a feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sharing {
    /// Open to every organization.
    #[serde(default)]
    pub all: bool,
    /// Organizations granted access when not open to all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizations: Vec<String>,
    /// Hide the feed from its own organization.
    #[serde(default)]
    pub hidden: bool,
}

/// Kind-specific part of a [`ResourceDefinition`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Organization(OrganizationSpec),
    Pipeline(PipelineSpec),
    Group,
    ReadConnector {
        group_id: Option<String>,
        spec: ReadConnectorSpec,
    },
    Transform {
        group_id: Option<String>,
        spec: TransformSpec,
    },
    WriteConnector {
        group_id: Option<String>,
        spec: WriteConnectorSpec,
    },
    Feed(FeedSpec),
    FeedSubscription {
        /// Remote identifier of the upstream feed.
        upstream_uuid: String,
    },
}

/// Remote values a payload needs that only exist once dependencies are
/// applied.
#[derive(Debug, Clone, Default)]
pub struct PayloadContext {
    /// Resolved component inputs, in declaration order.
    pub inputs: Vec<RemoteResource>,
    /// Resolved group content.
    pub members: Vec<RemoteResource>,
    /// Role identifiers a feed is published to.
    pub pub_to_roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDefinition {
    pub address: Address,
    pub name: String,
    pub description: String,
    pub payload: Payload,
}

impl ResourceDefinition {
    /// Builds a definition from a loaded document.
    ///
    /// `at` is the full address of the resource, or its parent when the
    /// document carries an `id`. A document newer than
    /// [`SUPPORTED_VERSION`] is rejected.
    pub fn from_document(document: &ResourceDocument, at: &Address) -> Result<Self> {
        if document.version > SUPPORTED_VERSION {
            return Err(SyncError::VersionMismatch {
                found: document.version,
                supported: SUPPORTED_VERSION,
            });
        }
        let level = match &document.body {
            DocumentBody::Organization(_) => 1,
            DocumentBody::Pipeline(_) => 2,
            _ => 3,
        };
        let address = if at.depth() == level {
            at.clone()
        } else if at.depth() + 1 == level {
            let id = document.id.as_deref().ok_or_else(|| {
                SyncError::invalid_definition(at, "missing id for resource below this address")
            })?;
            at.extend(id)?
        } else {
            return Err(SyncError::invalid_definition(
                at,
                format!("a level {level} resource cannot live here"),
            ));
        };
        let payload = match &document.body {
            DocumentBody::Organization(spec) => Payload::Organization(spec.clone()),
            DocumentBody::Pipeline(spec) => Payload::Pipeline(spec.clone()),
            DocumentBody::Component(spec) => component_payload(spec),
            DocumentBody::Group(_) => Payload::Group,
            DocumentBody::Feed(spec) => Payload::Feed(spec.clone()),
        };
        Ok(Self::new(
            address,
            document.name.clone(),
            document.description.clone(),
            payload,
        ))
    }

    fn new(
        address: Address,
        name: Option<String>,
        description: Option<String>,
        payload: Payload,
    ) -> Self {
        let name = name
            .or_else(|| address.leaf().map(str::to_string))
            .unwrap_or_default();
        ResourceDefinition {
            address,
            name,
            description: description.unwrap_or_default(),
            payload,
        }
    }

    fn from_named<T>(parent: &Address, named: &Named<T>, payload: Payload) -> Result<Self> {
        Ok(Self::new(
            parent.extend(&named.id)?,
            named.name.clone(),
            named.description.clone(),
            payload,
        ))
    }

    /// The auto-managed subscription to `feed` inside `pipeline`.
    pub fn subscription(pipeline: &Address, feed: &RemoteResource) -> Result<Self> {
        let feed_id = feed.address.leaf().unwrap_or_default();
        let id = format!("sub_for_{feed_id}");
        Ok(ResourceDefinition {
            address: pipeline.extend(&id)?,
            name: id,
            description: "Auto-generated sub".to_string(),
            payload: Payload::FeedSubscription {
                upstream_uuid: feed.uuid.clone(),
            },
        })
    }

    pub fn kind(&self) -> ResourceKind {
        match &self.payload {
            Payload::Organization(_) => ResourceKind::Organization,
            Payload::Pipeline(_) => ResourceKind::Pipeline,
            Payload::Group => ResourceKind::Group,
            Payload::ReadConnector { .. } => ResourceKind::ReadConnector,
            Payload::Transform { .. } => ResourceKind::Transform,
            Payload::WriteConnector { .. } => ResourceKind::WriteConnector,
            Payload::Feed(_) => ResourceKind::Feed,
            Payload::FeedSubscription { .. } => ResourceKind::FeedSubscription,
        }
    }

    pub fn pipeline_address(&self) -> Address {
        match self.address.depth() {
            3 => self.address.parent(),
            _ => self.address.clone(),
        }
    }

    /// Raw input references, in declaration order.
    pub fn input_ids(&self) -> Vec<&str> {
        match &self.payload {
            Payload::Transform { spec, .. } => spec.input_ids.iter().map(String::as_str).collect(),
            Payload::WriteConnector { spec, .. } => vec![spec.input_id.as_str()],
            Payload::Feed(spec) => vec![spec.input_id.as_str()],
            _ => Vec::new(),
        }
    }

    /// Parsed input references.
    pub fn references(&self) -> Result<Vec<Reference>> {
        self.input_ids()
            .into_iter()
            .map(|raw| Reference::parse(raw, &self.address))
            .collect()
    }

    /// Group the resource declares itself a member of.
    pub fn group_address(&self) -> Option<Address> {
        let group_id = match &self.payload {
            Payload::ReadConnector { group_id, .. }
            | Payload::Transform { group_id, .. }
            | Payload::WriteConnector { group_id, .. } => group_id.as_deref(),
            Payload::Feed(spec) => spec.group_id.as_deref(),
            _ => None,
        }?;
        Address::resource(self.address.scope()?, self.address.pipeline_id()?, group_id).into()
    }

    /// Addresses that must exist before this definition is applied.
    pub fn dependencies(&self) -> Result<Vec<Address>> {
        let scope_address = || self.address.parent();
        let mut deps = match &self.payload {
            Payload::Organization(_) => Vec::new(),
            Payload::Pipeline(_) => vec![scope_address()],
            Payload::Group | Payload::FeedSubscription { .. } => vec![scope_address()],
            Payload::Feed(_) => {
                let mut deps = self.reference_dependencies()?;
                deps.push(scope_address());
                deps
            }
            Payload::ReadConnector { .. }
            | Payload::Transform { .. }
            | Payload::WriteConnector { .. } => {
                let pipeline = scope_address();
                let mut deps = self.reference_dependencies()?;
                deps.push(pipeline.parent());
                deps.push(pipeline);
                deps
            }
        };
        deps.retain(|d| d != &self.address);
        let mut seen = std::collections::HashSet::new();
        deps.retain(|d| seen.insert(d.clone()));
        Ok(deps)
    }

    fn reference_dependencies(&self) -> Result<Vec<Address>> {
        let pipeline = self.pipeline_address();
        Ok(self
            .references()?
            .iter()
            .map(|r| r.dependency_address(&pipeline))
            .collect())
    }

    /// Addresses that must be re-applied after this one when present.
    pub fn dependees(&self) -> Vec<Address> {
        self.group_address().into_iter().collect()
    }

    /// Definitions nested inside this one (pipelines of an organization;
    /// components, groups and feeds of a pipeline).
    pub fn contained_definitions(&self) -> Result<Vec<ResourceDefinition>> {
        let mut contained = Vec::new();
        match &self.payload {
            Payload::Organization(spec) => {
                for pipeline in &spec.pipelines {
                    contained.push(Self::from_named(
                        &self.address,
                        pipeline,
                        Payload::Pipeline(pipeline.spec.clone()),
                    )?);
                }
            }
            Payload::Pipeline(spec) => {
                for component in &spec.components {
                    contained.push(Self::from_named(
                        &self.address,
                        component,
                        component_payload(&component.spec),
                    )?);
                }
                for group in &spec.groups {
                    contained.push(Self::from_named(&self.address, group, Payload::Group)?);
                }
                for feed in &spec.feeds {
                    contained.push(Self::from_named(
                        &self.address,
                        feed,
                        Payload::Feed(feed.spec.clone()),
                    )?);
                }
            }
            _ => {}
        }
        Ok(contained)
    }

    /// Connector configuration that credentials are injected into.
    pub fn connector_config_mut(&mut self) -> Option<&mut Map<String, Value>> {
        match &mut self.payload {
            Payload::ReadConnector { spec, .. } => Some(&mut spec.config),
            Payload::Transform { spec, .. } => Some(&mut spec.config),
            Payload::WriteConnector { spec, .. } => Some(&mut spec.config),
            _ => None,
        }
    }

    /// JSON body sent on create or update.
    pub fn to_remote_payload(&self, context: &PayloadContext) -> Result<Value> {
        let mut body = Map::new();
        body.insert("id".into(), json!(self.address.leaf().unwrap_or_default()));
        body.insert("name".into(), json!(self.name));
        body.insert("description".into(), json!(self.description));
        let single_input = || {
            context.inputs.first().ok_or_else(|| {
                SyncError::invalid_definition(&self.address, "input was not resolved")
            })
        };
        match &self.payload {
            Payload::Organization(_) | Payload::Pipeline(_) => {}
            Payload::Group => {
                body.insert(
                    "content".into(),
                    Value::Array(context.members.iter().map(RemoteResource::reference).collect()),
                );
            }
            Payload::ReadConnector { spec, .. } => {
                body.insert("source".into(), Value::Object(spec.config.clone()));
            }
            Payload::Transform { spec, .. } => {
                if context.inputs.len() != spec.input_ids.len() {
                    return Err(SyncError::invalid_definition(
                        &self.address,
                        "not every input was resolved",
                    ));
                }
                body.insert(
                    "inputs".into(),
                    Value::Array(context.inputs.iter().map(RemoteResource::reference).collect()),
                );
                body.insert("view".into(), Value::Object(spec.config.clone()));
            }
            Payload::WriteConnector { spec, .. } => {
                let input = single_input()?;
                body.insert("inputType".into(), json!(input.kind.api_type()));
                body.insert("inputUUID".into(), json!(input.uuid));
                body.insert("sink".into(), Value::Object(spec.config.clone()));
            }
            Payload::Feed(spec) => {
                let input = single_input()?;
                body.insert("inputType".into(), json!(input.kind.api_type()));
                body.insert("inputUUID".into(), json!(input.uuid));
                body.insert("open".into(), json!(spec.sharing.all));
                let roles = if spec.sharing.all {
                    String::new()
                } else {
                    context.pub_to_roles.join(",")
                };
                body.insert("pubToRoles".into(), json!(roles));
            }
            Payload::FeedSubscription { upstream_uuid } => {
                body.insert("pubUUID".into(), json!(upstream_uuid));
            }
        }
        Ok(Value::Object(body))
    }
}

fn component_payload(spec: &ComponentSpec) -> Payload {
    let group_id = spec.group_id.clone();
    match &spec.details {
        ComponentDetails::ReadConnector(s) => Payload::ReadConnector {
            group_id,
            spec: s.clone(),
        },
        ComponentDetails::Transform(s) => Payload::Transform {
            group_id,
            spec: s.clone(),
        },
        ComponentDetails::WriteConnector(s) => Payload::WriteConnector {
            group_id,
            spec: s.clone(),
        },
    }
}

/// Flattens `definition` and everything it contains, depth first.
pub fn flatten(definition: ResourceDefinition) -> Result<Vec<ResourceDefinition>> {
    let mut out = Vec::new();
    let mut stack = vec![definition];
    while let Some(next) = stack.pop() {
        let mut contained = next.contained_definitions()?;
        contained.reverse();
        out.push(next);
        stack.extend(contained);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_doc() -> ResourceDocument {
        serde_json::from_value(json!({
            "version": 7,
            "id": "pipe",
            "name": "Pipe",
            "pipeline": {
                "components": [
                    {"id": "source", "readConnector": {"container": {"s3": {"bucket": "b"}}}},
                    {"id": "transform", "groupId": "group1",
                     "transform": {"inputIds": ["source", "other.feed"], "operator": {}}},
                    {"id": "sink", "writeConnector": {"inputId": "transform"}}
                ],
                "groups": [{"id": "group1", "name": "Group One"}],
                "feeds": [{"id": "out", "inputId": "transform", "sharing": {"all": true}}]
            }
        }))
        .unwrap()
    }

    #[test]
    fn document_under_parent_takes_its_id() {
        let def = ResourceDefinition::from_document(&pipeline_doc(), &Address::organization("ds"))
            .unwrap();
        assert_eq!(def.address, Address::pipeline("ds", "pipe"));
        assert_eq!(def.name, "Pipe");
        assert_eq!(def.kind(), ResourceKind::Pipeline);
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut doc = pipeline_doc();
        doc.version = SUPPORTED_VERSION + 1;
        match ResourceDefinition::from_document(&doc, &Address::pipeline("ds", "pipe")) {
            Err(SyncError::VersionMismatch { found, supported }) => {
                assert_eq!(found, SUPPORTED_VERSION + 1);
                assert_eq!(supported, SUPPORTED_VERSION);
            }
            other => panic!("expected VersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn pipeline_flattens_into_children() {
        let def =
            ResourceDefinition::from_document(&pipeline_doc(), &Address::pipeline("ds", "pipe"))
                .unwrap();
        let all = flatten(def).unwrap();
        let addresses: Vec<String> = all.iter().map(|d| d.address.to_string()).collect();
        assert_eq!(
            addresses,
            vec![
                "ds.pipe",
                "ds.pipe.source",
                "ds.pipe.transform",
                "ds.pipe.sink",
                "ds.pipe.group1",
                "ds.pipe.out"
            ]
        );
        assert_eq!(all[4].kind(), ResourceKind::Group);
        assert_eq!(all[4].name, "Group One");
        assert_eq!(all[5].kind(), ResourceKind::Feed);
    }

    #[test]
    fn component_dependencies_and_dependees() {
        let def =
            ResourceDefinition::from_document(&pipeline_doc(), &Address::pipeline("ds", "pipe"))
                .unwrap();
        let transform = flatten(def)
            .unwrap()
            .into_iter()
            .find(|d| d.address == Address::resource("ds", "pipe", "transform"))
            .unwrap();
        assert_eq!(
            transform.dependencies().unwrap(),
            vec![
                Address::resource("ds", "pipe", "source"),
                Address::organization("other"),
                Address::organization("ds"),
                Address::pipeline("ds", "pipe"),
            ]
        );
        assert_eq!(
            transform.dependees(),
            vec![Address::resource("ds", "pipe", "group1")]
        );
    }

    #[test]
    fn dependencies_never_include_self() {
        let doc: ResourceDocument = serde_json::from_value(json!({
            "id": "loop",
            "component": {"transform": {"inputIds": ["loop"]}}
        }))
        .unwrap();
        let def = ResourceDefinition::from_document(&doc, &Address::pipeline("ds", "p")).unwrap();
        assert!(!def.dependencies().unwrap().contains(&def.address));
    }

    #[test]
    fn feed_payload_carries_sharing() {
        let def =
            ResourceDefinition::from_document(&pipeline_doc(), &Address::pipeline("ds", "pipe"))
                .unwrap();
        let feed = flatten(def).unwrap().pop().unwrap();
        let input = RemoteResource::from_payload(
            Address::resource("ds", "pipe", "transform"),
            ResourceKind::Transform,
            json!({"uuid": "t-uuid"}),
        )
        .unwrap();
        let payload = feed
            .to_remote_payload(&PayloadContext {
                inputs: vec![input],
                ..Default::default()
            })
            .unwrap();
        assert_eq!(payload["inputUUID"], "t-uuid");
        assert_eq!(payload["inputType"], "view");
        assert_eq!(payload["open"], true);
        assert_eq!(payload["pubToRoles"], "");
    }

    #[test]
    fn subscription_name_is_deterministic() {
        let feed = RemoteResource::from_payload(
            Address::resource("up", "p", "orders"),
            ResourceKind::Feed,
            json!({"uuid": "feed-uuid"}),
        )
        .unwrap();
        let sub = ResourceDefinition::subscription(&Address::pipeline("ds", "pipe"), &feed).unwrap();
        assert_eq!(sub.address, Address::resource("ds", "pipe", "sub_for_orders"));
        let payload = sub.to_remote_payload(&PayloadContext::default()).unwrap();
        assert_eq!(payload["pubUUID"], "feed-uuid");
    }
}
