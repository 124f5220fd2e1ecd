#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use flowsync_core::contract::{LoadedDocument, MockDefinitionLoader, SessionClient};
use flowsync_core::{Address, ClientError, ResourceDocument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Post(String),
    Patch(String),
    Delete(String),
}

impl Mutation {
    pub fn path(&self) -> &str {
        match self {
            Mutation::Post(p) | Mutation::Patch(p) | Mutation::Delete(p) => p,
        }
    }
}

#[derive(Default)]
struct State {
    resources: BTreeMap<String, Value>,
    records: BTreeMap<String, Vec<Value>>,
    roles: Vec<Value>,
    mutations: Vec<Mutation>,
    next_uuid: u64,
}

impl State {
    fn uuid(&mut self) -> String {
        self.next_uuid += 1;
        format!("uuid-{}", self.next_uuid)
    }
}

/// In-memory remote speaking the same path scheme as the real API.
#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').collect()
}

fn singular(collection: &str) -> &str {
    collection.strip_suffix('s').unwrap_or(collection)
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an existing resource at `path`, assigning a uuid and, for
    /// pipeline children, a `type` when missing.
    pub fn seed(&self, path: &str, mut body: Value) -> String {
        let mut state = self.state.lock().unwrap();
        let parts = segments(path);
        if body.get("uuid").is_none() {
            body["uuid"] = json!(state.uuid());
        }
        if body.get("id").is_none() {
            body["id"] = json!(parts[parts.len() - 1]);
        }
        if parts.len() == 6 && body.get("type").is_none() {
            body["type"] = json!(singular(parts[4]));
        }
        let uuid = body["uuid"].as_str().unwrap().to_string();
        state.resources.insert(path.to_string(), body);
        uuid
    }

    pub fn seed_role(&self, role: Value) {
        self.state.lock().unwrap().roles.push(role);
    }

    pub fn seed_records(&self, path: &str, rows: Vec<Value>) {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(path.to_string(), rows);
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.lock().unwrap().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state.lock().unwrap().mutations.clear();
    }

    pub fn resource(&self, path: &str) -> Option<Value> {
        self.state.lock().unwrap().resources.get(path).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.resource(path).is_some()
    }

    pub fn uuid_of(&self, path: &str) -> String {
        self.resource(path)
            .and_then(|r| r["uuid"].as_str().map(str::to_string))
            .unwrap_or_default()
    }

    fn listing(&self, path: &str) -> Option<Value> {
        let state = self.state.lock().unwrap();
        let parts = segments(path);
        let belongs = |candidate: &str| -> bool {
            let c = segments(candidate);
            match parts.as_slice() {
                ["organizations"] => c.len() == 2,
                ["organizations", org, "projects"] => {
                    c.len() == 4 && c[1] == *org && c[2] == "projects"
                }
                ["organizations", org, "projects", pipeline, "components"] => {
                    c.len() == 6 && c[1] == *org && c[3] == *pipeline && c[4] != "groups"
                }
                ["organizations", org, "projects", pipeline, "groups"] => {
                    c.len() == 6 && c[1] == *org && c[3] == *pipeline && c[4] == "groups"
                }
                _ => false,
            }
        };
        let is_listing = matches!(
            parts.as_slice(),
            ["organizations"]
                | ["organizations", _, "projects"]
                | ["organizations", _, "projects", _, "components"]
                | ["organizations", _, "projects", _, "groups"]
        );
        if !is_listing {
            return None;
        }
        if parts.len() > 1 {
            let parent = parts[..parts.len() - 1].join("/");
            if !state.resources.contains_key(&parent) {
                return Some(Value::Null);
            }
        }
        let items: Vec<Value> = state
            .resources
            .iter()
            .filter(|(p, _)| belongs(p))
            .map(|(_, v)| v.clone())
            .collect();
        Some(json!({ "data": items }))
    }
}

#[async_trait]
impl SessionClient for FakeRemote {
    async fn get(&self, path: &str) -> Result<Value, ClientError> {
        if path == "roles" {
            let roles = self.state.lock().unwrap().roles.clone();
            return Ok(json!({ "data": roles }));
        }
        match self.listing(path) {
            Some(Value::Null) => return Err(ClientError::NotFound(path.to_string())),
            Some(listing) => return Ok(listing),
            None => {}
        }
        self.resource(path)
            .map(|r| json!({ "data": r }))
            .ok_or_else(|| ClientError::NotFound(path.to_string()))
    }

    async fn post(&self, path: &str, mut document: Value) -> Result<u16, ClientError> {
        let mut state = self.state.lock().unwrap();
        let id = document["id"]
            .as_str()
            .ok_or_else(|| ClientError::Transport("missing id".into()))?
            .to_string();
        let resource_path = format!("{path}/{id}");
        let parts = segments(&resource_path);
        document["uuid"] = json!(state.uuid());
        if parts.len() == 6 {
            document["type"] = json!(singular(parts[4]));
        }
        state.resources.insert(resource_path.clone(), document);
        state.mutations.push(Mutation::Post(resource_path));
        Ok(201)
    }

    async fn patch(&self, path: &str, document: Value) -> Result<u16, ClientError> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .resources
            .get_mut(path)
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
        if let (Value::Object(target), Value::Object(update)) = (existing, document) {
            for (key, value) in update {
                if key != "uuid" && key != "type" {
                    target.insert(key, value);
                }
            }
        }
        state.mutations.push(Mutation::Patch(path.to_string()));
        Ok(200)
    }

    async fn delete(&self, path: &str) -> Result<u16, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.resources.remove(path).is_none() {
            return Err(ClientError::NotFound(path.to_string()));
        }
        let prefix = format!("{path}/");
        state.resources.retain(|p, _| !p.starts_with(&prefix));
        state.mutations.push(Mutation::Delete(path.to_string()));
        Ok(204)
    }

    async fn stream(
        &self,
        path: &str,
        query: Vec<(String, String)>,
    ) -> Result<Vec<Value>, ClientError> {
        let state = self.state.lock().unwrap();
        let resource = path.trim_end_matches("/records-stream");
        let rows = state
            .records
            .get(resource)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;
        let param = |name: &str| {
            query
                .iter()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| v.parse::<usize>().ok())
        };
        let offset = param("offset").unwrap_or(0);
        let limit = param("limit").unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }
}

/// Loader returning fixed documents regardless of the render config.
pub fn loader(documents: Vec<(Address, Value)>) -> MockDefinitionLoader {
    let loaded: Vec<LoadedDocument> = documents
        .into_iter()
        .map(|(address, document)| LoadedDocument {
            address,
            document: serde_json::from_value::<ResourceDocument>(document).unwrap(),
        })
        .collect();
    let mut loader = MockDefinitionLoader::new();
    loader
        .expect_load_tree()
        .returning(move |_, _| Ok(loaded.clone()));
    loader
}

/// Remote with organization `ds` and nothing else.
pub fn remote_with_org() -> FakeRemote {
    let remote = FakeRemote::new();
    remote.seed("organizations/ds", json!({"name": "Data Service"}));
    remote
}

pub fn example_pipeline() -> Value {
    json!({
        "version": 7,
        "id": "p",
        "name": "Pipeline",
        "pipeline": {
            "components": [
                {"id": "source", "groupId": "group1",
                 "readConnector": {"container": {"s3": {"bucket": "in"}}}},
                {"id": "transform", "groupId": "group1",
                 "transform": {"inputIds": ["source"], "operator": {"sqlQuery": {"sql": "SELECT 1"}}}},
                {"id": "sink", "groupId": "group1",
                 "writeConnector": {"inputId": "transform", "container": {"s3": {"bucket": "out"}}}}
            ],
            "groups": [{"id": "group1", "name": "Group 1"}]
        }
    })
}
