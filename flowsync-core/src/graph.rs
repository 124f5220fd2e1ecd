//! Dependency graph over addresses and the orders derived from it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error};

use crate::address::Address;
use crate::definition::{Payload, ResourceDefinition};
use crate::error::{Result, SyncError};
use crate::remote::{RemoteResource, ResourceKind};
use crate::resolver::Reference;

/// Directed graph where an edge `a -> b` means `a` must be applied before `b`.
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: BTreeSet<Address>,
    successors: BTreeMap<Address, BTreeSet<Address>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: &Address) {
        self.nodes.insert(node.clone());
    }

    pub fn add_edge(&mut self, before: &Address, after: &Address) {
        if before == after {
            return;
        }
        self.add_node(before);
        self.add_node(after);
        self.successors
            .entry(before.clone())
            .or_default()
            .insert(after.clone());
    }

    /// Links local definitions by their dependencies and dependees. A feed
    /// reference `scope.feed` also waits for a local definition of that feed.
    pub fn build(definitions: &BTreeMap<Address, ResourceDefinition>) -> Result<Self> {
        let mut graph = DependencyGraph::new();
        let local_feeds: Vec<&Address> = definitions
            .values()
            .filter(|d| matches!(d.payload, Payload::Feed(_)))
            .map(|d| &d.address)
            .collect();

        for (address, definition) in definitions {
            graph.add_node(address);
            for dependency in definition.dependencies()? {
                graph.add_edge(&dependency, address);
            }
            for dependee in definition.dependees() {
                graph.add_edge(address, &dependee);
            }
            for reference in definition.references()? {
                if let Reference::Feed { scope, feed } = reference {
                    for local in local_feeds.iter().filter(|f| {
                        f.scope() == Some(scope.as_str()) && f.resource_id() == Some(feed.as_str())
                    }) {
                        graph.add_edge(local, address);
                    }
                }
            }
        }
        Ok(graph)
    }

    /// Kahn's algorithm with ties broken by address order. Nodes left over
    /// sit on, or between, cycles and are reported with `CycleDetected`.
    pub fn topological_order(&self) -> Result<Vec<Address>> {
        let mut indegree: BTreeMap<&Address, usize> = self.nodes.iter().map(|n| (n, 0)).collect();
        for targets in self.successors.values() {
            for target in targets {
                if let Some(count) = indegree.get_mut(target) {
                    *count += 1;
                }
            }
        }
        let mut ready: BTreeSet<&Address> = indegree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            order.push(node.clone());
            if let Some(targets) = self.successors.get(node) {
                for target in targets {
                    if let Some(count) = indegree.get_mut(target) {
                        *count -= 1;
                        if *count == 0 {
                            ready.insert(target);
                        }
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            return Ok(order);
        }
        let cycle = self.cycle_members(&order);
        error!(cycle = ?cycle, "Dependency cycle");
        Err(SyncError::CycleDetected(cycle))
    }

    /// Unordered nodes minus those that merely hang below a cycle.
    fn cycle_members(&self, ordered: &[Address]) -> Vec<Address> {
        let mut remaining: BTreeSet<&Address> = self.nodes.iter().collect();
        for node in ordered {
            remaining.remove(node);
        }
        loop {
            let leaves: Vec<&Address> = remaining
                .iter()
                .filter(|node| {
                    self.successors
                        .get(**node)
                        .map_or(true, |t| t.iter().all(|s| !remaining.contains(s)))
                })
                .copied()
                .collect();
            if leaves.is_empty() {
                break;
            }
            for leaf in leaves {
                remaining.remove(leaf);
            }
        }
        remaining.into_iter().cloned().collect()
    }
}

/// Order in which an apply walks its addresses.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ApplySchedule {
    /// Dependencies and dependee groups with no local definition; resolved
    /// read-only before anything is written.
    pub external: Vec<Address>,
    /// Local non-group definitions, dependencies first.
    pub ordered: Vec<Address>,
    /// Local groups, applied in the final group pass.
    pub groups: Vec<Address>,
}

pub fn schedule(definitions: &BTreeMap<Address, ResourceDefinition>) -> Result<ApplySchedule> {
    let graph = DependencyGraph::build(definitions)?;
    let mut plan = ApplySchedule::default();
    for address in graph.topological_order()? {
        match definitions.get(&address) {
            Some(d) if d.kind() == ResourceKind::Group => plan.groups.push(address),
            Some(_) => plan.ordered.push(address),
            None => plan.external.push(address),
        }
    }
    debug!(
        external = plan.external.len(),
        ordered = plan.ordered.len(),
        groups = plan.groups.len(),
        "Computed apply schedule"
    );
    Ok(plan)
}

/// Deletion order for the children of one pipeline: consumers before the
/// resources they read from, so groups come first. Falls back to reverse
/// address order when the recorded inputs form a cycle.
pub fn delete_order(children: &[RemoteResource]) -> Vec<Address> {
    let by_uuid: BTreeMap<&str, &Address> = children
        .iter()
        .map(|c| (c.uuid.as_str(), &c.address))
        .collect();
    let mut graph = DependencyGraph::new();
    for child in children {
        graph.add_node(&child.address);
        for upstream in child.upstream_uuids() {
            if let Some(input) = by_uuid.get(upstream.as_str()) {
                graph.add_edge(input, &child.address);
            }
        }
    }
    match graph.topological_order() {
        Ok(mut order) => {
            order.reverse();
            order
        }
        Err(_) => {
            let mut order: Vec<Address> = children.iter().map(|c| c.address.clone()).collect();
            order.sort();
            order.reverse();
            order
        }
    }
}
