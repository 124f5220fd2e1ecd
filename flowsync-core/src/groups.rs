//! Group membership bookkeeping for a single reconcile session.
//!
//! Membership is a many-to-one relation from content to group. Whenever it
//! changes, the group(s) involved are marked dirty so the reconciler
//! re-applies them once at the end of the session.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::address::Address;

#[derive(Debug, Default)]
pub struct GroupMembership {
    content_to_group: BTreeMap<Address, Address>,
    group_to_content: BTreeMap<Address, BTreeSet<Address>>,
    dirty: BTreeSet<Address>,
    applied: HashSet<Address>,
    seeded: HashSet<Address>,
}

impl GroupMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `content` belongs to `group` (or to none). Returns true
    /// when membership changed; both the old and the new group become dirty.
    pub fn update_membership(&mut self, content: &Address, group: Option<&Address>) -> bool {
        let previous = self.content_to_group.get(content).cloned();
        if previous.as_ref() == group {
            return false;
        }
        if let Some(old) = previous {
            if let Some(members) = self.group_to_content.get_mut(&old) {
                members.remove(content);
            }
            self.content_to_group.remove(content);
            self.dirty.insert(old);
        }
        if let Some(new) = group {
            self.content_to_group.insert(content.clone(), new.clone());
            self.group_to_content
                .entry(new.clone())
                .or_default()
                .insert(content.clone());
            self.dirty.insert(new.clone());
        }
        true
    }

    /// Records existing remote membership without marking anything dirty.
    /// Content already seeded into another group moves to `group`.
    pub fn seed(&mut self, group: &Address, content: impl IntoIterator<Item = Address>) {
        for item in content {
            if let Some(old) = self.content_to_group.insert(item.clone(), group.clone()) {
                if &old != group {
                    if let Some(members) = self.group_to_content.get_mut(&old) {
                        members.remove(&item);
                    }
                }
            }
            self.group_to_content
                .entry(group.clone())
                .or_default()
                .insert(item);
        }
    }

    pub fn is_seeded(&self, pipeline: &Address) -> bool {
        self.seeded.contains(pipeline)
    }

    pub fn mark_seeded(&mut self, pipeline: &Address) {
        self.seeded.insert(pipeline.clone());
    }

    pub fn group_of(&self, content: &Address) -> Option<&Address> {
        self.content_to_group.get(content)
    }

    /// Members of `group` in address order.
    pub fn members_of(&self, group: &Address) -> Vec<Address> {
        self.group_to_content
            .get(group)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drains dirty groups that have not been re-applied yet this session.
    /// Each group is returned at most once per session.
    pub fn take_dirty(&mut self) -> Vec<Address> {
        let dirty = std::mem::take(&mut self.dirty);
        dirty
            .into_iter()
            .filter(|g| self.applied.insert(g.clone()))
            .collect()
    }

    /// Marks `group` as applied so later changes do not queue it again.
    pub fn mark_applied(&mut self, group: &Address) {
        self.applied.insert(group.clone());
        self.dirty.remove(group);
    }
}
