//! Hierarchical resource addresses: `scope.pipeline.resource`.
//!
//! An [`Address`] has three optional slots. A filled slot requires every slot
//! before it to be filled, so the only shapes are root, organization,
//! pipeline and resource. The fields are private to keep that invariant.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

pub const SEPARATOR: char = '.';

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    scope: Option<String>,
    pipeline: Option<String>,
    resource: Option<String>,
}

impl Address {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn organization(scope: impl Into<String>) -> Self {
        Address {
            scope: Some(scope.into()),
            pipeline: None,
            resource: None,
        }
    }

    pub fn pipeline(scope: impl Into<String>, pipeline: impl Into<String>) -> Self {
        Address {
            scope: Some(scope.into()),
            pipeline: Some(pipeline.into()),
            resource: None,
        }
    }

    pub fn resource(
        scope: impl Into<String>,
        pipeline: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Address {
            scope: Some(scope.into()),
            pipeline: Some(pipeline.into()),
            resource: Some(resource.into()),
        }
    }

    /// Parses `a`, `a.b` or `a.b.c`; a lone `.` is the root.
    pub fn parse(input: &str) -> Result<Self> {
        if input == "." {
            return Ok(Self::root());
        }
        if input.is_empty() {
            return Err(SyncError::invalid_address(input, "empty address"));
        }
        let segments: Vec<&str> = input.split(SEPARATOR).collect();
        if segments.len() > 3 {
            return Err(SyncError::invalid_address(input, "more than three segments"));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(SyncError::invalid_address(input, "empty segment"));
        }
        let mut address = Self::root();
        for segment in segments {
            address = address.extend(segment)?;
        }
        Ok(address)
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub fn pipeline_id(&self) -> Option<&str> {
        self.pipeline.as_deref()
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The innermost filled slot, `None` for the root.
    pub fn leaf(&self) -> Option<&str> {
        self.resource_id()
            .or_else(|| self.pipeline_id())
            .or_else(|| self.scope())
    }

    pub fn is_root(&self) -> bool {
        self.scope.is_none()
    }

    /// Number of filled slots: 0 for root, 3 for a resource.
    pub fn depth(&self) -> usize {
        self.segments().len()
    }

    pub fn segments(&self) -> Vec<&str> {
        [&self.scope, &self.pipeline, &self.resource]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .collect()
    }

    /// Appends `child` at the first empty slot.
    pub fn extend(&self, child: &str) -> Result<Self> {
        if child.is_empty() || child.contains(SEPARATOR) {
            return Err(SyncError::invalid_address(child, "invalid child segment"));
        }
        let mut next = self.clone();
        if next.scope.is_none() {
            next.scope = Some(child.to_string());
        } else if next.pipeline.is_none() {
            next.pipeline = Some(child.to_string());
        } else if next.resource.is_none() {
            next.resource = Some(child.to_string());
        } else {
            return Err(SyncError::InvalidExtension(self.clone()));
        }
        Ok(next)
    }

    /// The enclosing scope; the root is its own parent.
    pub fn parent(&self) -> Self {
        let mut parent = self.clone();
        if parent.resource.is_some() {
            parent.resource = None;
        } else if parent.pipeline.is_some() {
            parent.pipeline = None;
        } else {
            parent.scope = None;
        }
        parent
    }

    /// True when every filled slot of `self` matches `other`. An address is
    /// a prefix of itself and the root is a prefix of everything.
    pub fn is_prefix_of(&self, other: &Address) -> bool {
        let mine = self.segments();
        let theirs = other.segments();
        mine.len() <= theirs.len() && mine.iter().zip(theirs.iter()).all(|(a, b)| a == b)
    }

    /// Dotted suffix of `self` below `origin`, or the full address when they
    /// are equal.
    pub fn relative_to(&self, origin: &Address) -> String {
        if self == origin || !origin.is_prefix_of(self) {
            return self.to_string();
        }
        self.segments()[origin.depth()..].join(".")
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.depth()
            .cmp(&other.depth())
            .then_with(|| self.segments().cmp(&other.segments()))
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        f.write_str(&self.segments().join("."))
    }
}

impl FromStr for Address {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Address::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}
