use std::fmt;

use serde::{Deserialize, Serialize};

use crate::path::Name;

/// A stable identifier for a node in the repository tree.
///
/// Ids are allocated by the authoritative item-state manager and are never
/// reused for a different node within one repository instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(u64);

impl NodeId {
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A property is addressed by its parent node plus its name.
///
/// Properties have no identity of their own; they live and die with their
/// parent node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId {
    pub parent: NodeId,
    pub name: Name,
}

impl PropertyId {
    pub fn new(parent: NodeId, name: impl Into<Name>) -> Self {
        Self {
            parent,
            name: name.into(),
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.parent, self.name)
    }
}

/// Either kind of repository item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemId {
    Node(NodeId),
    Property(PropertyId),
}

impl ItemId {
    #[inline]
    pub fn is_node(&self) -> bool {
        matches!(self, ItemId::Node(_))
    }

    #[inline]
    pub fn as_node(&self) -> Option<NodeId> {
        match self {
            ItemId::Node(id) => Some(*id),
            ItemId::Property(_) => None,
        }
    }

    #[inline]
    pub fn as_property(&self) -> Option<&PropertyId> {
        match self {
            ItemId::Node(_) => None,
            ItemId::Property(id) => Some(id),
        }
    }
}

impl From<NodeId> for ItemId {
    fn from(id: NodeId) -> Self {
        ItemId::Node(id)
    }
}

impl From<PropertyId> for ItemId {
    fn from(id: PropertyId) -> Self {
        ItemId::Property(id)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Node(id) => id.fmt(f),
            ItemId::Property(id) => id.fmt(f),
        }
    }
}
