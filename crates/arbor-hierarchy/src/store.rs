use std::sync::Arc;

use arbor_core::{ItemId, Name, NodeId};

/// One position in a node's ordered child list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: Name,
    /// 1-based position among same-name siblings.
    pub index: u32,
    pub id: NodeId,
}

/// A read-only snapshot of one node's authoritative state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub id: NodeId,
    /// Parents this node is reachable from: empty only for the root, more
    /// than one only for shared nodes. The first entry is the primary
    /// parent, the one `index` and path building refer to.
    pub parents: Vec<NodeId>,
    pub name: Name,
    /// 1-based position among same-name siblings under the primary parent;
    /// 1 for the root.
    pub index: u32,
    /// Child nodes in authoritative order.
    pub children: Vec<ChildEntry>,
    /// Property names attached to this node.
    pub properties: Vec<Name>,
    /// Whether this node may be reachable from more than one parent.
    pub shareable: bool,
}

impl NodeState {
    pub fn primary_parent(&self) -> Option<NodeId> {
        self.parents.first().copied()
    }

    /// Finds the child occupying `(name, index)`, if any.
    pub fn child_at(&self, name: &Name, index: u32) -> Option<&ChildEntry> {
        self.children
            .iter()
            .find(|child| child.name == *name && child.index == index)
    }

    /// Finds the position of `id` in the child list, if present.
    pub fn child_by_id(&self, id: NodeId) -> Option<&ChildEntry> {
        self.children.iter().find(|child| child.id == id)
    }
}

/// Errors surfaced by the authoritative store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("item {id} not found in store")]
    NotFound { id: ItemId },

    #[error("store state inconsistent: {message}")]
    Inconsistent { message: String },
}

impl StoreError {
    pub fn not_found(id: impl Into<ItemId>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }
}

/// The authoritative item-state manager, as seen by the hierarchy subsystem.
///
/// The store is the system of record for item existence, parent/child
/// relationships, and child ordering. The cache only ever reads from it and
/// treats it as independently synchronized. Implementations also produce the
/// [`TreeEvent`](crate::TreeEvent) feed that drives cache invalidation;
/// delivery of that feed is the caller's responsibility.
pub trait NodeStore {
    /// Looks up the child item of `parent` occupying `(name, index)`.
    ///
    /// `index` is 1-based after wildcard normalization. Properties occupy
    /// index 1 only. Returns `Ok(None)` when no such child exists; `Err` is
    /// reserved for `parent` itself being missing or unreadable.
    fn child_entry(
        &self,
        parent: NodeId,
        name: &Name,
        index: u32,
    ) -> Result<Option<ItemId>, StoreError>;

    /// Whether `id` currently exists.
    fn item_exists(&self, id: &ItemId) -> bool;

    /// Snapshot of the authoritative state of node `id`.
    fn node_state(&self, id: NodeId) -> Result<NodeState, StoreError>;
}

impl<S: NodeStore + ?Sized> NodeStore for &S {
    fn child_entry(
        &self,
        parent: NodeId,
        name: &Name,
        index: u32,
    ) -> Result<Option<ItemId>, StoreError> {
        (**self).child_entry(parent, name, index)
    }

    fn item_exists(&self, id: &ItemId) -> bool {
        (**self).item_exists(id)
    }

    fn node_state(&self, id: NodeId) -> Result<NodeState, StoreError> {
        (**self).node_state(id)
    }
}

impl<S: NodeStore + ?Sized> NodeStore for Arc<S> {
    fn child_entry(
        &self,
        parent: NodeId,
        name: &Name,
        index: u32,
    ) -> Result<Option<ItemId>, StoreError> {
        (**self).child_entry(parent, name, index)
    }

    fn item_exists(&self, id: &ItemId) -> bool {
        (**self).item_exists(id)
    }

    fn node_state(&self, id: NodeId) -> Result<NodeState, StoreError> {
        (**self).node_state(id)
    }
}
