use arbor_core::{ItemId, Name, NodeId};

/// A structural change reported by the authoritative store.
///
/// Events for the same identifier must be delivered in the order the store
/// emits them; the cache makes no cross-identifier ordering guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeEvent {
    /// A node's state (child list, ordering) was overwritten.
    NodeModified(NodeId),

    /// An item was permanently removed.
    ItemDestroyed(ItemId),

    /// A transient item was rolled back.
    ItemDiscarded {
        id: ItemId,
        /// Whether an underlying persistent state still exists after the
        /// discard.
        persisted: bool,
        /// Whether the discard undid a brand-new, never-persisted item.
        transient_new: bool,
    },

    /// `child` became reachable under `parent` at `(name, index)`.
    ChildAdded {
        parent: NodeId,
        name: Name,
        index: u32,
        child: ItemId,
    },

    /// `child` stopped being reachable under `parent` at `(name, index)`.
    ChildRemoved {
        parent: NodeId,
        name: Name,
        index: u32,
        child: ItemId,
        /// Whether the removed item is shareable (may remain reachable
        /// through other parents).
        shareable: bool,
    },

    /// `parent`'s children were reordered in place.
    ChildrenReordered { parent: NodeId },
}

impl TreeEvent {
    /// The identifier whose per-id ordering guarantee this event falls under.
    pub fn subject(&self) -> ItemId {
        match self {
            TreeEvent::NodeModified(id) => ItemId::Node(*id),
            TreeEvent::ItemDestroyed(id) => id.clone(),
            TreeEvent::ItemDiscarded { id, .. } => id.clone(),
            TreeEvent::ChildAdded { parent, .. } => ItemId::Node(*parent),
            TreeEvent::ChildRemoved { parent, .. } => ItemId::Node(*parent),
            TreeEvent::ChildrenReordered { parent } => ItemId::Node(*parent),
        }
    }
}
