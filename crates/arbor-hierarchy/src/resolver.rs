use std::collections::HashSet;

use arbor_core::{ItemId, Name, NodeId, Path, PathSegment};

use crate::error::{HierarchyError, Result};
use crate::store::{NodeState, NodeStore, StoreError};

/// The plain, uncached hierarchy manager.
///
/// Every operation is answered directly from the authoritative store: path
/// resolution descends one `child_entry` at a time from the root, reverse
/// lookups walk parent links through `node_state`. The caching layer wraps
/// this resolver and must surface exactly the same error kinds.
#[derive(Debug)]
pub struct TreeResolver<S> {
    store: S,
    root_id: NodeId,
}

impl<S: NodeStore> TreeResolver<S> {
    pub fn new(store: S, root_id: NodeId) -> Self {
        Self { store, root_id }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    /// Resolves an absolute path to the item it denotes.
    pub fn resolve_path(&self, path: &Path) -> Result<ItemId> {
        let mut current = self.root_id;
        let segments = path.segments();
        for (pos, segment) in segments.iter().enumerate() {
            let next = self
                .store
                .child_entry(current, segment.name(), segment.normalized_index())
                .map_err(|err| match err {
                    // A vanished intermediate node reads as the path not
                    // resolving, same as an absent child entry.
                    StoreError::NotFound { .. } => HierarchyError::path_not_found(path),
                    other => HierarchyError::Store(other),
                })?;
            match next {
                Some(ItemId::Node(id)) => current = id,
                Some(ItemId::Property(id)) if pos + 1 == segments.len() => {
                    return Ok(ItemId::Property(id));
                }
                // Properties have no children, so a property in a non-final
                // position cannot resolve.
                Some(ItemId::Property(_)) | None => {
                    return Err(HierarchyError::path_not_found(path));
                }
            }
        }
        Ok(ItemId::Node(current))
    }

    /// Node states from the root down to `id`, root first.
    pub fn states_to_root(&self, id: NodeId) -> Result<Vec<NodeState>> {
        let mut chain: Vec<NodeState> = Vec::new();
        let mut current = id;
        loop {
            if chain.iter().any(|state| state.id == current) {
                return Err(HierarchyError::Store(StoreError::inconsistent(format!(
                    "parent cycle through {current} while building path of {id}"
                ))));
            }
            let state = self.store.node_state(current).map_err(|err| match err {
                StoreError::NotFound { .. } => HierarchyError::item_not_found(id),
                other => HierarchyError::Store(other),
            })?;
            let parent = state.primary_parent();
            chain.push(state);
            match parent {
                Some(parent) => current = parent,
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    pub fn path_of(&self, id: &ItemId) -> Result<Path> {
        match id {
            ItemId::Node(node) => Ok(path_from_states(&self.states_to_root(*node)?)),
            ItemId::Property(prop) => {
                if !self.store.item_exists(id) {
                    return Err(HierarchyError::item_not_found(id.clone()));
                }
                let parent = self.path_of(&ItemId::Node(prop.parent))?;
                Ok(parent.child(PathSegment::new(prop.name.clone())))
            }
        }
    }

    pub fn name_of(&self, id: &ItemId) -> Result<Name> {
        match id {
            ItemId::Node(node) => {
                let state = self.store.node_state(*node).map_err(|err| match err {
                    StoreError::NotFound { .. } => HierarchyError::item_not_found(id.clone()),
                    other => HierarchyError::Store(other),
                })?;
                Ok(state.name)
            }
            ItemId::Property(prop) => {
                if !self.store.item_exists(id) {
                    return Err(HierarchyError::item_not_found(id.clone()));
                }
                Ok(prop.name.clone())
            }
        }
    }

    /// Depth below the root; the root node has depth 0.
    pub fn depth_of(&self, id: &ItemId) -> Result<usize> {
        match id {
            ItemId::Node(node) => Ok(self.states_to_root(*node)?.len() - 1),
            ItemId::Property(prop) => {
                if !self.store.item_exists(id) {
                    return Err(HierarchyError::item_not_found(id.clone()));
                }
                Ok(self.depth_of(&ItemId::Node(prop.parent))? + 1)
            }
        }
    }

    /// Whether `a` lies above `b` along any parent chain.
    ///
    /// Shared nodes are reachable through several parents, so this climbs
    /// every share parent rather than comparing one pair of paths.
    pub fn is_ancestor(&self, a: &ItemId, b: &ItemId) -> Result<bool> {
        let ItemId::Node(ancestor) = a else {
            // Properties have no descendants.
            if !self.store.item_exists(a) {
                return Err(HierarchyError::item_not_found(a.clone()));
            }
            return Ok(false);
        };
        if !self.store.item_exists(a) {
            return Err(HierarchyError::item_not_found(a.clone()));
        }
        let start = match b {
            ItemId::Node(node) => {
                if !self.store.item_exists(b) {
                    return Err(HierarchyError::item_not_found(b.clone()));
                }
                *node
            }
            ItemId::Property(prop) => {
                if !self.store.item_exists(b) {
                    return Err(HierarchyError::item_not_found(b.clone()));
                }
                if prop.parent == *ancestor {
                    return Ok(true);
                }
                prop.parent
            }
        };
        if start == *ancestor {
            return Ok(false);
        }

        let mut pending = vec![start];
        let mut seen = HashSet::new();
        seen.insert(start);
        while let Some(current) = pending.pop() {
            let state = self
                .store
                .node_state(current)
                .map_err(HierarchyError::Store)?;
            for parent in &state.parents {
                if parent == ancestor {
                    return Ok(true);
                }
                if seen.insert(*parent) {
                    pending.push(*parent);
                }
            }
        }
        Ok(false)
    }
}

/// Builds the absolute path described by a root-first state chain.
pub(crate) fn path_from_states(states: &[NodeState]) -> Path {
    let mut path = Path::root();
    for state in states.iter().skip(1) {
        path.push(PathSegment::with_index(state.name.clone(), state.index));
    }
    path
}
