//! In-memory authoritative tree for tests.
//!
//! [`MemoryTree`] implements [`NodeStore`] over a mutable tree and hands back
//! the [`TreeEvent`]s a real item-state manager would emit for each mutation,
//! so tests drive the cache exactly the way the repository core does:
//! mutate, then `apply` the returned events.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use arbor_core::{ItemId, Name, NodeId, PropertyId};

use crate::event::TreeEvent;
use crate::store::{ChildEntry, NodeState, NodeStore, StoreError};

#[derive(Debug)]
struct MemNode {
    /// Parents this node is reachable from; more than one only when shared.
    parents: Vec<NodeId>,
    name: Name,
    /// Ordered child list; same-name-sibling indices derive from position.
    children: Vec<NodeId>,
    properties: Vec<Name>,
    shareable: bool,
}

#[derive(Debug)]
struct TreeState {
    nodes: HashMap<NodeId, MemNode>,
    next_id: u64,
}

/// A thread-safe in-memory [`NodeStore`].
#[derive(Debug)]
pub struct MemoryTree {
    root: NodeId,
    inner: Mutex<TreeState>,
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTree {
    pub fn new() -> Self {
        let root = NodeId::from_raw(0);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            MemNode {
                parents: Vec::new(),
                name: Name::default(),
                children: Vec::new(),
                properties: Vec::new(),
                shareable: false,
            },
        );
        Self {
            root,
            inner: Mutex::new(TreeState { nodes, next_id: 1 }),
        }
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    fn lock(&self) -> MutexGuard<'_, TreeState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(err) => err.into_inner(),
        }
    }

    /// Appends a child node under `parent`, returning its id and the event a
    /// real store would emit.
    pub fn add_node(&self, parent: NodeId, name: &str) -> (NodeId, TreeEvent) {
        self.add_node_inner(parent, name, false)
    }

    /// Like [`MemoryTree::add_node`] for a shareable node.
    pub fn add_shareable(&self, parent: NodeId, name: &str) -> (NodeId, TreeEvent) {
        self.add_node_inner(parent, name, true)
    }

    fn add_node_inner(&self, parent: NodeId, name: &str, shareable: bool) -> (NodeId, TreeEvent) {
        let mut state = self.lock();
        let id = NodeId::from_raw(state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id,
            MemNode {
                parents: vec![parent],
                name: Name::from(name),
                children: Vec::new(),
                properties: Vec::new(),
                shareable,
            },
        );
        let parent_node = state.nodes.get_mut(&parent).expect("unknown parent");
        parent_node.children.push(id);
        let index = sns_index(&state, parent, id);
        (
            id,
            TreeEvent::ChildAdded {
                parent,
                name: Name::from(name),
                index,
                child: ItemId::Node(id),
            },
        )
    }

    /// Attaches a property to `node`.
    pub fn add_property(&self, node: NodeId, name: &str) -> PropertyId {
        let mut state = self.lock();
        let mem = state.nodes.get_mut(&node).expect("unknown node");
        mem.properties.push(Name::from(name));
        PropertyId::new(node, name)
    }

    /// Makes the shareable `node` also reachable under `extra_parent`.
    pub fn share(&self, extra_parent: NodeId, node: NodeId) -> TreeEvent {
        let mut state = self.lock();
        {
            let mem = state.nodes.get_mut(&node).expect("unknown node");
            assert!(mem.shareable, "cannot share a non-shareable node");
            mem.parents.push(extra_parent);
        }
        let name = state.nodes[&node].name.clone();
        let parent_node = state.nodes.get_mut(&extra_parent).expect("unknown parent");
        parent_node.children.push(node);
        let index = sns_index(&state, extra_parent, node);
        TreeEvent::ChildAdded {
            parent: extra_parent,
            name,
            index,
            child: ItemId::Node(node),
        }
    }

    /// Removes the child of `parent` at `(name, index)`.
    ///
    /// An unshared child is destroyed together with its subtree; a shared one
    /// merely loses this parent. Returns the emitted events in feed order.
    pub fn remove_child(&self, parent: NodeId, name: &str, index: u32) -> Vec<TreeEvent> {
        let mut state = self.lock();
        let name = Name::from(name);
        let child = child_at(&state, parent, &name, index).expect("no such child");

        let parent_node = state.nodes.get_mut(&parent).expect("unknown parent");
        let pos = parent_node
            .children
            .iter()
            .position(|c| *c == child)
            .expect("child list out of sync");
        parent_node.children.remove(pos);

        let mem = state.nodes.get_mut(&child).expect("unknown child");
        let shareable = mem.shareable;
        mem.parents.retain(|p| *p != parent);
        let still_reachable = !mem.parents.is_empty();

        let mut events = vec![TreeEvent::ChildRemoved {
            parent,
            name,
            index,
            child: ItemId::Node(child),
            shareable,
        }];
        if !still_reachable {
            destroy_subtree(&mut state, child, &mut events);
        }
        events
    }

    /// Reorders the children of `parent` to the given id order.
    pub fn reorder_children(&self, parent: NodeId, order: &[NodeId]) -> TreeEvent {
        let mut state = self.lock();
        let parent_node = state.nodes.get_mut(&parent).expect("unknown parent");
        assert_eq!(
            parent_node.children.len(),
            order.len(),
            "reorder must name every child exactly once"
        );
        for id in order {
            assert!(
                parent_node.children.contains(id),
                "reorder names unknown child {id}"
            );
        }
        parent_node.children = order.to_vec();
        TreeEvent::ChildrenReordered { parent }
    }
}

fn child_at(state: &TreeState, parent: NodeId, name: &Name, index: u32) -> Option<NodeId> {
    let parent_node = state.nodes.get(&parent)?;
    let mut seen = 0;
    for child in &parent_node.children {
        if state.nodes[child].name == *name {
            seen += 1;
            if seen == index.max(1) {
                return Some(*child);
            }
        }
    }
    None
}

/// 1-based position of `child` among same-name siblings under `parent`.
fn sns_index(state: &TreeState, parent: NodeId, child: NodeId) -> u32 {
    let name = &state.nodes[&child].name;
    let mut index = 0;
    for sibling in &state.nodes[&parent].children {
        if state.nodes[sibling].name == *name {
            index += 1;
            if *sibling == child {
                return index;
            }
        }
    }
    panic!("{child} is not a child of {parent}");
}

fn destroy_subtree(state: &mut TreeState, id: NodeId, events: &mut Vec<TreeEvent>) {
    let Some(node) = state.nodes.remove(&id) else {
        return;
    };
    for child in node.children {
        if let Some(mem) = state.nodes.get_mut(&child) {
            mem.parents.retain(|p| *p != id);
            if mem.parents.is_empty() {
                destroy_subtree(state, child, events);
            }
        }
    }
    events.push(TreeEvent::ItemDestroyed(ItemId::Node(id)));
}

impl NodeStore for MemoryTree {
    fn child_entry(
        &self,
        parent: NodeId,
        name: &Name,
        index: u32,
    ) -> Result<Option<ItemId>, StoreError> {
        let state = self.lock();
        if !state.nodes.contains_key(&parent) {
            return Err(StoreError::not_found(parent));
        }
        if let Some(child) = child_at(&state, parent, name, index) {
            return Ok(Some(ItemId::Node(child)));
        }
        if index <= 1 && state.nodes[&parent].properties.contains(name) {
            return Ok(Some(ItemId::Property(PropertyId::new(parent, name.clone()))));
        }
        Ok(None)
    }

    fn item_exists(&self, id: &ItemId) -> bool {
        let state = self.lock();
        match id {
            ItemId::Node(node) => state.nodes.contains_key(node),
            ItemId::Property(prop) => state
                .nodes
                .get(&prop.parent)
                .is_some_and(|mem| mem.properties.contains(&prop.name)),
        }
    }

    fn node_state(&self, id: NodeId) -> Result<NodeState, StoreError> {
        let state = self.lock();
        let mem = state.nodes.get(&id).ok_or_else(|| StoreError::not_found(id))?;
        let parents = mem.parents.clone();
        let index = match parents.first() {
            Some(parent) => sns_index(&state, *parent, id),
            None => 1,
        };

        let mut children = Vec::with_capacity(mem.children.len());
        let mut counts: HashMap<&Name, u32> = HashMap::new();
        for child in &mem.children {
            let child_name = &state.nodes[child].name;
            let slot = counts.entry(child_name).or_insert(0);
            *slot += 1;
            children.push(ChildEntry {
                name: child_name.clone(),
                index: *slot,
                id: *child,
            });
        }

        Ok(NodeState {
            id,
            parents,
            name: mem.name.clone(),
            index,
            children,
            properties: mem.properties.clone(),
            shareable: mem.shareable,
        })
    }
}
