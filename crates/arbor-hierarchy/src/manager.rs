use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arbor_core::{ItemId, Name, NodeId, Path, PathSegment};

use crate::cache::{CacheConfig, PathCache};
use crate::error::{HierarchyError, Result};
use crate::event::TreeEvent;
use crate::resolver::TreeResolver;
use crate::store::{NodeStore, StoreError};
use crate::trie::TrieRef;

/// Minimum spacing between warn-level reports of authoritative store
/// failures; repeats inside the window drop to debug.
const STORE_FAILURE_WARN_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct WarnGate {
    last: Mutex<Option<Instant>>,
}

impl WarnGate {
    fn allow(&self) -> bool {
        let now = Instant::now();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(err) => err.into_inner(),
        };
        match *last {
            Some(previous) if now.duration_since(previous) < STORE_FAILURE_WARN_INTERVAL => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[derive(Debug)]
struct Inner<S> {
    resolver: TreeResolver<S>,
    cache: Mutex<PathCache>,
    warn_gate: WarnGate,
}

/// Read-through/write-through path cache over a [`TreeResolver`].
///
/// Reads consult the trie/index first and fall back to the authoritative
/// store on a miss; detected staleness is repaired by evicting the suspect
/// entry before delegating, so callers see exactly the error contract of the
/// uncached resolver. Structural [`TreeEvent`]s keep the cache consistent;
/// apply them in the order the store emits them for any one identifier.
///
/// One mutex guards the whole trie/index/LRU triple: a single logical
/// operation (say, evicting a shareable item) touches all three structures,
/// and they must never be seen out of agreement. Handles are cheap to clone
/// and share the cache.
#[derive(Debug)]
pub struct CachingResolver<S> {
    inner: Arc<Inner<S>>,
}

impl<S> Clone for CachingResolver<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: NodeStore> CachingResolver<S> {
    pub fn new(store: S, root_id: NodeId) -> Self {
        Self::with_config(store, root_id, CacheConfig::default())
    }

    pub fn with_config(store: S, root_id: NodeId, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                resolver: TreeResolver::new(store, root_id),
                cache: Mutex::new(PathCache::new(config)),
                warn_gate: WarnGate::default(),
            }),
        }
    }

    /// The uncached resolver this cache accelerates.
    pub fn resolver(&self) -> &TreeResolver<S> {
        &self.inner.resolver
    }

    pub fn root_id(&self) -> NodeId {
        self.inner.resolver.root_id()
    }

    fn store(&self) -> &S {
        self.inner.resolver.store()
    }

    /// Number of cached identifier mappings (diagnostics).
    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    /// Runs the full trie/index/LRU cross-check, panicking on any mismatch.
    pub fn check_consistency(&self) {
        self.lock_cache().check_consistency();
    }

    /// Every cached mapping in breadth-first path order (diagnostics).
    ///
    /// Shareable nodes appear once per cached path.
    pub fn cached_paths(&self) -> Vec<(Path, NodeId)> {
        let cache = self.lock_cache();
        let mut out = Vec::with_capacity(cache.len());
        cache.trie.traverse(true, |node, &entry| {
            out.push((cache.trie.path_to(node), cache.entries.get(entry).id));
        });
        out
    }

    #[track_caller]
    fn lock_cache(&self) -> MutexGuard<'_, PathCache> {
        match self.inner.cache.lock() {
            Ok(guard) => guard,
            Err(err) => {
                let loc = std::panic::Location::caller();
                tracing::error!(
                    target = "arbor.hierarchy",
                    file = loc.file(),
                    line = loc.line(),
                    error = %err,
                    "mutex poisoned; continuing with recovered guard"
                );
                err.into_inner()
            }
        }
    }

    fn note_store_failure(&self, context: &'static str, err: &StoreError) {
        match err {
            // A vanished item is staleness, recovered locally; not worth a
            // warning.
            StoreError::NotFound { .. } => {
                tracing::debug!(target = "arbor.hierarchy", context, error = %err, "stale cache entry evicted");
            }
            StoreError::Inconsistent { .. } => {
                if self.inner.warn_gate.allow() {
                    tracing::warn!(target = "arbor.hierarchy", context, error = %err, "authoritative store failed during cache fallback");
                } else {
                    tracing::debug!(target = "arbor.hierarchy", context, error = %err, "authoritative store failed during cache fallback");
                }
            }
        }
    }

    // ---- read path -------------------------------------------------------

    /// Resolves an absolute path to the item it denotes.
    pub fn resolve_path(&self, path: &Path) -> Result<ItemId> {
        if path.is_root() {
            return Ok(ItemId::Node(self.root_id()));
        }

        let mut cache = self.lock_cache();

        let (mut current, mut depth) = match cache.deepest_cached(path) {
            Some((_, entry, depth)) => {
                let id = cache.entries.get(entry).id;
                if depth == path.depth() {
                    // Exact hit: trust it only while the store still knows
                    // the identifier.
                    if self.store().item_exists(&ItemId::Node(id)) {
                        cache.entries.touch(entry);
                        return Ok(ItemId::Node(id));
                    }
                    tracing::debug!(target = "arbor.hierarchy", %id, path = %path, "evicting vanished item");
                    cache.evict_all(id, false);
                    (self.root_id(), 0)
                } else {
                    cache.entries.touch(entry);
                    (id, depth)
                }
            }
            None => (self.root_id(), 0),
        };

        // The id whose entry anchors the cached prefix; evicted wholesale if
        // the suffix walk trips over stale state.
        let mut anchor = (depth > 0).then_some(current);

        let mut prefix = Path::new(path.segments()[..depth].to_vec());
        let segments = path.segments();
        while depth < segments.len() {
            let segment = &segments[depth];
            match self
                .store()
                .child_entry(current, segment.name(), segment.normalized_index())
            {
                Ok(Some(ItemId::Node(next))) => {
                    prefix.push(normalized(segment));
                    cache.cache_path(&prefix, next);
                    current = next;
                    anchor = Some(next);
                    depth += 1;
                }
                Ok(Some(ItemId::Property(prop))) => {
                    if depth + 1 == segments.len() {
                        return Ok(ItemId::Property(prop));
                    }
                    return Err(HierarchyError::path_not_found(path));
                }
                Ok(None) => return Err(HierarchyError::path_not_found(path)),
                Err(err) => {
                    if let Some(stale) = anchor {
                        cache.evict_all(stale, false);
                    }
                    self.note_store_failure("resolve_path", &err);
                    // Retry the whole resolution uncached.
                    return self.inner.resolver.resolve_path(path);
                }
            }
        }
        Ok(ItemId::Node(current))
    }

    /// Returns an absolute path under which `id` is reachable.
    ///
    /// For shareable items this is whichever shared path happens to be
    /// cached first.
    pub fn path_of(&self, id: &ItemId) -> Result<Path> {
        match id {
            ItemId::Property(prop) => {
                if !self.store().item_exists(id) {
                    return Err(HierarchyError::item_not_found(id.clone()));
                }
                let parent = self.path_of(&ItemId::Node(prop.parent))?;
                Ok(parent.child(PathSegment::new(prop.name.clone())))
            }
            ItemId::Node(node) => {
                let mut cache = self.lock_cache();
                if let Some(entry) = cache.entry_for(*node) {
                    cache.entries.touch(entry);
                    let trie_ref = cache.entries.get(entry).refs[0];
                    return Ok(cache.trie.path_to(trie_ref));
                }
                // Delegate; the parent walk names every intermediate node,
                // so cache them all while we have them.
                let states = self.inner.resolver.states_to_root(*node).map_err(|err| {
                    if let HierarchyError::Store(store_err) = &err {
                        self.note_store_failure("path_of", store_err);
                    }
                    err
                })?;
                let mut path = Path::root();
                for state in states.iter().skip(1) {
                    path.push(PathSegment::with_index(state.name.clone(), state.index));
                    cache.cache_path(&path, state.id);
                }
                Ok(path)
            }
        }
    }

    pub fn name_of(&self, id: &ItemId) -> Result<Name> {
        if let ItemId::Node(node) = id {
            let mut cache = self.lock_cache();
            if let Some(entry) = cache.entry_for(*node) {
                cache.entries.touch(entry);
                let trie_ref = cache.entries.get(entry).refs[0];
                return Ok(cache.trie.segment(trie_ref).name().clone());
            }
        }
        self.inner.resolver.name_of(id)
    }

    /// Depth below the root; the root node has depth 0.
    pub fn depth_of(&self, id: &ItemId) -> Result<usize> {
        match id {
            ItemId::Node(node) => {
                if *node == self.root_id() {
                    return Ok(0);
                }
                let mut cache = self.lock_cache();
                if let Some(entry) = cache.entry_for(*node) {
                    cache.entries.touch(entry);
                    let trie_ref = cache.entries.get(entry).refs[0];
                    return Ok(cache.trie.depth(trie_ref));
                }
                drop(cache);
                self.inner.resolver.depth_of(id)
            }
            ItemId::Property(_) => self.inner.resolver.depth_of(id),
        }
    }

    /// Whether `a` lies strictly above `b`.
    ///
    /// A positive answer from the trie is confident. A negative one is not:
    /// a shareable descendant may be cached under a different parent path,
    /// so anything short of a cached prefix match delegates to the store.
    pub fn is_ancestor(&self, a: &ItemId, b: &ItemId) -> Result<bool> {
        if let (ItemId::Node(na), ItemId::Node(nb)) = (a, b) {
            let mut cache = self.lock_cache();
            if let (Some(ea), Some(eb)) = (cache.entry_for(*na), cache.entry_for(*nb)) {
                cache.entries.touch(ea);
                cache.entries.touch(eb);
                let a_refs = cache.entries.get(ea).refs.clone();
                let b_refs = cache.entries.get(eb).refs.clone();
                for ra in &a_refs {
                    for rb in &b_refs {
                        if cache.trie.is_ancestor(*ra, *rb) {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        self.inner.resolver.is_ancestor(a, b)
    }

    // ---- invalidation ----------------------------------------------------

    /// Applies one authoritative structural event to the cache.
    pub fn apply(&self, event: &TreeEvent) {
        match event {
            TreeEvent::NodeModified(id) => self.node_modified(*id),
            TreeEvent::ItemDestroyed(id) => self.item_destroyed(id),
            TreeEvent::ItemDiscarded {
                id,
                persisted,
                transient_new,
            } => self.item_discarded(id, *persisted, *transient_new),
            TreeEvent::ChildAdded {
                parent,
                name,
                index,
                child,
            } => self.child_added(*parent, name, *index, child),
            TreeEvent::ChildRemoved {
                parent,
                name,
                index,
                child,
                shareable,
            } => self.child_removed(*parent, name, *index, child, *shareable),
            TreeEvent::ChildrenReordered { parent } => self.children_reordered(*parent),
        }
    }

    /// Trie attachment points for a node acting as the parent in an event:
    /// the root is always addressable through the trie root; other nodes
    /// only while they have a cache entry.
    fn parent_refs(&self, cache: &PathCache, parent: NodeId) -> Option<Vec<TrieRef>> {
        if parent == self.root_id() {
            return Some(vec![cache.trie.root()]);
        }
        cache
            .entry_for(parent)
            .map(|entry| cache.entries.get(entry).refs.clone())
    }

    /// The node's state was overwritten: re-validate its cached children
    /// against the authoritative child list.
    pub fn node_modified(&self, id: NodeId) {
        let mut cache = self.lock_cache();
        let Some(refs) = self.parent_refs(&cache, id) else {
            return;
        };
        let state = match self.store().node_state(id) {
            Ok(state) => state,
            Err(err) => {
                // Can't validate children against an unreadable node.
                cache.evict_all(id, true);
                self.note_store_failure("node_modified", &err);
                cache.maybe_check();
                return;
            }
        };

        for parent_ref in refs {
            if !cache.trie.is_live(parent_ref) {
                continue;
            }
            // Evict the first mismatching child, shifting siblings down, and
            // rescan: each shift renumbers the remaining cached siblings to
            // the authoritative positions before they are compared.
            loop {
                let mismatch = cache.trie.children_of(parent_ref).into_iter().find(|child| {
                    let segment = cache.trie.segment(*child);
                    match state.child_at(segment.name(), segment.index()) {
                        None => true,
                        Some(authoritative) => match cache.trie.payload(*child) {
                            Some(&ce) => cache.entries.get(ce).id != authoritative.id,
                            // Interior prefix: no identity to compare, the
                            // (name, index) match has to suffice.
                            None => false,
                        },
                    }
                });
                match mismatch {
                    Some(child) => cache.evict_ref(child, true),
                    None => break,
                }
            }
        }
        cache.maybe_check();
    }

    /// The item is gone; siblings renumber.
    pub fn item_destroyed(&self, id: &ItemId) {
        let ItemId::Node(node) = id else {
            return;
        };
        let mut cache = self.lock_cache();
        cache.evict_all(*node, true);
        cache.maybe_check();
    }

    /// A transient item was rolled back.
    ///
    /// Undoing a brand-new item removes it from the authoritative tree, so
    /// siblings shift; if a persistent state survives the discard, only the
    /// cached fact is wrong and indices stay put. The remaining case keeps
    /// the shift, mirroring destroy.
    pub fn item_discarded(&self, id: &ItemId, persisted: bool, transient_new: bool) {
        let ItemId::Node(node) = id else {
            return;
        };
        let mut cache = self.lock_cache();
        if transient_new {
            cache.evict_all(*node, true);
        } else if persisted {
            cache.evict_all(*node, false);
        } else {
            cache.evict_all(*node, true);
        }
        cache.maybe_check();
    }

    /// `child` became reachable under `parent` at `(name, index)`.
    pub fn child_added(&self, parent: NodeId, name: &Name, index: u32, child: &ItemId) {
        let ItemId::Node(child_node) = child else {
            // Properties are never cached in the trie.
            return;
        };
        let mut cache = self.lock_cache();
        if cache.entry_for(parent).is_some() {
            // A child already cached elsewhere is being moved or cloned in;
            // relocate its reference rather than duplicating it.
            if cache.entry_for(*child_node).is_some() {
                cache.evict_all(*child_node, false);
            }
            // The relocation can cascade over a stale path that shielded the
            // parent's own entry; re-check before touching it.
            let Some(parent_entry) = cache.entry_for(parent) else {
                cache.maybe_check();
                return;
            };
            cache.entries.touch(parent_entry);
            let parent_ref = cache.entries.get(parent_entry).refs[0];
            let segment = PathSegment::with_index(name.clone(), index);
            let node = cache.trie.insert_child(parent_ref, &segment);
            cache.attach_entry(node, *child_node);
        } else if cache.entry_for(*child_node).is_some() {
            // A root-level add, or an add under a parent this cache never
            // saw: the cached path no longer leads to the child and the new
            // location cannot be placed in the trie.
            cache.evict_all(*child_node, false);
        }
        cache.maybe_check();
    }

    /// `child` stopped being reachable under `parent` at `(name, index)`.
    pub fn child_removed(
        &self,
        parent: NodeId,
        name: &Name,
        index: u32,
        child: &ItemId,
        shareable: bool,
    ) {
        let ItemId::Node(child_node) = child else {
            return;
        };
        let mut cache = self.lock_cache();
        if let Some(refs) = self.parent_refs(&cache, parent) {
            if let Some(parent_entry) = cache.entry_for(parent) {
                cache.entries.touch(parent_entry);
            }
            for parent_ref in refs {
                if !cache.trie.is_live(parent_ref) {
                    continue;
                }
                let Some(child_ref) = cache.trie.child(parent_ref, name, index) else {
                    continue;
                };
                // A same-name-sibling event for a different physical item
                // must not evict this one.
                if let Some(&child_entry) = cache.trie.payload(child_ref) {
                    if cache.entries.get(child_entry).id != *child_node {
                        continue;
                    }
                }
                // Only the path under this parent goes; other shares stay.
                cache.evict_ref(child_ref, true);
            }
        } else if cache.entry_for(*child_node).is_some() {
            // The parent prefix is anonymous in the trie, so the specific
            // stale path cannot be singled out.
            cache.evict_all(*child_node, !shareable);
        }
        cache.maybe_check();
    }

    /// `parent`'s children were reordered: move every cached child with an
    /// authoritative counterpart to its new position, in one atomic re-key.
    pub fn children_reordered(&self, parent: NodeId) {
        let mut cache = self.lock_cache();
        let Some(refs) = self.parent_refs(&cache, parent) else {
            return;
        };
        let state = match self.store().node_state(parent) {
            Ok(state) => state,
            Err(err) => {
                cache.evict_all(parent, false);
                self.note_store_failure("children_reordered", &err);
                cache.maybe_check();
                return;
            }
        };
        if let Some(parent_entry) = cache.entry_for(parent) {
            cache.entries.touch(parent_entry);
        }

        for parent_ref in refs {
            if !cache.trie.is_live(parent_ref) {
                continue;
            }
            let mut renumber: Vec<_> = Vec::new();
            let mut evict: Vec<_> = Vec::new();
            for child_ref in cache.trie.children_of(parent_ref) {
                let counterpart = match cache.trie.payload(child_ref) {
                    Some(&child_entry) => state.child_by_id(cache.entries.get(child_entry).id),
                    // Anonymous prefix: no identity to re-seat it under.
                    None => None,
                };
                match counterpart {
                    Some(authoritative)
                        if authoritative.name == *cache.trie.segment(child_ref).name() =>
                    {
                        renumber.push((child_ref, authoritative.index));
                    }
                    // No counterpart: its removal is reported separately, so
                    // no shift here.
                    _ => evict.push(child_ref),
                }
            }
            for child_ref in evict {
                cache.evict_ref(child_ref, false);
            }
            cache.trie.renumber_children(parent_ref, &renumber);
        }
        cache.maybe_check();
    }
}

fn normalized(segment: &PathSegment) -> PathSegment {
    PathSegment::with_index(segment.name().clone(), segment.normalized_index())
}
