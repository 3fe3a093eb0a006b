use std::collections::HashMap;

use arbor_core::{NodeId, Path};

use crate::lru::{EntryList, EntryRef};
use crate::trie::{PathTrie, TrieRef};

/// Default bound on the number of cached identifier mappings.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Tuning knobs for the path cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Advisory bound on the number of cached identifier mappings. The cache
    /// may exceed it temporarily when every scanned entry still shields
    /// cached descendants.
    pub max_entries: usize,
    /// Runs the full consistency checker after every mutation. O(n) per
    /// mutation; intended for test builds only.
    pub consistency_check: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            consistency_check: false,
        }
    }
}

/// The trie/index/LRU triple.
///
/// All three structures mutate together under the facade's lock; no method
/// here leaves them out of agreement. The invariants tied together:
/// - `index[id]` names the one entry for `id`, and that entry's `refs` are
///   exactly the trie nodes whose payload is the entry;
/// - the LRU list holds exactly the entries present in the index.
#[derive(Debug)]
pub(crate) struct PathCache {
    pub trie: PathTrie<EntryRef>,
    pub entries: EntryList,
    pub index: HashMap<NodeId, EntryRef>,
    config: CacheConfig,
}

impl PathCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            trie: PathTrie::new(),
            entries: EntryList::new(),
            index: HashMap::new(),
            config,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn entry_for(&self, id: NodeId) -> Option<EntryRef> {
        self.index.get(&id).copied()
    }

    /// Deepest payload-bearing trie node along `path`, with its entry and
    /// depth. Interior payload-less nodes along the way do not count.
    pub fn deepest_cached(&self, path: &Path) -> Option<(TrieRef, EntryRef, usize)> {
        let mut current = self.trie.root();
        let mut best = None;
        for (pos, segment) in path.segments().iter().enumerate() {
            match self.trie.child(current, segment.name(), segment.index()) {
                Some(child) => {
                    current = child;
                    if let Some(&entry) = self.trie.payload(child) {
                        best = Some((child, entry, pos + 1));
                    }
                }
                None => break,
            }
        }
        best
    }

    /// Records `path → id`, creating trie nodes and the entry as needed.
    ///
    /// A different identifier already occupying the exact path is stale and
    /// gets evicted (without sibling shift: a cache repair says nothing
    /// about authoritative ordering). Re-caching a known mapping only
    /// touches it.
    pub fn cache_path(&mut self, path: &Path, id: NodeId) {
        if path.is_root() {
            return;
        }
        if let Some(node) = self.trie.map(path, true) {
            if let Some(&existing) = self.trie.payload(node) {
                if self.entries.get(existing).id == id {
                    self.entries.touch(existing);
                    return;
                }
                tracing::debug!(
                    target = "arbor.hierarchy",
                    path = %path,
                    stale = %self.entries.get(existing).id,
                    fresh = %id,
                    "evicting stale occupant before caching"
                );
                self.evict_ref(node, false);
            }
        }
        let node = self.trie.put(path);
        self.attach_entry(node, id);
    }

    /// Attaches `id` to an existing payload-less trie node, applying the
    /// capacity policy when a fresh entry is needed.
    pub fn attach_entry(&mut self, node: TrieRef, id: NodeId) {
        debug_assert!(self.trie.payload(node).is_none());
        match self.index.get(&id).copied() {
            Some(entry) => {
                // A shareable node gaining another parent path.
                self.trie.set_payload(node, entry);
                let e = self.entries.get_mut(entry);
                if !e.refs.contains(&node) {
                    e.refs.push(node);
                }
                self.entries.touch(entry);
            }
            None => {
                if self.index.len() >= self.config.max_entries {
                    self.evict_one_for_capacity();
                }
                let entry = self.entries.insert(id, node);
                self.trie.set_payload(node, entry);
                self.index.insert(id, entry);
            }
        }
        self.maybe_check();
    }

    /// Detaches one trie node together with its cached subtree, updating
    /// every entry that lost a reference in the process.
    pub fn evict_ref(&mut self, node: TrieRef, shift: bool) {
        let parent = self.trie.parent(node);
        for (trie_ref, entry) in self.trie.remove_subtree(node, shift) {
            self.detach(entry, trie_ref);
        }
        if let Some(parent) = parent {
            self.trie.prune_upward(parent);
        }
        self.maybe_check();
    }

    /// Drops every cached path of `id`.
    pub fn evict_all(&mut self, id: NodeId, shift: bool) {
        while let Some(&entry) = self.index.get(&id) {
            let node = self.entries.get(entry).refs[0];
            self.evict_ref(node, shift);
        }
    }

    fn detach(&mut self, entry: EntryRef, trie_ref: TrieRef) {
        let e = self.entries.get_mut(entry);
        e.refs.retain(|r| *r != trie_ref);
        if e.refs.is_empty() {
            let removed = self.entries.remove(entry);
            self.index.remove(&removed.id);
        }
    }

    /// Oldest-first scan for an entry none of whose paths shields a cached
    /// descendant; evicting one with cached children would disconnect their
    /// trie prefixes. Finding none leaves the insert to proceed past the
    /// bound.
    fn evict_one_for_capacity(&mut self) {
        let mut cursor = self.entries.head();
        while let Some(entry) = cursor {
            let e = self.entries.get(entry);
            if e.refs.iter().all(|r| self.trie.child_count(*r) == 0) {
                let id = e.id;
                tracing::trace!(target = "arbor.hierarchy", %id, "capacity eviction");
                self.evict_all(id, false);
                return;
            }
            cursor = self.entries.next(entry);
        }
    }

    #[inline]
    pub fn maybe_check(&self) {
        if self.config.consistency_check {
            self.check_consistency();
        }
    }

    /// Full cross-check of the trie, the identifier index, and the LRU list.
    ///
    /// A mismatch is a defect in the invalidation protocol, never bad
    /// external input, so this panics instead of returning an error.
    pub fn check_consistency(&self) {
        let mut counted: HashMap<EntryRef, Vec<TrieRef>> = HashMap::new();
        self.trie.traverse(false, |node, &entry| {
            counted.entry(entry).or_default().push(node);
        });

        for (&entry, nodes) in &counted {
            let e = self.entries.get(entry);
            let mut expected = e.refs.clone();
            let mut actual = nodes.clone();
            expected.sort_unstable();
            actual.sort_unstable();
            assert!(
                expected == actual,
                "entry {} references {:?} but the trie attaches it at {:?}",
                e.id,
                expected,
                actual
            );
            assert!(
                self.index.get(&e.id) == Some(&entry),
                "trie payload for {} is not recorded in the identifier index",
                e.id
            );
        }

        for (id, entry) in &self.index {
            assert!(
                counted.contains_key(entry),
                "indexed entry {id} has no live trie reference"
            );
        }

        let mut lru_len = 0;
        for (entry, e) in self.entries.iter() {
            lru_len += 1;
            assert!(
                self.index.get(&e.id) == Some(&entry),
                "LRU entry {} is missing from the identifier index",
                e.id
            );
        }
        assert!(
            lru_len == self.index.len() && self.entries.len() == self.index.len(),
            "LRU list holds {lru_len} entries but the index holds {}",
            self.index.len()
        );
    }
}
