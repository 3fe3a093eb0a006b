//! End-to-end scenarios driving the caching resolver the way the repository
//! core does: mutate the authoritative tree, apply the emitted events, read
//! back through the facade.

use std::sync::Arc;

use arbor_core::{ItemId, Name, NodeId, Path};
use arbor_hierarchy::testing::MemoryTree;
use arbor_hierarchy::{
    CacheConfig, CachingResolver, HierarchyError, NodeStore, StoreError, TreeEvent,
};

fn path(s: &str) -> Path {
    s.parse().unwrap()
}

fn checked(max_entries: usize) -> (Arc<MemoryTree>, CachingResolver<Arc<MemoryTree>>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let tree = Arc::new(MemoryTree::new());
    let root = tree.root_id();
    let caching = CachingResolver::with_config(
        tree.clone(),
        root,
        CacheConfig {
            max_entries,
            consistency_check: true,
        },
    );
    (tree, caching)
}

#[test]
fn resolve_is_idempotent_and_populates_prefixes() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    let (b, _) = tree.add_node(a, "b");
    let (c, _) = tree.add_node(b, "c");

    assert_eq!(caching.resolve_path(&path("/a/b/c")).unwrap(), ItemId::Node(c));
    // Every level of the walk is now cached.
    assert_eq!(caching.cached_len(), 3);
    assert_eq!(caching.resolve_path(&path("/a/b")).unwrap(), ItemId::Node(b));
    assert_eq!(caching.cached_len(), 3);

    // Same resolution twice: same answer, same externally observable shape.
    assert_eq!(caching.resolve_path(&path("/a/b/c")).unwrap(), ItemId::Node(c));
    assert_eq!(caching.cached_len(), 3);

    let mut cached = caching.cached_paths();
    cached.sort_by_key(|(p, _)| p.depth());
    let expected = vec![
        (path("/a"), a),
        (path("/a/b"), b),
        (path("/a/b/c"), c),
    ];
    assert_eq!(cached, expected);
    caching.check_consistency();
}

#[test]
fn resolve_root_and_missing_paths() {
    let (tree, caching) = checked(64);
    assert_eq!(
        caching.resolve_path(&Path::root()).unwrap(),
        ItemId::Node(tree.root_id())
    );

    // Identical error kind on a cold and a warm cache.
    for _ in 0..2 {
        match caching.resolve_path(&path("/nope")) {
            Err(HierarchyError::PathNotFound { .. }) => {}
            other => panic!("expected PathNotFound, got {other:?}"),
        }
    }
}

#[test]
fn path_of_populates_every_intermediate_node() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    let (b, _) = tree.add_node(a, "b");
    let (c, _) = tree.add_node(b, "c");

    assert_eq!(caching.path_of(&ItemId::Node(c)).unwrap(), path("/a/b/c"));
    assert_eq!(caching.cached_len(), 3);
    assert_eq!(caching.path_of(&ItemId::Node(b)).unwrap(), path("/a/b"));
    caching.check_consistency();
}

#[test]
fn name_and_depth_come_from_cache_or_store() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    let (b, _) = tree.add_node(a, "b");

    // Uncached reads delegate.
    assert_eq!(caching.name_of(&ItemId::Node(b)).unwrap(), Name::from("b"));
    assert_eq!(caching.depth_of(&ItemId::Node(b)).unwrap(), 2);
    assert_eq!(caching.depth_of(&ItemId::Node(root)).unwrap(), 0);

    // Cached reads answer from the trie.
    caching.resolve_path(&path("/a/b")).unwrap();
    assert_eq!(caching.name_of(&ItemId::Node(b)).unwrap(), Name::from("b"));
    assert_eq!(caching.depth_of(&ItemId::Node(a)).unwrap(), 1);
}

#[test]
fn ancestry_is_answered_for_cached_and_uncached_items() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    let (b, _) = tree.add_node(a, "b");
    let (x, _) = tree.add_node(root, "x");

    assert!(caching.is_ancestor(&ItemId::Node(a), &ItemId::Node(b)).unwrap());
    assert!(!caching.is_ancestor(&ItemId::Node(b), &ItemId::Node(a)).unwrap());
    assert!(!caching.is_ancestor(&ItemId::Node(x), &ItemId::Node(b)).unwrap());

    caching.resolve_path(&path("/a/b")).unwrap();
    caching.resolve_path(&path("/x")).unwrap();
    assert!(caching.is_ancestor(&ItemId::Node(a), &ItemId::Node(b)).unwrap());
    assert!(!caching.is_ancestor(&ItemId::Node(x), &ItemId::Node(b)).unwrap());
}

#[test]
fn properties_resolve_through_their_parent() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    let (b, _) = tree.add_node(a, "b");
    let title = tree.add_property(b, "title");

    let resolved = caching.resolve_path(&path("/a/b/title")).unwrap();
    assert_eq!(resolved, ItemId::Property(title.clone()));

    let prop = ItemId::Property(title);
    assert_eq!(caching.path_of(&prop).unwrap(), path("/a/b/title"));
    assert_eq!(caching.name_of(&prop).unwrap(), Name::from("title"));
    assert_eq!(caching.depth_of(&prop).unwrap(), 3);
    assert!(caching.is_ancestor(&ItemId::Node(b), &prop).unwrap());
}

#[test]
fn removing_a_sibling_shifts_cached_indices() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (f1, _) = tree.add_node(root, "foo");
    let (f2, _) = tree.add_node(root, "foo");
    let (f3, _) = tree.add_node(root, "foo");
    for p in ["/foo", "/foo[2]", "/foo[3]"] {
        caching.resolve_path(&path(p)).unwrap();
    }

    for event in tree.remove_child(root, "foo", 2) {
        caching.apply(&event);
    }

    // Old foo[3] renumbered to foo[2]; foo[1] untouched; foo[2] gone.
    assert_eq!(caching.path_of(&ItemId::Node(f3)).unwrap(), path("/foo[2]"));
    assert_eq!(caching.path_of(&ItemId::Node(f1)).unwrap(), path("/foo"));
    assert_eq!(
        caching.resolve_path(&path("/foo[2]")).unwrap(),
        ItemId::Node(f3)
    );
    match caching.path_of(&ItemId::Node(f2)) {
        Err(HierarchyError::ItemNotFound { .. }) => {}
        other => panic!("expected ItemNotFound, got {other:?}"),
    }
    caching.check_consistency();
}

#[test]
fn same_name_sibling_event_for_another_item_is_ignored() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (f1, _) = tree.add_node(root, "foo");
    caching.resolve_path(&path("/foo")).unwrap();

    // An event naming a different physical item at the same position must
    // not evict the cached one.
    caching.apply(&TreeEvent::ChildRemoved {
        parent: root,
        name: Name::from("foo"),
        index: 1,
        child: ItemId::Node(NodeId::from_raw(999)),
        shareable: false,
    });
    assert_eq!(caching.path_of(&ItemId::Node(f1)).unwrap(), path("/foo"));
}

#[test]
fn discard_shifts_only_for_never_persisted_items() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (_, _) = tree.add_node(root, "foo");
    let (f2, _) = tree.add_node(root, "foo");
    let (f3, _) = tree.add_node(root, "foo");
    for p in ["/foo", "/foo[2]", "/foo[3]"] {
        caching.resolve_path(&path(p)).unwrap();
    }

    // A surviving persistent state: cache-only eviction, indices stay.
    caching.apply(&TreeEvent::ItemDiscarded {
        id: ItemId::Node(f2),
        persisted: true,
        transient_new: false,
    });
    assert_eq!(caching.path_of(&ItemId::Node(f3)).unwrap(), path("/foo[3]"));

    caching.resolve_path(&path("/foo[2]")).unwrap();

    // A rolled-back brand-new item: as if destroyed, siblings renumber.
    caching.apply(&TreeEvent::ItemDiscarded {
        id: ItemId::Node(f2),
        persisted: false,
        transient_new: true,
    });
    assert_eq!(caching.path_of(&ItemId::Node(f3)).unwrap(), path("/foo[2]"));
    caching.check_consistency();
}

#[test]
fn capacity_bound_evicts_least_recently_touched_leaf() {
    let (tree, caching) = checked(2);
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    tree.add_node(root, "b");
    tree.add_node(root, "c");

    caching.resolve_path(&path("/a")).unwrap();
    caching.resolve_path(&path("/b")).unwrap();
    caching.resolve_path(&path("/c")).unwrap();

    // Three unrelated leaves against a bound of two: exactly the oldest one
    // went.
    assert_eq!(caching.cached_len(), 2);
    caching.check_consistency();

    // The evicted mapping still resolves through the store and re-enters the
    // cache.
    assert_eq!(caching.resolve_path(&path("/a")).unwrap(), ItemId::Node(a));
    assert_eq!(caching.cached_len(), 2);
}

#[test]
fn stale_exact_hit_is_evicted_and_surfaces_path_not_found() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    let (b, _) = tree.add_node(a, "b");
    assert_eq!(caching.resolve_path(&path("/a/b")).unwrap(), ItemId::Node(b));

    // The store mutates underneath the cache; no events delivered.
    tree.remove_child(a, "b", 1);

    match caching.resolve_path(&path("/a/b")) {
        Err(HierarchyError::PathNotFound { .. }) => {}
        other => panic!("expected PathNotFound, got {other:?}"),
    }
    // The vanished mapping is gone from the cache.
    assert_eq!(caching.cached_len(), 1);
    caching.check_consistency();
}

#[test]
fn modified_event_evicts_children_that_no_longer_match() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    let (b, _) = tree.add_node(a, "b");
    caching.resolve_path(&path("/a/b")).unwrap();

    // Remove b behind the cache's back, then report only "a changed".
    tree.remove_child(a, "b", 1);
    caching.apply(&TreeEvent::NodeModified(a));

    assert!(caching.path_of(&ItemId::Node(b)).is_err());
    assert_eq!(caching.path_of(&ItemId::Node(a)).unwrap(), path("/a"));
    caching.check_consistency();
}

#[test]
fn reorder_renumbers_cached_same_name_siblings() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (f1, _) = tree.add_node(root, "foo");
    let (f2, _) = tree.add_node(root, "foo");
    let (f3, _) = tree.add_node(root, "foo");
    // Cache the parent and all three children.
    for p in ["/", "/foo", "/foo[2]", "/foo[3]"] {
        caching.resolve_path(&path(p)).unwrap();
    }

    let event = tree.reorder_children(root, &[f3, f1, f2]);
    caching.apply(&event);

    assert_eq!(caching.path_of(&ItemId::Node(f3)).unwrap(), path("/foo"));
    assert_eq!(caching.path_of(&ItemId::Node(f1)).unwrap(), path("/foo[2]"));
    assert_eq!(caching.path_of(&ItemId::Node(f2)).unwrap(), path("/foo[3]"));
    assert_eq!(
        caching.resolve_path(&path("/foo")).unwrap(),
        ItemId::Node(f3)
    );
    caching.check_consistency();
}

#[test]
fn shared_node_is_reachable_under_both_parents() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (p1, _) = tree.add_node(root, "p1");
    let (p2, _) = tree.add_node(root, "p2");
    let (s, _) = tree.add_shareable(p1, "s");
    // The share happened before this session ever resolved anything, so the
    // cache learns both paths through plain resolution.
    tree.share(p2, s);
    assert_eq!(caching.resolve_path(&path("/p1/s")).unwrap(), ItemId::Node(s));
    assert_eq!(caching.resolve_path(&path("/p2/s")).unwrap(), ItemId::Node(s));
    assert_eq!(caching.cached_len(), 3);
    caching.check_consistency();

    let s_path = caching.path_of(&ItemId::Node(s)).unwrap();
    assert!(s_path == path("/p1/s") || s_path == path("/p2/s"));
    assert!(caching.is_ancestor(&ItemId::Node(p1), &ItemId::Node(s)).unwrap());
    assert!(caching.is_ancestor(&ItemId::Node(p2), &ItemId::Node(s)).unwrap());

    // Destroying the share under p1 only evicts that one path.
    for event in tree.remove_child(p1, "s", 1) {
        caching.apply(&event);
    }
    assert_eq!(caching.resolve_path(&path("/p2/s")).unwrap(), ItemId::Node(s));
    assert_eq!(caching.path_of(&ItemId::Node(s)).unwrap(), path("/p2/s"));
    match caching.resolve_path(&path("/p1/s")) {
        Err(HierarchyError::PathNotFound { .. }) => {}
        other => panic!("expected PathNotFound, got {other:?}"),
    }
    caching.check_consistency();
}

#[test]
fn share_event_relocates_an_already_cached_child() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (p1, _) = tree.add_node(root, "p1");
    let (p2, _) = tree.add_node(root, "p2");
    let (s, _) = tree.add_shareable(p1, "s");

    caching.resolve_path(&path("/p1/s")).unwrap();
    caching.resolve_path(&path("/p2")).unwrap();

    let event = tree.share(p2, s);
    caching.apply(&event);

    // One reference only: relocated, not duplicated.
    let s_path = caching.path_of(&ItemId::Node(s)).unwrap();
    assert!(s_path == path("/p1/s") || s_path == path("/p2/s"));
    assert!(caching.is_ancestor(&ItemId::Node(p1), &ItemId::Node(s)).unwrap());
    assert!(caching.is_ancestor(&ItemId::Node(p2), &ItemId::Node(s)).unwrap());
    assert_eq!(caching.resolve_path(&path("/p2/s")).unwrap(), ItemId::Node(s));
    caching.check_consistency();
}

#[test]
fn child_added_under_uncached_parent_evicts_a_moved_child() {
    let (tree, caching) = checked(64);
    let root = tree.root_id();
    let (p1, _) = tree.add_node(root, "p1");
    let (p2, _) = tree.add_node(root, "p2");
    let (s, _) = tree.add_shareable(p1, "s");
    caching.resolve_path(&path("/p1/s")).unwrap();

    // p2 is not cached, so the cache cannot place the new shared path and
    // must drop the child instead.
    assert_eq!(caching.cached_len(), 2);
    let event = tree.share(p2, s);
    caching.apply(&event);
    assert_eq!(caching.cached_len(), 1);

    assert!(caching
        .resolve_path(&path("/p2/s"))
        .is_ok_and(|id| id == ItemId::Node(s)));
    caching.check_consistency();
}

/// A store wrapper that can be switched into a failing mode.
struct FlakyStore {
    inner: Arc<MemoryTree>,
    failing: std::sync::atomic::AtomicBool,
}

impl FlakyStore {
    fn fail(&self, on: bool) {
        self.failing.store(on, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_failing(&self) -> bool {
        self.failing.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl NodeStore for FlakyStore {
    fn child_entry(
        &self,
        parent: NodeId,
        name: &Name,
        index: u32,
    ) -> Result<Option<ItemId>, StoreError> {
        if self.is_failing() {
            return Err(StoreError::inconsistent("backing state unreadable"));
        }
        self.inner.child_entry(parent, name, index)
    }

    fn item_exists(&self, id: &ItemId) -> bool {
        self.inner.item_exists(id)
    }

    fn node_state(&self, id: NodeId) -> Result<arbor_hierarchy::NodeState, StoreError> {
        if self.is_failing() {
            return Err(StoreError::inconsistent("backing state unreadable"));
        }
        self.inner.node_state(id)
    }
}

#[test]
fn store_failure_during_suffix_resolution_evicts_the_prefix() {
    let tree = Arc::new(MemoryTree::new());
    let root = tree.root_id();
    let (a, _) = tree.add_node(root, "a");
    let (b, _) = tree.add_node(a, "b");

    let store = Arc::new(FlakyStore {
        inner: tree.clone(),
        failing: std::sync::atomic::AtomicBool::new(false),
    });
    let caching = CachingResolver::with_config(
        store.clone(),
        root,
        CacheConfig {
            max_entries: 64,
            consistency_check: true,
        },
    );

    caching.resolve_path(&path("/a")).unwrap();
    store.fail(true);

    // The suffix walk fails: the cached prefix is dropped before the error
    // propagates, and the error kind is the store's.
    match caching.resolve_path(&path("/a/b")) {
        Err(HierarchyError::Store(StoreError::Inconsistent { .. })) => {}
        other => panic!("expected store error, got {other:?}"),
    }
    assert_eq!(caching.cached_len(), 0);

    // Once the store recovers, resolution works and re-caches.
    store.fail(false);
    assert_eq!(caching.resolve_path(&path("/a/b")).unwrap(), ItemId::Node(b));
    assert_eq!(caching.cached_len(), 2);
    caching.check_consistency();
}
