use arbor_core::NodeId;

use crate::trie::TrieRef;

/// Stable handle to a slot in the entry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryRef(u32);

impl EntryRef {
    #[inline]
    fn idx(self) -> usize {
        self.0 as usize
    }
}

/// One cached identifier mapping.
#[derive(Debug)]
pub(crate) struct Entry {
    pub id: NodeId,
    /// Trie nodes whose payload is this entry; more than one only for
    /// shareable nodes (one per parent they are shared under). Never empty
    /// while the entry is live.
    pub refs: Vec<TrieRef>,
    prev: Option<EntryRef>,
    next: Option<EntryRef>,
}

/// Arena of cache entries threaded by an intrusive recency list.
///
/// The list runs oldest-accessed (head) to most-recently-accessed (tail);
/// prev/next are stored as handles inside the slots, so touch and unlink are
/// O(1) without any aliased ownership.
#[derive(Debug, Default)]
pub(crate) struct EntryList {
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
    head: Option<EntryRef>,
    tail: Option<EntryRef>,
    len: usize,
}

impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn get(&self, r: EntryRef) -> &Entry {
        self.slots[r.idx()].as_ref().expect("stale entry ref")
    }

    pub fn get_mut(&mut self, r: EntryRef) -> &mut Entry {
        self.slots[r.idx()].as_mut().expect("stale entry ref")
    }

    /// Allocates a fresh entry with a single trie reference, linked at the
    /// most-recently-used end.
    pub fn insert(&mut self, id: NodeId, first_ref: TrieRef) -> EntryRef {
        let entry = Entry {
            id,
            refs: vec![first_ref],
            prev: None,
            next: None,
        };
        let r = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(entry);
                EntryRef(idx)
            }
            None => {
                let idx = u32::try_from(self.slots.len()).expect("entry arena overflow");
                self.slots.push(Some(entry));
                EntryRef(idx)
            }
        };
        self.link_tail(r);
        self.len += 1;
        r
    }

    pub fn remove(&mut self, r: EntryRef) -> Entry {
        self.unlink(r);
        let entry = self.slots[r.idx()].take().expect("stale entry ref");
        self.free.push(r.0);
        self.len -= 1;
        entry
    }

    /// Moves `r` to the most-recently-used end.
    pub fn touch(&mut self, r: EntryRef) {
        if self.tail == Some(r) {
            return;
        }
        self.unlink(r);
        self.link_tail(r);
    }

    /// Oldest entry, the eviction scan's starting point.
    pub fn head(&self) -> Option<EntryRef> {
        self.head
    }

    /// Next entry toward the most-recently-used end.
    pub fn next(&self, r: EntryRef) -> Option<EntryRef> {
        self.get(r).next
    }

    /// Entries in recency order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (EntryRef, &Entry)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let r = cursor?;
            let entry = self.get(r);
            cursor = entry.next;
            Some((r, entry))
        })
    }

    fn unlink(&mut self, r: EntryRef) {
        let (prev, next) = {
            let entry = self.get(r);
            (entry.prev, entry.next)
        };
        match prev {
            Some(p) => self.get_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.get_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let entry = self.get_mut(r);
        entry.prev = None;
        entry.next = None;
    }

    fn link_tail(&mut self, r: EntryRef) {
        let tail = self.tail;
        {
            let entry = self.get_mut(r);
            entry.prev = tail;
            entry.next = None;
        }
        match tail {
            Some(t) => self.get_mut(t).next = Some(r),
            None => self.head = Some(r),
        }
        self.tail = Some(r);
    }
}
