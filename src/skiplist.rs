//! Lock-free-for-readers ordered skiplist used by the memtable.
//!
//! Exactly one writer may call [`Skiplist::insert`] at a time; any number
//! of readers may concurrently call [`Skiplist::contains`] or iterate.
//! Correctness rests entirely on publication order: a node is fully built
//! before it is linked in, the link is published with `Release` ordering,
//! and readers traverse with `Acquire` loads. No locks, no CAS loops — the
//! single-writer invariant makes `Release`/`Acquire` sufficient, exactly as
//! `SPEC_FULL.md` §4.2 and §9 describe.

use std::cmp::Ordering as CmpOrdering;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

const MAX_HEIGHT: usize = 12;
const BRANCHING: u32 = 4;

struct Node<K> {
    key: K,
    /// `next[i]` is the successor at level `i`; levels above `height` are
    /// null and never touched.
    next: Vec<AtomicPtr<Node<K>>>,
}

impl<K> Node<K> {
    fn new(key: K, height: usize) -> *mut Node<K> {
        let mut next = Vec::with_capacity(height);
        next.resize_with(height, || AtomicPtr::new(ptr::null_mut()));
        Box::into_raw(Box::new(Node { key, next }))
    }
}

/// An insert-only, ordered multi-level linked list.
///
/// `K` must be totally ordered via [`Ord`]; the memtable instantiates this
/// with the encoded internal-key byte buffer.
pub struct Skiplist<K: Ord> {
    head: *mut Node<K>,
    max_height: AtomicUsize,
    len: AtomicUsize,
    rng_state: AtomicUsize,
}

// SAFETY: all mutation of node contents happens before a node is linked
// in (single writer), and links are published/observed with
// Release/Acquire ordering, so the structure is safe to share across
// threads under the documented single-writer contract.
unsafe impl<K: Ord + Send> Send for Skiplist<K> {}
unsafe impl<K: Ord + Sync> Sync for Skiplist<K> {}

impl<K: Ord> Skiplist<K> {
    /// Create an empty skiplist. `K::default_head()` is never called —
    /// the head node never stores a real key and is never dereferenced
    /// for comparison.
    pub fn new() -> Self
    where
        K: Default,
    {
        let head = Node::new(K::default(), MAX_HEIGHT);
        Self {
            head,
            max_height: AtomicUsize::new(1),
            len: AtomicUsize::new(0),
            rng_state: AtomicUsize::new(0x2545_f491_4f6c_dd1d),
        }
    }

    /// Number of entries inserted so far.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn random_height(&self) -> usize {
        // xorshift, deterministic-enough for height selection; no need
        // for a crate dependency for this single-purpose generator.
        let mut x = self.rng_state.load(Ordering::Relaxed) as u64;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state.store(x as usize, Ordering::Relaxed);

        let mut height = 1;
        while height < MAX_HEIGHT && (x % u64::from(BRANCHING)) == 0 {
            height += 1;
            x /= u64::from(BRANCHING);
        }
        height
    }

    fn max_height(&self) -> usize {
        self.max_height.load(Ordering::Acquire)
    }

    /// # Safety
    /// `node` must be non-null and valid for the lifetime of this call.
    unsafe fn next(&self, node: *mut Node<K>, level: usize) -> *mut Node<K> {
        unsafe { (&(*node).next)[level].load(Ordering::Acquire) }
    }

    /// Find the node with the greatest key `< key` at every level,
    /// recording it in `prev` (used by `insert`), and return the
    /// immediate successor of `prev[0]`.
    fn find_greater_or_equal(&self, key: &K, mut prev: Option<&mut [*mut Node<K>]>) -> *mut Node<K> {
        let mut level = self.max_height() - 1;
        let mut x = self.head;
        loop {
            // SAFETY: `x` starts at `head` (always valid) and is only ever
            // advanced to nodes returned by `next`, which are either null
            // (loop breaks) or previously-published, still-live nodes —
            // the skiplist never frees a linked-in node.
            let next = unsafe { self.next(x, level) };
            let advance = if next.is_null() {
                false
            } else {
                // SAFETY: `next` just checked non-null.
                let next_key = unsafe { &(*next).key };
                next_key.cmp(key) == CmpOrdering::Less
            };
            if advance {
                x = next;
            } else {
                if let Some(p) = prev.as_deref_mut() {
                    p[level] = x;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Insert `key`. The caller guarantees no equal key is already
    /// present (the memtable enforces this via strictly increasing
    /// sequence numbers baked into every internal key).
    pub fn insert(&self, key: K) {
        let mut prev = [self.head; MAX_HEIGHT];
        self.find_greater_or_equal(&key, Some(&mut prev));

        let height = self.random_height();
        if height > self.max_height() {
            for slot in prev.iter_mut().take(height).skip(self.max_height()) {
                *slot = self.head;
            }
            self.max_height.store(height, Ordering::Release);
        }

        let node = Node::new(key, height);
        for level in 0..height {
            // SAFETY: `node` was just allocated by us and not yet shared;
            // plain writes here are fine, publication happens below.
            unsafe {
                let succ = self.next(prev[level], level);
                (&(*node).next)[level].store(succ, Ordering::Relaxed);
            }
            // Publish: readers that acquire-load this pointer will see a
            // fully-initialized `node` (its own next-pointers were set
            // with the line above, which happens-before this store).
            // SAFETY: `prev[level]` is a live node (head or a previously
            // linked-in node).
            unsafe {
                (&(*prev[level]).next)[level].store(node, Ordering::Release);
            }
        }
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether an entry equal to `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        let node = self.find_greater_or_equal(key, None);
        if node.is_null() {
            return false;
        }
        // SAFETY: non-null nodes returned by `find_greater_or_equal` are
        // live, previously-published nodes.
        unsafe { (*node).key.cmp(key) == CmpOrdering::Equal }
    }

    /// Construct a forward/backward iterator over the skiplist.
    pub fn iter(&self) -> SkiplistIter<'_, K> {
        SkiplistIter {
            list: self,
            node: ptr::null_mut(),
        }
    }
}

impl<K: Ord> Drop for Skiplist<K> {
    fn drop(&mut self) {
        let mut node = self.head;
        while !node.is_null() {
            // SAFETY: single owner at drop time, no concurrent readers.
            let next = unsafe { (&(*node).next)[0].load(Ordering::Relaxed) };
            let _ = unsafe { Box::from_raw(node) };
            node = next;
        }
    }
}

/// Bidirectional iterator over a [`Skiplist`].
///
/// `Prev` is implemented by a forward search from the head rather than
/// back pointers (memtable iteration is rare; see `SPEC_FULL.md` §4.2).
pub struct SkiplistIter<'a, K: Ord> {
    list: &'a Skiplist<K>,
    node: *mut Node<K>,
}

impl<'a, K: Ord> SkiplistIter<'a, K> {
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    pub fn key(&self) -> &'a K {
        debug_assert!(self.valid());
        // SAFETY: `self.node` is non-null only when it points at a live,
        // published node; lifetime `'a` ties the borrow to the skiplist.
        unsafe { &(*self.node).key }
    }

    pub fn seek_to_first(&mut self) {
        // SAFETY: head is always valid.
        self.node = unsafe { self.list.next(self.list.head, 0) };
    }

    pub fn seek_to_last(&mut self) {
        let mut x = self.list.head;
        let mut level = self.list.max_height() - 1;
        loop {
            // SAFETY: `x` always a live node per `find_greater_or_equal`'s
            // argument.
            let next = unsafe { self.list.next(x, level) };
            if !next.is_null() {
                x = next;
            } else if level == 0 {
                break;
            } else {
                level -= 1;
            }
        }
        self.node = if x == self.list.head { ptr::null_mut() } else { x };
    }

    pub fn seek(&mut self, target: &K) {
        self.node = self.list.find_greater_or_equal(target, None);
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        // SAFETY: current node is live.
        self.node = unsafe { self.list.next(self.node, 0) };
    }

    pub fn prev(&mut self) {
        debug_assert!(self.valid());
        let mut x = self.list.head;
        loop {
            // SAFETY: `x` is always a live node (head or previously
            // linked-in); the skiplist never frees a linked-in node.
            let next = unsafe { self.list.next(x, 0) };
            if next.is_null() || next == self.node {
                break;
            }
            x = next;
        }
        self.node = if x == self.list.head { ptr::null_mut() } else { x };
    }
}
