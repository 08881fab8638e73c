//! Concurrent hash index over store entries.
//!
//! Readers walk bucket chains without locking, under an epoch guard that
//! defers destruction of anything they can still observe. Writers
//! serialize on a stripe lock chosen by the hash; a resize takes every
//! stripe, rebuilds the bucket array, swaps it in, and defers the old
//! chains. Slots link entries but never own them: entry destruction is
//! the retire/finalize protocol in [`crate::entry`].

use crate::entry::{Entry, NodeRef};
use crate::nodeid::NodeId;
use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use parking_lot::Mutex;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Minimum number of buckets.
pub(crate) const MIN_BUCKETS: usize = 32;

/// Number of writer stripes. Because every bucket mask has at least
/// log2(MIN_BUCKETS) low bits set, the stripe bits are a suffix of every
/// bucket index: two writers on the same bucket always contend on the
/// same stripe.
const STRIPES: usize = 32;

/// An alive entry with an equal id is already linked.
pub(crate) struct Exists;

/// No entry with that id is linked.
pub(crate) struct Unknown;

/// Another thread already unlinked the entry.
pub(crate) struct Gone;

fn stripe_of(hash: u64) -> usize {
    hash as usize & (STRIPES - 1)
}

/// Rehash when entries exceed 3/4 of the bucket count.
fn grow_threshold(buckets: usize) -> usize {
    buckets - (buckets >> 2)
}

/// Bucket chain link. Does not own the entry it points to.
struct Slot {
    hash: u64,
    entry: Atomic<Entry>,
    next: Atomic<Slot>,
}

struct Table {
    mask: usize,
    buckets: Box<[Atomic<Slot>]>,
}

impl Table {
    fn new(capacity: usize) -> Table {
        debug_assert!(capacity.is_power_of_two() && capacity >= MIN_BUCKETS);
        Table {
            mask: capacity - 1,
            buckets: (0..capacity).map(|_| Atomic::null()).collect(),
        }
    }

    fn bucket(&self, hash: u64) -> &Atomic<Slot> {
        &self.buckets[hash as usize & self.mask]
    }
}

pub(crate) struct NodeIndex {
    table: Atomic<Table>,
    stripes: Box<[Mutex<()>]>,
    len: AtomicUsize,
    resize: Mutex<()>,
}

impl NodeIndex {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_BUCKETS).next_power_of_two();
        NodeIndex {
            table: Atomic::new(Table::new(capacity)),
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
            len: AtomicUsize::new(0),
            resize: Mutex::new(()),
        }
    }

    /// Number of linked entries. Best effort under concurrency.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// Find the entry linked under `id`. The returned reference stays
    /// dereferenceable while the guard is held; it may belong to an
    /// entry another thread is concurrently retiring, which callers
    /// reconcile through the borrow count.
    pub(crate) fn lookup<'g>(&self, hash: u64, id: &NodeId, guard: &'g Guard) -> Option<&'g Entry> {
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let mut cur = table.bucket(hash).load(Ordering::Acquire, guard);
        while let Some(slot) = unsafe { cur.as_ref() } {
            if slot.hash == hash {
                let entry = unsafe { slot.entry.load(Ordering::Acquire, guard).deref() };
                if entry.node.node_id() == id {
                    return Some(entry);
                }
            }
            cur = slot.next.load(Ordering::Acquire, guard);
        }
        None
    }

    /// Link `entry` unless an entry with an equal id is already linked.
    pub(crate) fn insert_unique(
        &self,
        hash: u64,
        entry: NonNull<Entry>,
        guard: &Guard,
    ) -> Result<(), Exists> {
        let id = unsafe { entry.as_ref() }.node.node_id();
        {
            let _stripe = self.stripes[stripe_of(hash)].lock();
            // The table cannot be swapped while a stripe is held.
            let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
            let bucket = table.bucket(hash);
            let head = bucket.load(Ordering::Acquire, guard);
            let mut cur = head;
            while let Some(slot) = unsafe { cur.as_ref() } {
                if slot.hash == hash {
                    let linked = unsafe { slot.entry.load(Ordering::Acquire, guard).deref() };
                    if linked.node.node_id() == id {
                        return Err(Exists);
                    }
                }
                cur = slot.next.load(Ordering::Acquire, guard);
            }
            let slot = Owned::new(Slot {
                hash,
                entry: Atomic::from(Shared::from(entry.as_ptr() as *const Entry)),
                next: Atomic::from(head),
            });
            bucket.store(slot, Ordering::Release);
            self.len.fetch_add(1, Ordering::Relaxed);
        }
        self.maybe_grow(guard);
        Ok(())
    }

    /// Swap the entry linked under the new entry's id for `new_entry`,
    /// in place, and return the displaced entry for retirement. Readers
    /// observe either the old or the new entry, never a gap.
    pub(crate) fn replace<'g>(
        &self,
        hash: u64,
        new_entry: NonNull<Entry>,
        guard: &'g Guard,
    ) -> Result<&'g Entry, Unknown> {
        let id = unsafe { new_entry.as_ref() }.node.node_id();
        let _stripe = self.stripes[stripe_of(hash)].lock();
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let mut cur = table.bucket(hash).load(Ordering::Acquire, guard);
        while let Some(slot) = unsafe { cur.as_ref() } {
            if slot.hash == hash {
                let linked = unsafe { slot.entry.load(Ordering::Acquire, guard).deref() };
                if linked.node.node_id() == id {
                    let new_shared = Shared::from(new_entry.as_ptr() as *const Entry);
                    let old = slot.entry.swap(new_shared, Ordering::AcqRel, guard);
                    return Ok(unsafe { old.deref() });
                }
            }
            cur = slot.next.load(Ordering::Acquire, guard);
        }
        Err(Unknown)
    }

    /// Unlink the slot holding exactly `entry`. A concurrent unlink of
    /// the same entry is observed as [`Gone`].
    pub(crate) fn delete(
        &self,
        hash: u64,
        entry: *const Entry,
        guard: &Guard,
    ) -> Result<(), Gone> {
        let _stripe = self.stripes[stripe_of(hash)].lock();
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let mut link = table.bucket(hash);
        loop {
            let cur = link.load(Ordering::Acquire, guard);
            let Some(slot) = (unsafe { cur.as_ref() }) else {
                return Err(Gone);
            };
            if ptr::eq(slot.entry.load(Ordering::Acquire, guard).as_raw(), entry) {
                let next = slot.next.load(Ordering::Acquire, guard);
                link.store(next, Ordering::Release);
                // Readers may still be standing on the slot.
                unsafe { guard.defer_destroy(cur) };
                self.len.fetch_sub(1, Ordering::Relaxed);
                return Ok(());
            }
            link = &slot.next;
        }
    }

    /// Collect one elevated borrow per linked entry in a single pass
    /// over the current table. Entries linked after the table pointer
    /// was read may be missed; nothing is visited twice.
    pub(crate) fn snapshot(&self, guard: &Guard) -> Vec<NodeRef> {
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        let mut out = Vec::with_capacity(self.len.load(Ordering::Relaxed));
        for bucket in table.buckets.iter() {
            let mut cur = bucket.load(Ordering::Acquire, guard);
            while let Some(slot) = unsafe { cur.as_ref() } {
                let entry = unsafe { slot.entry.load(Ordering::Acquire, guard).deref() };
                entry.refcount.acquire();
                out.push(unsafe { NodeRef::from_acquired(NonNull::from(entry)) });
                cur = slot.next.load(Ordering::Acquire, guard);
            }
        }
        out
    }

    fn maybe_grow(&self, guard: &Guard) {
        let table = unsafe { self.table.load(Ordering::Acquire, guard).deref() };
        if self.len.load(Ordering::Relaxed) <= grow_threshold(table.buckets.len()) {
            return;
        }
        // A resize already in flight covers this growth.
        let Some(_resize) = self.resize.try_lock() else {
            return;
        };
        let _held: Vec<_> = self.stripes.iter().map(|s| s.lock()).collect();
        let old_shared = self.table.load(Ordering::Acquire, guard);
        let old = unsafe { old_shared.deref() };
        let len = self.len.load(Ordering::Relaxed);
        if len <= grow_threshold(old.buckets.len()) {
            return;
        }
        let mut capacity = old.buckets.len();
        while len > grow_threshold(capacity) {
            capacity <<= 1;
        }
        debug!(
            from = old.buckets.len(),
            to = capacity,
            entries = len,
            "resizing node index"
        );
        let new_table = Table::new(capacity);
        for bucket in old.buckets.iter() {
            let mut cur = bucket.load(Ordering::Acquire, guard);
            while let Some(slot) = unsafe { cur.as_ref() } {
                let entry = slot.entry.load(Ordering::Acquire, guard);
                let target = new_table.bucket(slot.hash);
                let head = target.load(Ordering::Relaxed, guard);
                target.store(
                    Owned::new(Slot {
                        hash: slot.hash,
                        entry: Atomic::from(entry),
                        next: Atomic::from(head),
                    }),
                    Ordering::Relaxed,
                );
                // Readers of the old table keep walking the old chains.
                unsafe { guard.defer_destroy(cur) };
                cur = slot.next.load(Ordering::Acquire, guard);
            }
        }
        self.table.store(Owned::new(new_table), Ordering::Release);
        unsafe { guard.defer_destroy(old_shared) };
    }
}

impl Drop for NodeIndex {
    fn drop(&mut self) {
        // Exclusive access: no readers or writers remain. Every linked
        // entry is finalized in place; outstanding borrows keep their
        // envelopes alive until released.
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let table = self.table.swap(Shared::null(), Ordering::Relaxed, guard);
        let Some(table_ref) = (unsafe { table.as_ref() }) else {
            return;
        };
        for bucket in table_ref.buckets.iter() {
            let mut cur = bucket.load(Ordering::Relaxed, guard);
            while let Some(slot) = unsafe { cur.as_ref() } {
                let next = slot.next.load(Ordering::Relaxed, guard);
                let entry = slot.entry.load(Ordering::Relaxed, guard);
                unsafe {
                    Entry::finalize(NonNull::new_unchecked(entry.as_raw() as *mut Entry));
                    drop(cur.into_owned());
                }
                cur = next;
            }
        }
        unsafe { drop(table.into_owned()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, ObjectNode, VariableNode};
    use crate::nodeid::NodeId;
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    fn object(num: u32) -> Node {
        let mut n = ObjectNode::default();
        n.head.node_id = NodeId::numeric(0, num);
        n.into()
    }

    fn variable(num: u32) -> Node {
        let mut n = VariableNode::default();
        n.head.node_id = NodeId::numeric(0, num);
        n.into()
    }

    fn hash(s: &RandomState, id: &NodeId) -> u64 {
        s.hash_one(id)
    }

    /// Linked entries are found by id equality; duplicates are rejected
    /// and the incumbent stays linked.
    #[test]
    fn insert_lookup_and_duplicate() {
        let s = RandomState::new();
        let index = NodeIndex::with_capacity(MIN_BUCKETS);
        let guard = crossbeam_epoch::pin();

        let id = NodeId::numeric(0, 7);
        let entry = Entry::alloc(object(7), false);
        assert!(index.insert_unique(hash(&s, &id), entry, &guard).is_ok());
        assert_eq!(index.len(), 1);

        let found = index.lookup(hash(&s, &id), &id, &guard).expect("linked");
        assert_eq!(found.node.node_id(), &id);

        let dup = Entry::alloc(variable(7), false);
        assert!(index.insert_unique(hash(&s, &id), dup, &guard).is_err());
        unsafe { Entry::dealloc(dup) };
        assert_eq!(index.len(), 1);
    }

    /// Delete unlinks by entry identity; a second delete of the same
    /// entry reports Gone.
    #[test]
    fn delete_is_by_identity_and_idempotent() {
        let s = RandomState::new();
        let index = NodeIndex::with_capacity(MIN_BUCKETS);
        let guard = crossbeam_epoch::pin();

        let id = NodeId::numeric(0, 1);
        let entry = Entry::alloc(object(1), false);
        index.insert_unique(hash(&s, &id), entry, &guard).ok();

        let found = index.lookup(hash(&s, &id), &id, &guard).expect("linked");
        let raw = found as *const Entry;
        assert!(index.delete(hash(&s, &id), raw, &guard).is_ok());
        assert!(index.delete(hash(&s, &id), raw, &guard).is_err());
        assert!(index.lookup(hash(&s, &id), &id, &guard).is_none());
        assert_eq!(index.len(), 0);

        unsafe { Entry::finalize(NonNull::new_unchecked(raw as *mut Entry)) };
    }

    /// Replace swaps the linked entry in place and hands back the old
    /// one; a miss reports Unknown and links nothing.
    #[test]
    fn replace_swaps_in_place() {
        let s = RandomState::new();
        let index = NodeIndex::with_capacity(MIN_BUCKETS);
        let guard = crossbeam_epoch::pin();

        let id = NodeId::numeric(0, 9);
        let first = Entry::alloc(object(9), false);
        index.insert_unique(hash(&s, &id), first, &guard).ok();

        let second = Entry::alloc(variable(9), false);
        let old = index
            .replace(hash(&s, &id), second, &guard)
            .ok()
            .expect("same id linked");
        assert!(ptr::eq(old as *const Entry, first.as_ptr()));
        unsafe { Entry::finalize(first) };

        let found = index.lookup(hash(&s, &id), &id, &guard).expect("linked");
        assert!(ptr::eq(found as *const Entry, second.as_ptr()));
        assert_eq!(index.len(), 1);

        let miss_id = NodeId::numeric(0, 100);
        let miss = Entry::alloc(object(100), false);
        assert!(index.replace(hash(&s, &miss_id), miss, &guard).is_err());
        unsafe { Entry::dealloc(miss) };
    }

    /// Growth past the load threshold keeps every entry reachable.
    #[test]
    fn resize_preserves_entries() {
        let s = RandomState::new();
        let index = NodeIndex::with_capacity(MIN_BUCKETS);
        let guard = crossbeam_epoch::pin();

        let count = 512u32;
        for i in 0..count {
            let id = NodeId::numeric(0, i + 1);
            let entry = Entry::alloc(object(i + 1), false);
            assert!(index.insert_unique(hash(&s, &id), entry, &guard).is_ok());
        }
        assert_eq!(index.len(), count as usize);
        for i in 0..count {
            let id = NodeId::numeric(0, i + 1);
            assert!(index.lookup(hash(&s, &id), &id, &guard).is_some());
        }
    }

    /// The snapshot elevates one borrow per entry; the borrows stay
    /// readable after the index itself is gone.
    #[test]
    fn snapshot_borrows_survive_index_drop() {
        let s = RandomState::new();
        let index = NodeIndex::with_capacity(MIN_BUCKETS);
        let guard = crossbeam_epoch::pin();

        for i in 0..8u32 {
            let id = NodeId::numeric(0, i + 1);
            let entry = Entry::alloc(object(i + 1), false);
            index.insert_unique(hash(&s, &id), entry, &guard).ok();
        }
        let snapshot = index.snapshot(&guard);
        assert_eq!(snapshot.len(), 8);

        drop(guard);
        drop(index);
        for node_ref in &snapshot {
            assert!(!node_ref.node_id().is_null());
        }
    }
}
