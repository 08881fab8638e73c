//! Heap envelope coupling one node with its reclamation bookkeeping.
//!
//! Entries are allocated once and never move; the index and outstanding
//! borrows address them by pointer. Unlinking an entry goes through
//! [`retire`], which defers [`Entry::finalize`] past every read critical
//! section that could still observe the entry. Borrows that escaped the
//! critical section are covered by the entry's [`EntryCount`]; the last
//! one to reach zero destroys the envelope.

use crate::node::Node;
use crate::refcount::EntryCount;
use crossbeam_epoch::Guard;
use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;

/// Storage record for one node.
pub(crate) struct Entry {
    pub(crate) refcount: EntryCount,
    pub(crate) node: Node,
}

/// Pointer wrapper that lets a deferred finalizer move across threads.
/// The entry behind it is unlinked and only touched through atomics.
struct Retired(NonNull<Entry>);

unsafe impl Send for Retired {}

impl Entry {
    /// Allocate an envelope owning `node`. The borrow count is preset
    /// when the caller wants a managed borrow handed back.
    pub(crate) fn alloc(node: Node, managed: bool) -> NonNull<Entry> {
        let boxed = Box::new(Entry {
            refcount: EntryCount::new(managed),
            node,
        });
        NonNull::from(Box::leak(boxed))
    }

    /// Free an envelope.
    ///
    /// # Safety
    /// `entry` must have come from [`Entry::alloc`], must not be reachable
    /// through the index, and no borrow of it may be outstanding.
    pub(crate) unsafe fn dealloc(entry: NonNull<Entry>) {
        drop(Box::from_raw(entry.as_ptr()));
    }

    /// Tear down an envelope that never became reachable through the
    /// index and recover the caller's node from it.
    ///
    /// # Safety
    /// Same contract as [`Entry::dealloc`].
    pub(crate) unsafe fn into_node(entry: NonNull<Entry>) -> Node {
        let boxed = Box::from_raw(entry.as_ptr());
        boxed.node
    }

    /// Deferred half of retirement: clears the alive flag and destroys
    /// the envelope unless borrows are still outstanding, in which case
    /// the last [`NodeRef`] drop destroys it.
    ///
    /// # Safety
    /// `entry` must be unlinked from the index, and every read critical
    /// section that could have observed it must have ended.
    pub(crate) unsafe fn finalize(entry: NonNull<Entry>) {
        if entry.as_ref().refcount.clear_alive() {
            Entry::dealloc(entry);
        }
    }
}

/// Schedule deferred finalization of an unlinked entry.
///
/// Must be called inside the read critical section that performed the
/// unlink; the engine guarantees the finalizer runs no earlier than the
/// moment every section pinned at retire time has ended.
pub(crate) fn retire(entry: NonNull<Entry>, guard: &Guard) {
    let retired = Retired(entry);
    guard.defer(move || {
        // Force capture of the whole `Retired` wrapper (not just its
        // inner field) so Rust 2021 disjoint closure capture doesn't
        // bypass the wrapper's `Send` impl.
        let retired = retired;
        let Retired(entry) = retired;
        unsafe { Entry::finalize(entry) };
    });
}

/// Shared read-only borrow of a node in the store.
///
/// The borrow keeps the underlying entry alive independently of the
/// index: the node stays readable after a concurrent `replace` or
/// `remove`, and even after the store itself is dropped. Cloning
/// elevates the borrow count; dropping releases it, destroying the
/// entry when the last borrow of an unlinked node goes away.
pub struct NodeRef {
    entry: NonNull<Entry>,
}

// The pointee is only read through `&Node`; the refcount is atomic.
unsafe impl Send for NodeRef {}
unsafe impl Sync for NodeRef {}

impl NodeRef {
    /// Wrap an entry whose borrow count has already been elevated for
    /// this handle.
    ///
    /// # Safety
    /// The caller must have incremented the entry's borrow count (or
    /// allocated the entry with the managed preset) for exactly this
    /// handle.
    pub(crate) unsafe fn from_acquired(entry: NonNull<Entry>) -> Self {
        NodeRef { entry }
    }

    fn entry(&self) -> &Entry {
        unsafe { self.entry.as_ref() }
    }
}

impl Deref for NodeRef {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.entry().node
    }
}

impl Clone for NodeRef {
    fn clone(&self) -> Self {
        self.entry().refcount.acquire();
        NodeRef { entry: self.entry }
    }
}

impl Drop for NodeRef {
    fn drop(&mut self) {
        if self.entry().refcount.release() {
            unsafe { Entry::dealloc(self.entry) };
        }
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeRef").field(&self.entry().node).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Node, ObjectNode};
    use crate::nodeid::NodeId;

    fn object(num: u32) -> Node {
        let mut n = ObjectNode::default();
        n.head.node_id = NodeId::numeric(0, num);
        n.into()
    }

    /// A managed allocation hands its preset borrow to a NodeRef; the
    /// entry survives finalization until that borrow is dropped.
    #[test]
    fn borrow_outlives_finalize() {
        let entry = Entry::alloc(object(1), true);
        let node_ref = unsafe { NodeRef::from_acquired(entry) };

        unsafe { Entry::finalize(entry) };
        assert_eq!(node_ref.node_id(), &NodeId::numeric(0, 1));

        let second = node_ref.clone();
        drop(node_ref);
        assert_eq!(second.node_id(), &NodeId::numeric(0, 1));
        drop(second);
    }

    /// An unmanaged entry with no borrows is destroyed by finalize
    /// itself; recovering the node tears the envelope down without
    /// touching the index.
    #[test]
    fn unmanaged_finalize_and_rollback() {
        let entry = Entry::alloc(object(2), false);
        unsafe { Entry::finalize(entry) };

        let entry = Entry::alloc(object(3), false);
        let node = unsafe { Entry::into_node(entry) };
        assert_eq!(node.node_id(), &NodeId::numeric(0, 3));
    }
}
