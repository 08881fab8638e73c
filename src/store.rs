//! The address-space store facade.
//!
//! [`NodeStore`] owns the hash index and the reclamation collector and
//! exposes the operation surface: insert, replace, remove, get, and
//! traversal. Borrows are [`NodeRef`] handles; dropping one is the
//! release that balances every `get`, managed insert/replace, and
//! traversal step.

use crate::entry::{self, Entry, NodeRef};
use crate::index::{NodeIndex, MIN_BUCKETS};
use crate::node::Node;
use crate::nodeid::{NodeId, GENERATED_NAMESPACE};
use crossbeam_epoch::{Collector, Guard};
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::ptr::NonNull;
use thiserror::Error;
use tracing::trace;

/// Knuth multiplicative step spreading synthesized numeric ids across
/// the namespace when the seed collides.
const AUTO_ID_STEP: u32 = 2654435761;

/// Retry bound for id synthesis. The id space is 2^32 per namespace, so
/// exhausting this bound means the namespace is pathologically full;
/// the insert escalates instead of looping forever.
const AUTO_ID_MAX_RETRIES: u32 = 1024;

/// Error returned by [`NodeStore::insert`] and
/// [`NodeStore::insert_managed`]. Failed inserts hand the caller's node
/// back untouched.
#[derive(Debug, Error)]
pub enum InsertError {
    /// An alive entry with an equal id is already linked.
    #[error("node id already exists in the store")]
    NodeIdExists(Node),
    /// Id synthesis did not find a free numeric id within the retry
    /// bound.
    #[error("exhausted retries while synthesizing a node id")]
    AutoIdExhausted(Node),
}

/// Error returned by [`NodeStore::replace`] and
/// [`NodeStore::replace_managed`]. Failed replaces hand the caller's
/// node back untouched.
#[derive(Debug, Error)]
pub enum ReplaceError {
    /// No entry with that id is linked.
    #[error("node id is not known to the store")]
    NodeIdUnknown(Node),
}

/// Error returned by [`NodeStore::remove`].
#[derive(Debug, Error)]
pub enum RemoveError {
    /// No entry with that id is linked, or a concurrent remove won the
    /// race for it.
    #[error("node id is not known to the store")]
    NodeIdUnknown,
}

/// Concurrent, in-memory store of the server's address space.
///
/// Any number of reader and writer threads may call concurrently; no
/// operation takes a global lock. Reads hand out [`NodeRef`] borrows
/// that stay valid after concurrent replacement or removal, and even
/// after the store itself is dropped; the underlying entry is destroyed
/// when the last borrow of an unlinked node is released.
pub struct NodeStore<S = RandomState> {
    index: NodeIndex,
    collector: Collector,
    hasher: S,
}

impl NodeStore<RandomState> {
    pub fn new() -> Self {
        Self::with_capacity(MIN_BUCKETS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, RandomState::new())
    }
}

impl Default for NodeStore<RandomState> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BuildHasher> NodeStore<S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_capacity_and_hasher(MIN_BUCKETS, hasher)
    }

    pub fn with_capacity_and_hasher(capacity: usize, hasher: S) -> Self {
        NodeStore {
            index: NodeIndex::with_capacity(capacity),
            collector: Collector::new(),
            hasher,
        }
    }

    /// Number of linked nodes. Best effort under concurrency.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pin(&self) -> Guard {
        self.collector.register().pin()
    }

    /// Move `node` into the store under its id. A null id makes the
    /// store synthesize a numeric id in the generated namespace.
    pub fn insert(&self, node: Node) -> Result<(), InsertError> {
        self.insert_inner(node, false).map(|_| ())
    }

    /// Like [`NodeStore::insert`], returning a borrow of the node now
    /// owned by the store.
    pub fn insert_managed(&self, node: Node) -> Result<NodeRef, InsertError> {
        let entry = self.insert_inner(node, true)?;
        Ok(unsafe { NodeRef::from_acquired(entry) })
    }

    fn insert_inner(&self, node: Node, managed: bool) -> Result<NonNull<Entry>, InsertError> {
        let synthesize = node.node_id().is_null();
        let entry = Entry::alloc(node, managed);
        let guard = self.pin();

        if !synthesize {
            let hash = self.hasher.hash_one(unsafe { entry.as_ref() }.node.node_id());
            if self.index.insert_unique(hash, entry, &guard).is_err() {
                drop(guard);
                return Err(InsertError::NodeIdExists(unsafe { Entry::into_node(entry) }));
            }
            return Ok(entry);
        }

        // Seed from the current entry count; best effort, collisions are
        // resolved by the multiplicative step.
        let base = (self.index.len() as u32).wrapping_add(1);
        let mut numeric = base;
        let mut attempts = 0u32;
        loop {
            // The entry is not linked yet, so its id can be set in place.
            unsafe {
                (*entry.as_ptr()).node.head_mut().node_id =
                    NodeId::numeric(GENERATED_NAMESPACE, numeric);
            }
            let hash = self.hasher.hash_one(unsafe { entry.as_ref() }.node.node_id());
            if self.index.insert_unique(hash, entry, &guard).is_ok() {
                return Ok(entry);
            }
            attempts += 1;
            if attempts == AUTO_ID_MAX_RETRIES {
                drop(guard);
                let mut node = unsafe { Entry::into_node(entry) };
                node.head_mut().node_id = NodeId::NULL;
                return Err(InsertError::AutoIdExhausted(node));
            }
            trace!(attempts, numeric, "synthesized node id collided");
            numeric = numeric.wrapping_add(base.wrapping_mul(AUTO_ID_STEP));
        }
    }

    /// Swap the linked node with an equal id for `node`. Outstanding
    /// borrows of the displaced node keep observing its old attributes;
    /// the swap installs a fresh entry rather than mutating in place.
    pub fn replace(&self, node: Node) -> Result<(), ReplaceError> {
        self.replace_inner(node, false).map(|_| ())
    }

    /// Like [`NodeStore::replace`], returning a borrow of the new node.
    pub fn replace_managed(&self, node: Node) -> Result<NodeRef, ReplaceError> {
        let entry = self.replace_inner(node, true)?;
        Ok(unsafe { NodeRef::from_acquired(entry) })
    }

    fn replace_inner(&self, node: Node, managed: bool) -> Result<NonNull<Entry>, ReplaceError> {
        let hash = self.hasher.hash_one(node.node_id());
        let entry = Entry::alloc(node, managed);
        let guard = self.pin();
        match self.index.replace(hash, entry, &guard) {
            Ok(old) => {
                entry::retire(NonNull::from(old), &guard);
                Ok(entry)
            }
            Err(_) => {
                drop(guard);
                Err(ReplaceError::NodeIdUnknown(unsafe {
                    Entry::into_node(entry)
                }))
            }
        }
    }

    /// Unlink the node with an equal id and retire its entry.
    /// Outstanding borrows keep the node readable until released.
    pub fn remove(&self, id: &NodeId) -> Result<(), RemoveError> {
        let hash = self.hasher.hash_one(id);
        let guard = self.pin();
        let Some(found) = self.index.lookup(hash, id, &guard) else {
            return Err(RemoveError::NodeIdUnknown);
        };
        if self.index.delete(hash, found, &guard).is_err() {
            // A concurrent remove unlinked the entry first.
            return Err(RemoveError::NodeIdUnknown);
        }
        entry::retire(NonNull::from(found), &guard);
        Ok(())
    }

    /// Borrow the node with an equal id, or `None` if absent. The
    /// borrow is released by dropping the returned handle.
    pub fn get(&self, id: &NodeId) -> Option<NodeRef> {
        let hash = self.hasher.hash_one(id);
        let guard = self.pin();
        let found = self.index.lookup(hash, id, &guard)?;
        found.refcount.acquire();
        Some(unsafe { NodeRef::from_acquired(NonNull::from(found)) })
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        let hash = self.hasher.hash_one(id);
        let guard = self.pin();
        self.index.lookup(hash, id, &guard).is_some()
    }

    /// Borrow every node linked right now, captured in one read
    /// section. Nodes linked after the capture may be missed; none is
    /// yielded twice.
    pub fn iter(&self) -> impl Iterator<Item = NodeRef> {
        let guard = self.pin();
        self.index.snapshot(&guard).into_iter()
    }

    /// Visit every node. Each visit runs outside the read critical
    /// section with the node's borrow elevated, so the visitor may
    /// block or call back into the store without holding up
    /// reclamation.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Node),
    {
        for node_ref in self.iter() {
            visitor(&node_ref);
        }
    }
}

// Teardown: dropping the index unlinks and finalizes every linked
// entry (see `NodeIndex::drop`); dropping the collector afterwards runs
// the finalizers deferred by earlier removals and replacements. Field
// order keeps that sequence.
