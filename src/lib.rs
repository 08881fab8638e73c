//! ua-nodestore: a concurrent, in-memory address-space store for an
//! OPC UA information-model server.
//!
//! The store maps [`NodeId`]s to typed [`Node`]s (objects, variables,
//! methods, types, views). Any number of reader and writer threads may
//! call concurrently: lookups walk the hash index without locking under
//! an epoch guard, writers serialize per stripe, and unlinked entries
//! are destroyed only after every reader that could have observed them
//! has moved on and every escaped borrow has been released.
//!
//! Borrows are [`NodeRef`] handles. A `NodeRef` keeps its node readable
//! through concurrent `replace`/`remove` and even past the store's own
//! drop; releasing is simply dropping the handle.
//!
//! ```
//! use ua_nodestore::{Node, NodeHead, NodeId, NodeStore, VariableNode, Variant};
//!
//! let store = NodeStore::new();
//! let node: Node = VariableNode {
//!     head: NodeHead {
//!         node_id: NodeId::numeric(0, 42),
//!         ..Default::default()
//!     },
//!     value: Variant::Int32(7),
//!     ..Default::default()
//! }
//! .into();
//!
//! store.insert(node).unwrap();
//! let borrowed = store.get(&NodeId::numeric(0, 42)).unwrap();
//! assert_eq!(borrowed.node_id(), &NodeId::numeric(0, 42));
//! store.remove(&NodeId::numeric(0, 42)).unwrap();
//! // The borrow outlives the removal.
//! assert_eq!(borrowed.node_class(), ua_nodestore::NodeClass::Variable);
//! ```

mod entry;
mod index;
mod node;
mod nodeid;
mod refcount;
mod store;

pub use entry::NodeRef;
pub use node::{
    DataTypeNode, LocalizedText, MethodNode, Node, NodeClass, NodeHead, ObjectNode,
    ObjectTypeNode, QualifiedName, ReferenceDescription, ReferenceTypeNode, VariableNode,
    VariableTypeNode, Variant, ViewNode,
};
pub use nodeid::{Guid, Identifier, NodeId, GENERATED_NAMESPACE};
pub use store::{InsertError, NodeStore, RemoveError, ReplaceError};
