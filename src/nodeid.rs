//! Node identifiers.
//!
//! A [`NodeId`] names one node in the address space: a namespace index
//! plus a tagged identifier payload. Equality and hashing cover the full
//! tuple, so ids of different kinds never collide semantically even when
//! their raw bytes match.

use std::fmt;

/// Namespace reserved for identifiers synthesized by the store itself.
pub const GENERATED_NAMESPACE: u16 = 1;

/// 16-byte globally unique identifier payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub [u8; 16]);

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// The identifier payload of a [`NodeId`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Identifier {
    Numeric(u32),
    String(Box<str>),
    Guid(Guid),
    Opaque(Box<[u8]>),
}

/// Identifier of a node, unique per server.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    /// The null id: namespace 0, numeric 0.
    pub const NULL: NodeId = NodeId {
        namespace: 0,
        identifier: Identifier::Numeric(0),
    };

    pub fn numeric(namespace: u16, value: u32) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn string(namespace: u16, value: impl Into<Box<str>>) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    pub fn guid(namespace: u16, value: [u8; 16]) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::Guid(Guid(value)),
        }
    }

    pub fn opaque(namespace: u16, value: impl Into<Box<[u8]>>) -> Self {
        NodeId {
            namespace,
            identifier: Identifier::Opaque(value.into()),
        }
    }

    /// A null id carries no identity: namespace 0 with a zero numeric,
    /// empty string/opaque, or all-zero guid payload. Inserting a node
    /// under a null id makes the store synthesize one.
    pub fn is_null(&self) -> bool {
        if self.namespace != 0 {
            return false;
        }
        match &self.identifier {
            Identifier::Numeric(n) => *n == 0,
            Identifier::String(s) => s.is_empty(),
            Identifier::Guid(g) => g.0 == [0u8; 16],
            Identifier::Opaque(b) => b.is_empty(),
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::NULL
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Numeric(n) => write!(f, "ns={};i={}", self.namespace, n),
            Identifier::String(s) => write!(f, "ns={};s={}", self.namespace, s),
            Identifier::Guid(g) => write!(f, "ns={};g={:?}", self.namespace, g),
            Identifier::Opaque(b) => write!(f, "ns={};b={} bytes", self.namespace, b.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    /// Null detection covers every identifier kind in namespace 0 and
    /// nothing outside it.
    #[test]
    fn null_detection_per_kind() {
        assert!(NodeId::NULL.is_null());
        assert!(NodeId::numeric(0, 0).is_null());
        assert!(NodeId::string(0, "").is_null());
        assert!(NodeId::guid(0, [0u8; 16]).is_null());
        assert!(NodeId::opaque(0, Vec::new()).is_null());

        assert!(!NodeId::numeric(0, 1).is_null());
        assert!(!NodeId::numeric(1, 0).is_null());
        assert!(!NodeId::string(0, "x").is_null());
        assert!(!NodeId::guid(0, [1u8; 16]).is_null());
        assert!(!NodeId::opaque(0, vec![0]).is_null());
    }

    /// Equality is over the full (namespace, kind, payload) tuple: a
    /// numeric and a string id never compare equal, and the namespace
    /// participates.
    #[test]
    fn equality_distinguishes_kind_and_namespace() {
        assert_eq!(NodeId::numeric(2, 42), NodeId::numeric(2, 42));
        assert_ne!(NodeId::numeric(2, 42), NodeId::numeric(3, 42));
        assert_ne!(NodeId::numeric(0, 0), NodeId::string(0, ""));
        assert_ne!(
            NodeId::string(1, "abc"),
            NodeId::opaque(1, b"abc".to_vec())
        );
    }

    /// Equal ids hash equal under one hasher instance.
    #[test]
    fn equal_ids_hash_equal() {
        let s = RandomState::new();
        let a = NodeId::string(4, "motor.speed");
        let b = NodeId::string(4, "motor.speed");
        assert_eq!(s.hash_one(&a), s.hash_one(&b));
    }
}
