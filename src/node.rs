//! Typed nodes of the information model.
//!
//! [`Node`] is a closed sum over the eight node classes. Every variant
//! starts with the common [`NodeHead`]; the store treats nodes as opaque
//! beyond that header. Attribute ownership is by value, so dropping a
//! node frees its strings, reference arrays, and variant values.

use crate::nodeid::NodeId;

/// Class tag of a node variant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeClass {
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
    View,
}

/// Name qualified by a namespace index.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        QualifiedName {
            namespace,
            name: name.into(),
        }
    }
}

/// Human-readable text with a locale tag.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct LocalizedText {
    pub locale: String,
    pub text: String,
}

impl LocalizedText {
    pub fn new(locale: impl Into<String>, text: impl Into<String>) -> Self {
        LocalizedText {
            locale: locale.into(),
            text: text.into(),
        }
    }
}

/// Attribute value stored in variables and variable types.
#[derive(Clone, PartialEq, Debug, Default)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    Double(f64),
    String(String),
    ByteString(Vec<u8>),
}

/// A directed reference from the owning node to a target node.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ReferenceDescription {
    pub reference_type: NodeId,
    pub is_inverse: bool,
    pub target: NodeId,
}

/// Attributes shared by every node class.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct NodeHead {
    pub node_id: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: LocalizedText,
    pub description: LocalizedText,
    pub write_mask: u32,
    pub user_write_mask: u32,
    pub references: Vec<ReferenceDescription>,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct ObjectNode {
    pub head: NodeHead,
    pub event_notifier: u8,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct VariableNode {
    pub head: NodeHead,
    pub value: Variant,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub access_level: u8,
    pub user_access_level: u8,
    pub minimum_sampling_interval: f64,
    pub historizing: bool,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct MethodNode {
    pub head: NodeHead,
    pub executable: bool,
    pub user_executable: bool,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct ObjectTypeNode {
    pub head: NodeHead,
    pub is_abstract: bool,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct VariableTypeNode {
    pub head: NodeHead,
    pub value: Variant,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub is_abstract: bool,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct ReferenceTypeNode {
    pub head: NodeHead,
    pub is_abstract: bool,
    pub symmetric: bool,
    pub inverse_name: LocalizedText,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct DataTypeNode {
    pub head: NodeHead,
    pub is_abstract: bool,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct ViewNode {
    pub head: NodeHead,
    pub contains_no_loops: bool,
    pub event_notifier: u8,
}

/// One addressable element of the information model.
#[derive(Clone, PartialEq, Debug)]
pub enum Node {
    Object(ObjectNode),
    Variable(VariableNode),
    Method(MethodNode),
    ObjectType(ObjectTypeNode),
    VariableType(VariableTypeNode),
    ReferenceType(ReferenceTypeNode),
    DataType(DataTypeNode),
    View(ViewNode),
}

impl Node {
    pub fn node_class(&self) -> NodeClass {
        match self {
            Node::Object(_) => NodeClass::Object,
            Node::Variable(_) => NodeClass::Variable,
            Node::Method(_) => NodeClass::Method,
            Node::ObjectType(_) => NodeClass::ObjectType,
            Node::VariableType(_) => NodeClass::VariableType,
            Node::ReferenceType(_) => NodeClass::ReferenceType,
            Node::DataType(_) => NodeClass::DataType,
            Node::View(_) => NodeClass::View,
        }
    }

    pub fn head(&self) -> &NodeHead {
        match self {
            Node::Object(n) => &n.head,
            Node::Variable(n) => &n.head,
            Node::Method(n) => &n.head,
            Node::ObjectType(n) => &n.head,
            Node::VariableType(n) => &n.head,
            Node::ReferenceType(n) => &n.head,
            Node::DataType(n) => &n.head,
            Node::View(n) => &n.head,
        }
    }

    pub(crate) fn head_mut(&mut self) -> &mut NodeHead {
        match self {
            Node::Object(n) => &mut n.head,
            Node::Variable(n) => &mut n.head,
            Node::Method(n) => &mut n.head,
            Node::ObjectType(n) => &mut n.head,
            Node::VariableType(n) => &mut n.head,
            Node::ReferenceType(n) => &mut n.head,
            Node::DataType(n) => &mut n.head,
            Node::View(n) => &mut n.head,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.head().node_id
    }
}

impl From<ObjectNode> for Node {
    fn from(n: ObjectNode) -> Node {
        Node::Object(n)
    }
}

impl From<VariableNode> for Node {
    fn from(n: VariableNode) -> Node {
        Node::Variable(n)
    }
}

impl From<MethodNode> for Node {
    fn from(n: MethodNode) -> Node {
        Node::Method(n)
    }
}

impl From<ObjectTypeNode> for Node {
    fn from(n: ObjectTypeNode) -> Node {
        Node::ObjectType(n)
    }
}

impl From<VariableTypeNode> for Node {
    fn from(n: VariableTypeNode) -> Node {
        Node::VariableType(n)
    }
}

impl From<ReferenceTypeNode> for Node {
    fn from(n: ReferenceTypeNode) -> Node {
        Node::ReferenceType(n)
    }
}

impl From<DataTypeNode> for Node {
    fn from(n: DataTypeNode) -> Node {
        Node::DataType(n)
    }
}

impl From<ViewNode> for Node {
    fn from(n: ViewNode) -> Node {
        Node::View(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodeid::NodeId;

    /// Every variant reports its own class and exposes the common head.
    #[test]
    fn class_and_head_per_variant() {
        let cases: Vec<(Node, NodeClass)> = vec![
            (ObjectNode::default().into(), NodeClass::Object),
            (VariableNode::default().into(), NodeClass::Variable),
            (MethodNode::default().into(), NodeClass::Method),
            (ObjectTypeNode::default().into(), NodeClass::ObjectType),
            (VariableTypeNode::default().into(), NodeClass::VariableType),
            (ReferenceTypeNode::default().into(), NodeClass::ReferenceType),
            (DataTypeNode::default().into(), NodeClass::DataType),
            (ViewNode::default().into(), NodeClass::View),
        ];
        for (node, class) in cases {
            assert_eq!(node.node_class(), class);
            assert!(node.node_id().is_null());
        }
    }

    /// The head carries the id; variant payloads are independent of it.
    #[test]
    fn node_id_reads_through_head() {
        let node: Node = VariableNode {
            head: NodeHead {
                node_id: NodeId::numeric(2, 7),
                browse_name: QualifiedName::new(2, "speed"),
                ..Default::default()
            },
            value: Variant::Double(3.5),
            ..Default::default()
        }
        .into();
        assert_eq!(node.node_id(), &NodeId::numeric(2, 7));
        assert_eq!(node.head().browse_name.name, "speed");
    }
}
