use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumString, IntoStaticStr};

/// Index of a node in a [`NodeStore`](crate::NodeStore). Zero is the absent node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    pub const NONE: NodeId = NodeId(0);

    pub fn new(id: u32) -> Self {
        NodeId(id)
    }
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
    pub fn is_some(self) -> bool {
        self.0 != 0
    }
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Tag {
    // literals
    Num,
    Str,
    Bool,
    Null,
    Ident,
    // structure
    Prog,
    Exprs,
    List,
    Record,
    Binding,
    Paren,
    Lambda,
    Apply,
    // operators
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Neg,
    Min,
    Max,
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Range,
    And,
    Or,
    Not,
    Equiv,
    // control
    Case,
    Of,
    If,
    #[serde(rename = "_")]
    #[strum(serialize = "_")]
    Wildcard,
    // collections
    Map,
    Filter,
    Reduce,
    // accessors
    Get,
    Set,
    Val,
    Key,
    Len,
    Nth,
    Hd,
    Tl,
    // host
    Data,
    Arg,
    Json,
    Print,
}

impl Tag {
    /// Tags whose children are scalars rather than node ids.
    pub fn is_leaf(self) -> bool {
        matches!(self, Tag::Num | Tag::Str | Tag::Bool | Tag::Null | Tag::Ident)
    }

    /// Literal data: values that evaluate to themselves.
    pub fn is_literal(self) -> bool {
        matches!(self, Tag::Num | Tag::Str | Tag::Bool | Tag::Null)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// One child slot of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Elt {
    Node(NodeId),
    Text(String),
    Bool(bool),
}

impl From<NodeId> for Elt {
    fn from(id: NodeId) -> Self {
        Elt::Node(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub tag: Tag,
    pub elts: Vec<Elt>,
}

impl Node {
    pub fn new(tag: Tag, elts: Vec<Elt>) -> Self {
        Self { tag, elts }
    }

    /// The node id in slot `index`, or [`NodeId::NONE`] when the slot is missing or scalar.
    pub fn child(&self, index: usize) -> NodeId {
        match self.elts.get(index) {
            Some(Elt::Node(id)) => *id,
            _ => NodeId::NONE,
        }
    }

    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.elts.iter().filter_map(|elt| match elt {
            Elt::Node(id) => Some(*id),
            _ => None,
        })
    }

    pub fn text(&self) -> Option<&str> {
        match self.elts.first() {
            Some(Elt::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn flag(&self) -> Option<bool> {
        match self.elts.first() {
            Some(Elt::Bool(flag)) => Some(*flag),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elts = self
            .elts
            .iter()
            .map(|elt| match elt {
                Elt::Node(id) => id.to_string(),
                Elt::Text(text) => format!("{:?}", text),
                Elt::Bool(flag) => flag.to_string(),
            })
            .join(" ");
        if elts.is_empty() {
            write!(f, "({})", self.tag)
        } else {
            write!(f, "({} {})", self.tag, elts)
        }
    }
}

/// A fully materialized subtree, detached from any store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub tag: Tag,
    pub elts: Vec<TreeElt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeElt {
    Tree(Tree),
    Text(String),
    Bool(bool),
    Absent,
}

impl Tree {
    pub fn new(tag: Tag, elts: Vec<TreeElt>) -> Self {
        Self { tag, elts }
    }
    pub fn leaf(tag: Tag, text: impl Into<String>) -> Self {
        Self {
            tag,
            elts: vec![TreeElt::Text(text.into())],
        }
    }
    pub fn branch(tag: Tag, children: impl IntoIterator<Item = Tree>) -> Self {
        Self {
            tag,
            elts: children.into_iter().map(TreeElt::Tree).collect(),
        }
    }
    pub fn text(&self) -> Option<&str> {
        match self.elts.first() {
            Some(TreeElt::Text(text)) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.tag)?;
        for elt in &self.elts {
            match elt {
                TreeElt::Tree(tree) => write!(f, " {}", tree)?,
                TreeElt::Text(text) => write!(f, " {:?}", text)?,
                TreeElt::Bool(flag) => write!(f, " {}", flag)?,
                TreeElt::Absent => write!(f, " _")?,
            }
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::str::FromStr;

    #[test]
    fn tags_use_upper_case_names() {
        assert_eq!(Tag::Num.to_string(), "NUM");
        assert_eq!(Tag::Exprs.name(), "EXPRS");
        assert_eq!(Tag::from_str("LAMBDA").ok(), Some(Tag::Lambda));
        assert_eq!(Tag::Wildcard.to_string(), "_");
        assert_eq!(serde_json::to_string(&Tag::Concat).ok(), Some("\"CONCAT\"".to_string()));
    }

    #[test]
    fn elts_serialize_untagged() {
        let node = Node::new(
            Tag::Add,
            vec![Elt::Node(NodeId::new(1)), Elt::Node(NodeId::new(2))],
        );
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"tag":"ADD","elts":[1,2]}"#);
        let leaf: Node = serde_json::from_str(r#"{"tag":"NUM","elts":["10"]}"#).unwrap();
        assert_eq!(leaf.text(), Some("10"));
    }

    #[test]
    fn missing_children_read_as_absent() {
        let node = Node::new(Tag::If, vec![Elt::Node(NodeId::new(3))]);
        assert_eq!(node.child(0), NodeId::new(3));
        assert!(node.child(2).is_none());
        assert_eq!(node.to_string(), "(IF #3)");
    }
}
