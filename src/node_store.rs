use crate::{
    ast::{Elt, Node, NodeId, Tag, Tree, TreeElt},
    source::Coord,
};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

pub const SNAPSHOT_VERSION: &str = "1";

/// Append-only arena of hash-consed nodes.
///
/// A node's id is a pure function of its tag and children: interning the same
/// structure twice returns the first id. Ids start at 1; id 0 never resolves.
#[derive(Debug, Clone, Default)]
pub struct NodeStore {
    nodes: Vec<Node>,
    index: HashMap<Node, NodeId>,
    coords: HashMap<NodeId, Coord>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn intern(&mut self, tag: Tag, elts: Vec<Elt>) -> NodeId {
        self.intern_at(tag, elts, None)
    }

    /// Interns a node, recording `coord` only if the structure is seen for the first time.
    pub fn intern_at(&mut self, tag: Tag, elts: Vec<Elt>, coord: Option<Coord>) -> NodeId {
        let node = Node::new(tag, elts);
        if let Some(id) = self.index.get(&node) {
            return *id;
        }
        self.nodes.push(node.clone());
        let id = NodeId::new(self.nodes.len() as u32);
        self.index.insert(node, id);
        if let Some(coord) = coord {
            self.coords.insert(id, coord);
        }
        id
    }

    pub fn leaf(&mut self, tag: Tag, text: impl Into<String>) -> NodeId {
        self.intern(tag, vec![Elt::Text(text.into())])
    }

    pub fn branch(&mut self, tag: Tag, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        self.intern(tag, children.into_iter().map(Elt::Node).collect())
    }

    pub fn intern_tree(&mut self, tree: &Tree) -> NodeId {
        let elts = tree
            .elts
            .iter()
            .map(|elt| match elt {
                TreeElt::Tree(child) => Elt::Node(self.intern_tree(child)),
                TreeElt::Text(text) => Elt::Text(text.clone()),
                TreeElt::Bool(flag) => Elt::Bool(*flag),
                TreeElt::Absent => Elt::Node(NodeId::NONE),
            })
            .collect();
        self.intern(tree.tag, elts)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        if id.is_none() {
            return None;
        }
        self.nodes.get(id.get() as usize - 1)
    }

    pub fn tag(&self, id: NodeId) -> Option<Tag> {
        self.node(id).map(|node| node.tag)
    }

    pub fn coord(&self, id: NodeId) -> Option<Coord> {
        self.coords.get(&id).copied()
    }

    /// Materializes the subtree rooted at `id`.
    pub fn tree(&self, id: NodeId) -> Option<Tree> {
        let node = self.node(id)?;
        let elts = node
            .elts
            .iter()
            .map(|elt| match elt {
                Elt::Node(child) => self
                    .tree(*child)
                    .map(TreeElt::Tree)
                    .unwrap_or(TreeElt::Absent),
                Elt::Text(text) => TreeElt::Text(text.clone()),
                Elt::Bool(flag) => TreeElt::Bool(*flag),
            })
            .collect();
        Some(Tree::new(node.tag, elts))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (NodeId::new(index as u32 + 1), node))
    }

    pub fn snapshot(&self, root: NodeId) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            root,
            nodes: self.iter().map(|(id, node)| (id, node.clone())).collect(),
            coords: self.coords.iter().map(|(id, coord)| (*id, *coord)).collect(),
        }
    }

    pub fn from_snapshot(snapshot: &Snapshot) -> Result<NodeStore, SnapshotError> {
        let mut store = NodeStore::new();
        for (expected, (id, node)) in (1u32..).zip(snapshot.nodes.iter()) {
            if id.get() != expected {
                return Err(SnapshotError::MissingNode {
                    id: NodeId::new(expected),
                });
            }
            if let Some(child) = node
                .children()
                .find(|child| child.get() as usize > snapshot.nodes.len())
            {
                return Err(SnapshotError::DanglingChild { parent: *id, child });
            }
            if let Some(child) = node.children().find(|child| *child >= *id) {
                return Err(SnapshotError::ForwardChild { parent: *id, child });
            }
            if let Some(first) = store.index.get(node) {
                return Err(SnapshotError::DuplicateNode {
                    id: *id,
                    first: *first,
                });
            }
            store.nodes.push(node.clone());
            store.index.insert(node.clone(), *id);
        }
        if store.node(snapshot.root).is_none() {
            return Err(SnapshotError::MissingRoot {
                root: snapshot.root,
            });
        }
        store.coords = snapshot
            .coords
            .iter()
            .filter(|(id, _)| store.node(**id).is_some())
            .map(|(id, coord)| (*id, *coord))
            .collect();
        Ok(store)
    }
}

/// The persisted form of a program: every node keyed by id, plus the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    pub root: NodeId,
    pub nodes: BTreeMap<NodeId, Node>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub coords: BTreeMap<NodeId, Coord>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Snapshot, SnapshotError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum SnapshotError {
    #[error("Malformed program snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Program snapshot is missing node {id}")]
    MissingNode { id: NodeId },
    #[error("Node {parent} refers to unknown node {child}")]
    DanglingChild { parent: NodeId, child: NodeId },
    /// Interning always stores children first, so a child at or after its parent
    /// means the snapshot could describe a cycle.
    #[error("Node {parent} refers to node {child}, which does not come before it")]
    ForwardChild { parent: NodeId, child: NodeId },
    #[error("Node {id} duplicates node {first}")]
    DuplicateNode { id: NodeId, first: NodeId },
    #[error("Program root {root} does not exist")]
    MissingRoot { root: NodeId },
}
