use crate::{
    ast::{Node, NodeId, Tag, Tree, TreeElt},
    node_store::NodeStore,
    number,
    value::Value,
};

/// Hash-conses CASE patterns and scrutinee values into one private store, so that a
/// structural comparison mostly reduces to comparing ids.
#[derive(Debug)]
pub struct PatternTable {
    store: NodeStore,
    wildcard: NodeId,
}

impl Default for PatternTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternTable {
    pub fn new() -> Self {
        let mut store = NodeStore::new();
        let wildcard = store.intern(Tag::Wildcard, Vec::new());
        Self { store, wildcard }
    }

    pub fn intern(&mut self, tree: &Tree) -> NodeId {
        self.store.intern_tree(tree)
    }

    pub fn intern_value(&mut self, value: &Value) -> NodeId {
        let tree = value_tree(value);
        self.intern(&tree)
    }

    /// Whether `value` has the shape `pattern` describes.
    ///
    /// Besides exact structure and the wildcard, a two-element pattern matches a longer
    /// node by its head and a node of the same kind holding the remaining elements. The
    /// rest is matched the same way, so `[1, [2, _]]` matches `[1, 2, 3, 4]`.
    pub fn matches(&self, pattern: NodeId, value: NodeId) -> bool {
        if pattern == value || pattern == self.wildcard {
            return true;
        }
        match (self.store.node(pattern), self.store.node(value)) {
            (Some(pattern), Some(value)) if pattern.tag == value.tag && !pattern.tag.is_leaf() => {
                let values: Vec<NodeId> = value.children().collect();
                self.matches_children(pattern, &values)
            }
            _ => false,
        }
    }

    fn matches_children(&self, pattern: &Node, values: &[NodeId]) -> bool {
        let patterns: Vec<NodeId> = pattern.children().collect();
        if patterns.len() == values.len() {
            return patterns
                .iter()
                .zip(values)
                .all(|(pattern, value)| self.matches(*pattern, *value));
        }
        match (patterns.as_slice(), values) {
            ([head, rest], [first, others @ ..]) if values.len() > 2 => {
                self.matches(*head, *first) && self.matches_rest(*rest, pattern.tag, others)
            }
            _ => false,
        }
    }

    fn matches_rest(&self, pattern: NodeId, tag: Tag, values: &[NodeId]) -> bool {
        if pattern == self.wildcard {
            return true;
        }
        match self.store.node(pattern) {
            Some(node) if node.tag == tag => self.matches_children(node, values),
            _ => false,
        }
    }
}

/// The tree a runtime value is compared as.
pub fn value_tree(value: &Value) -> Tree {
    match value {
        Value::Null => Tree::new(Tag::Null, Vec::new()),
        Value::Bool(flag) => Tree::new(Tag::Bool, vec![TreeElt::Bool(*flag)]),
        Value::Number(n) => Tree::leaf(Tag::Num, number::format(*n)),
        Value::NaN => Tree::leaf(Tag::Num, "NaN"),
        Value::String(s) => Tree::leaf(Tag::Str, s.as_str()),
        Value::List(items) => Tree::branch(Tag::List, items.iter().map(value_tree)),
        Value::Record(fields) => Tree::branch(
            Tag::Record,
            fields.iter().map(|(key, value)| {
                Tree::branch(Tag::Binding, [Tree::leaf(Tag::Str, key.as_str()), value_tree(value)])
            }),
        ),
        Value::Function(_) => Tree::new(Tag::Lambda, Vec::new()),
    }
}
