// ============================================================
// Layer 5 — Composite Structure
// ============================================================
// Serial runs its children in order. Reverse flips the time
// axis (axis 0), runs its children, and flips back.
//
// Composites own no parameters, so they are kept out of the
// Burn module graph entirely: a Node is a plain tree whose
// leaves are indices into the Layer's flat list of modules.
// Leaf indices follow forward (depth-first) order.
//
// Reverse remembers whether it was declared with a list of
// children or a single child so the document it serialises
// to has the same shape as the one it was built from.

/// Shape of a layer tree. `Leaf(i)` is the i-th leaf module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(usize),
    Serial(Vec<Node>),
    Reverse { children: Vec<Node>, single: bool },
}

impl Node {
    /// Direct children, in forward order. Empty for leaves.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Leaf(_)                  => &[],
            Node::Serial(children)         => children,
            Node::Reverse { children, .. } => children,
        }
    }

    /// The same tree with every leaf index moved up by `by`.
    pub(crate) fn shifted(self, by: usize) -> Node {
        let shift = |children: Vec<Node>| children.into_iter().map(|c| c.shifted(by)).collect();
        match self {
            Node::Leaf(i)                          => Node::Leaf(i + by),
            Node::Serial(children)                 => Node::Serial(shift(children)),
            Node::Reverse { children, single }     => Node::Reverse { children: shift(children), single },
        }
    }

    /// Dotted parameter scope of every leaf, indexed by leaf.
    /// Children are scoped by their position; the root has "".
    pub(crate) fn leaf_scopes(&self, n_leaves: usize) -> Vec<String> {
        fn walk(node: &Node, scope: String, out: &mut [String]) {
            match node {
                Node::Leaf(i) => {
                    if let Some(slot) = out.get_mut(*i) {
                        *slot = scope;
                    }
                }
                _ => {
                    for (pos, child) in node.children().iter().enumerate() {
                        walk(child, crate::ml::params::join(&scope, &pos.to_string()), out);
                    }
                }
            }
        }
        let mut scopes = vec![String::new(); n_leaves];
        walk(self, String::new(), &mut scopes);
        scopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shifted_moves_every_leaf() {
        let tree = Node::Serial(vec![
            Node::Leaf(0),
            Node::Reverse { children: vec![Node::Leaf(1)], single: true },
        ]);
        let moved = tree.shifted(3);
        assert_eq!(
            moved,
            Node::Serial(vec![
                Node::Leaf(3),
                Node::Reverse { children: vec![Node::Leaf(4)], single: true },
            ])
        );
    }

    #[test]
    fn test_leaf_scopes_are_dotted_positions() {
        let tree = Node::Serial(vec![
            Node::Leaf(0),
            Node::Reverse { children: vec![Node::Leaf(1), Node::Leaf(2)], single: false },
        ]);
        assert_eq!(tree.leaf_scopes(3), vec!["0", "1.0", "1.1"]);
        assert_eq!(Node::Leaf(0).leaf_scopes(1), vec![""]);
    }
}
