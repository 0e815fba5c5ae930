//! Format-preserving parse tree.
//!
//! A [`ParseNode`] is a kind plus an ordered list of children, each either a
//! nested node or a piece of source text (token text including its trailing
//! whitespace). Concatenating the text leaves in order ([`ParseNode::flatten`])
//! reproduces the formula exactly.
//!
//! Nodes are immutable values: rewriting passes build new trees.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    AndTest,
    ArgList,
    Argument,
    ArithExpr,
    Atom,
    CompOperator,
    Comparison,
    ConcatExpr,
    DictMaker,
    Expr,
    ExprList,
    Factor,
    FlCellRange,
    FlCellReference,
    FlColumnReference,
    FlDeletedReference,
    FlInvalidReference,
    FlNakedWorksheetReference,
    FlNamedColumnReference,
    FlNamedRowReference,
    FlReference,
    FlRoot,
    FlRowReference,
    GenFor,
    GenIf,
    GenIter,
    LambDef,
    ListFor,
    ListIf,
    ListIter,
    ListMaker,
    Name,
    NotTest,
    Number,
    Percent,
    Power,
    ShiftExpr,
    SliceOp,
    StringLiteral,
    Subscript,
    SubscriptList,
    Term,
    Test,
    TestList,
    TestListGexp,
    Trailer,
    VarArgsList,
}

impl NodeKind {
    /// True for the node kinds that have a [`Reference`](super::Reference) view.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            NodeKind::FlCellRange
                | NodeKind::FlCellReference
                | NodeKind::FlColumnReference
                | NodeKind::FlDeletedReference
                | NodeKind::FlInvalidReference
                | NodeKind::FlNakedWorksheetReference
                | NodeKind::FlNamedColumnReference
                | NodeKind::FlNamedRowReference
                | NodeKind::FlRowReference
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Child {
    Node(ParseNode),
    Text(String),
}

impl Child {
    pub fn as_node(&self) -> Option<&ParseNode> {
        match self {
            Child::Node(node) => Some(node),
            Child::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Child::Node(_) => None,
            Child::Text(text) => Some(text),
        }
    }

    fn write_flat(&self, out: &mut String) {
        match self {
            Child::Node(node) => node.write_flat(out),
            Child::Text(text) => out.push_str(text),
        }
    }
}

impl From<ParseNode> for Child {
    fn from(node: ParseNode) -> Self {
        Child::Node(node)
    }
}

impl From<String> for Child {
    fn from(text: String) -> Self {
        Child::Text(text)
    }
}

impl From<&str> for Child {
    fn from(text: &str) -> Self {
        Child::Text(text.to_string())
    }
}

/// A node in the formula parse tree. Equality is structural.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParseNode {
    kind: NodeKind,
    children: Vec<Child>,
}

impl ParseNode {
    pub fn new(kind: NodeKind, children: Vec<Child>) -> Self {
        ParseNode { kind, children }
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn children(&self) -> &[Child] {
        &self.children
    }

    pub fn into_children(self) -> Vec<Child> {
        self.children
    }

    /// Child nodes only, skipping text.
    pub fn child_nodes(&self) -> impl Iterator<Item = &ParseNode> {
        self.children.iter().filter_map(Child::as_node)
    }

    /// The source text this node was parsed from.
    pub fn flatten(&self) -> String {
        let mut out = String::new();
        self.write_flat(&mut out);
        out
    }

    fn write_flat(&self, out: &mut String) {
        for child in &self.children {
            child.write_flat(out);
        }
    }

    /// Rebuild the tree bottom-up. `f` sees each node after its children
    /// have been rebuilt and returns its replacement.
    pub fn transform(&self, f: &mut impl FnMut(ParseNode) -> ParseNode) -> ParseNode {
        let children = self
            .children
            .iter()
            .map(|child| match child {
                Child::Node(node) => Child::Node(node.transform(f)),
                Child::Text(text) => Child::Text(text.clone()),
            })
            .collect();
        f(ParseNode::new(self.kind, children))
    }

    /// Rebuild the tree top-down. When `f` returns `Some`, that node replaces
    /// the subtree and is not descended into.
    pub fn replace(&self, f: &mut impl FnMut(&ParseNode) -> Option<ParseNode>) -> ParseNode {
        if let Some(replacement) = f(self) {
            return replacement;
        }
        let children = self
            .children
            .iter()
            .map(|child| match child {
                Child::Node(node) => Child::Node(node.replace(f)),
                Child::Text(text) => Child::Text(text.clone()),
            })
            .collect();
        ParseNode::new(self.kind, children)
    }

    /// Pre-order walk over this node and its descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a ParseNode)) {
        f(self);
        for node in self.child_nodes() {
            node.walk(f);
        }
    }
}

impl fmt::Display for ParseNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flatten())
    }
}

/// Shorthand for building trees in tests and in the parser.
#[macro_export]
macro_rules! node {
    ($kind:ident [ $($child:expr),* $(,)? ]) => {
        $crate::formula::ParseNode::new(
            $crate::formula::NodeKind::$kind,
            vec![$($crate::formula::Child::from($child)),*],
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_concatenates_leaves() {
        let tree = node!(FlRoot[
            "= ",
            node!(ArithExpr[node!(Name["a "]), "+ ", node!(Number["1"])]),
        ]);
        assert_eq!(tree.flatten(), "= a + 1");
        assert_eq!(tree.to_string(), "= a + 1");
    }

    #[test]
    fn test_structural_equality() {
        let a = node!(Atom[node!(Name["x"])]);
        let b = node!(Atom[node!(Name["x"])]);
        let c = node!(Atom[node!(Name["y"])]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, node!(Factor[node!(Name["x"])]));
    }

    #[test]
    fn test_replace_is_pure() {
        let tree = node!(ArithExpr[node!(Name["a"]), "+", node!(Name["b"])]);
        let replaced = tree.replace(&mut |n| {
            (n.kind() == NodeKind::Name && n.flatten() == "b").then(|| node!(Name["c"]))
        });
        assert_eq!(replaced.flatten(), "a+c");
        assert_eq!(tree.flatten(), "a+b");
    }

    #[test]
    fn test_walk_visits_in_order() {
        let tree = node!(ArithExpr[node!(Name["a"]), "+", node!(Name["b"])]);
        let mut seen = Vec::new();
        tree.walk(&mut |n| seen.push(n.kind()));
        assert_eq!(seen, vec![NodeKind::ArithExpr, NodeKind::Name, NodeKind::Name]);
    }
}
