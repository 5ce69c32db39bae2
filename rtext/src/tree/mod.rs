pub mod attributes;

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut, Range};
use std::rc::Rc;

pub use attributes::{AttrValue, Attributes, Postprocessors};

/// Index of a node in a [`Tree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// The closed vocabulary of block directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    Question,
    Answer,
    Error,
    Intro,
    Warning,
    Comment,
    InformalDefinition,
    FormalDefinition,
    Derivation,
    Format,
    Multichoice,
    /// `.. select::`; parsed into [`NodeKind::Select`] rather than a block.
    Select,
}

impl BlockKind {
    pub const ALL: [BlockKind; 12] = [
        BlockKind::Question,
        BlockKind::Answer,
        BlockKind::Error,
        BlockKind::Intro,
        BlockKind::Warning,
        BlockKind::Comment,
        BlockKind::InformalDefinition,
        BlockKind::FormalDefinition,
        BlockKind::Derivation,
        BlockKind::Select,
        BlockKind::Format,
        BlockKind::Multichoice,
    ];

    /// Kind label used for attribute keys, index keys and exports.
    pub fn label(self) -> &'static str {
        match self {
            BlockKind::Question => "question",
            BlockKind::Answer => "answer",
            BlockKind::Error => "error",
            BlockKind::Intro => "intro",
            BlockKind::Warning => "warning",
            BlockKind::Comment => "comment",
            BlockKind::InformalDefinition => "informal-definition",
            BlockKind::FormalDefinition => "formal-definition",
            BlockKind::Derivation => "derivation",
            BlockKind::Format => "format",
            BlockKind::Multichoice => "multichoice",
            BlockKind::Select => "select",
        }
    }

    pub fn from_label(label: &str) -> Option<BlockKind> {
        BlockKind::ALL.into_iter().find(|k| k.label() == label)
    }

    /// Match a `:kind:` token (not `.. select::`, which is a line prefix).
    pub fn from_token(token: &str) -> Option<BlockKind> {
        let label = token.strip_prefix(':')?.strip_suffix(':')?;
        BlockKind::from_label(label).filter(|k| *k != BlockKind::Select)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Section { title: String, level: usize },
    Block(BlockKind),
    /// A `.. select::` directive; children are its reference items until resolved.
    Select { source: String, resolved: bool },
    /// One `* target k=v` item of a select directive.
    Reference { target: String },
    Glossary { term: String },
}

/// A template parameter bound to a node.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Text(String),
    Node(NodeId),
    Nodes(Vec<NodeId>),
}

impl Param {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Param::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Template name to template text.
pub type Formats = BTreeMap<String, String>;

/// Parameters and template table attached to a selected or restyled node.
#[derive(Debug, Clone, Default)]
pub struct Binding {
    pub params: BTreeMap<String, Param>,
    pub formats: Rc<Formats>,
}

impl Binding {
    pub fn new(params: BTreeMap<String, Param>) -> Self {
        Binding {
            params,
            formats: Rc::default(),
        }
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Param::as_text)
    }

    pub fn format(&self) -> Option<&str> {
        self.text("format")
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// Symbolic identifier (`:question: my-id`, `:ID: my-id`).
    pub id: Option<String>,
    pub text: Vec<String>,
    /// Raw `:key: value` lines.
    pub metadata: Vec<String>,
    pub children: Vec<NodeId>,
    /// Body indent used to de-indent free text.
    pub indent: usize,
    /// Concept defined by a section (`:defines:`).
    pub concept: Option<String>,
    pub glossary: Vec<NodeId>,
    pub binding: Option<Binding>,
    pub source_id: usize,
    pub span: Range<usize>,
}

impl Node {
    pub fn new(kind: NodeKind, source_id: usize, span: Range<usize>) -> Self {
        Node {
            kind,
            id: None,
            text: Vec::new(),
            metadata: Vec::new(),
            children: Vec::new(),
            indent: 0,
            concept: None,
            glossary: Vec::new(),
            binding: None,
            source_id,
            span,
        }
    }

    pub fn title(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Section { title, .. } => Some(title),
            _ => None,
        }
    }

    pub fn level(&self) -> Option<usize> {
        match self.kind {
            NodeKind::Section { level, .. } => Some(level),
            _ => None,
        }
    }

    pub fn block_kind(&self) -> Option<BlockKind> {
        match self.kind {
            NodeKind::Block(kind) => Some(kind),
            _ => None,
        }
    }

    pub fn is_section(&self) -> bool {
        matches!(self.kind, NodeKind::Section { .. })
    }

    pub fn label(&self) -> &str {
        match &self.kind {
            NodeKind::Section { .. } => "section",
            NodeKind::Block(kind) => kind.label(),
            NodeKind::Select { .. } => "select",
            NodeKind::Reference { .. } => "selection",
            NodeKind::Glossary { .. } => "glossary",
        }
    }

    /// Free text joined into one string, trailing blank lines dropped.
    pub fn joined_text(&self) -> String {
        join_lines(&self.text)
    }
}

/// Join lines with `\n`, dropping trailing whitespace.
pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n").trim_end().to_string()
}

/// Arena owning every node of a parse or resolution session.
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Tree::default()
    }

    pub fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node id in the arena, reachable from a root or not.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + use<> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Copy a node one level deep: the copy owns its own child list,
    /// metadata and binding, while grandchildren stay shared.
    pub fn shallow_copy(&mut self, id: NodeId) -> NodeId {
        let copy = self[id].clone();
        self.push(copy)
    }

    /// Post-order walk: every node's children before the node itself.
    pub fn walk(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        for &root in roots {
            self.walk_into(root, &mut out);
        }
        out
    }

    fn walk_into(&self, id: NodeId, out: &mut Vec<NodeId>) {
        for &child in &self[id].children {
            self.walk_into(child, out);
        }
        out.push(id);
    }

    /// Pre-order walk: each node before its children.
    pub fn walk_pre(&self, roots: &[NodeId]) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self[id].children.iter().rev().copied());
        }
        out
    }

    /// Attribute side-table of a node: metadata plus child blocks by kind.
    pub fn attributes(
        &self,
        id: NodeId,
        post: &Postprocessors,
    ) -> Result<Attributes, crate::ParseError> {
        attributes::attributes(self, id, post)
    }
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }
}

impl IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }
}
