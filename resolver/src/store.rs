use std::collections::HashMap;

use rtext::tree::attributes::metadata_dict;
use rtext::tree::{BlockKind, Formats, NodeKind};
use rtext::{Node, NodeId, Tree};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ResolveError;

/// Collection holding stored templates.
pub const FORMATS_COLLECTION: &str = "formats";
/// Field stored documents are looked up by.
pub const ID_FIELD: &str = "rustID";

/// A document database offering bulk insert and lookup by field.
pub trait DocumentStore {
    fn insert_many(&mut self, collection: &str, docs: Vec<Value>) -> Result<usize, ResolveError>;

    fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, ResolveError>;

    fn documents(&self, collection: &str) -> Result<Vec<Value>, ResolveError>;
}

/// In-process store, used by the CLI for one-shot runs and by tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl DocumentStore for MemoryStore {
    fn insert_many(&mut self, collection: &str, docs: Vec<Value>) -> Result<usize, ResolveError> {
        let count = docs.len();
        self.collections
            .entry(collection.to_string())
            .or_default()
            .extend(docs);
        Ok(count)
    }

    fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, ResolveError> {
        Ok(self.collections.get(collection).and_then(|docs| {
            docs.iter()
                .find(|d| d.get(field).and_then(Value::as_str) == Some(value))
                .cloned()
        }))
    }

    fn documents(&self, collection: &str) -> Result<Vec<Value>, ResolveError> {
        Ok(self.collections.get(collection).cloned().unwrap_or_default())
    }
}

/// Serialized form of a node subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNode {
    pub kind: String,
    #[serde(rename = "rustID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Select source, reference target or glossary term.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<String>,
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub metadata: Vec<String>,
    #[serde(default)]
    pub children: Vec<StoredNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub glossary: Vec<StoredNode>,
}

/// A stored top-level document with its searchable text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDoc {
    #[serde(flatten)]
    pub node: StoredNode,
    pub content: String,
}

impl StoredNode {
    /// Serialize the subtree at `id`, leaving out the children in `skip`.
    pub fn from_tree(tree: &Tree, id: NodeId, skip: &[NodeId]) -> Self {
        let node = &tree[id];
        let (title, level) = match &node.kind {
            NodeKind::Section { title, level } => (Some(title.clone()), Some(*level)),
            _ => (None, None),
        };
        let arg = match &node.kind {
            NodeKind::Select { source, .. } => Some(source.clone()),
            NodeKind::Reference { target } => Some(target.clone()),
            NodeKind::Glossary { term } => Some(term.clone()),
            _ => None,
        };
        StoredNode {
            kind: node.label().to_string(),
            id: node.id.clone(),
            arg,
            title,
            level,
            concept: node.concept.clone(),
            text: node.text.clone(),
            metadata: node.metadata.clone(),
            children: node
                .children
                .iter()
                .filter(|c| !skip.contains(c))
                .map(|&c| StoredNode::from_tree(tree, c, &[]))
                .collect(),
            glossary: node
                .glossary
                .iter()
                .map(|&g| StoredNode::from_tree(tree, g, &[]))
                .collect(),
        }
    }

    /// Rebuild the subtree in `tree`.
    pub fn import(&self, tree: &mut Tree, source_id: usize) -> Result<NodeId, ResolveError> {
        let arg = || self.arg.clone().unwrap_or_default();
        let kind = match self.kind.as_str() {
            "section" => NodeKind::Section {
                title: self.title.clone().unwrap_or_default(),
                level: self.level.unwrap_or(0),
            },
            "select" => NodeKind::Select {
                source: arg(),
                resolved: false,
            },
            "selection" => NodeKind::Reference { target: arg() },
            "glossary" => NodeKind::Glossary { term: arg() },
            label => NodeKind::Block(
                BlockKind::from_label(label)
                    .ok_or_else(|| ResolveError::Store(format!("unknown node kind '{label}'")))?,
            ),
        };
        let mut node = Node::new(kind, source_id, 0..0);
        node.id = self.id.clone();
        node.concept = self.concept.clone();
        node.text = self.text.clone();
        node.metadata = self.metadata.clone();
        for child in &self.children {
            node.children.push(child.import(tree, source_id)?);
        }
        for entry in &self.glossary {
            node.glossary.push(entry.import(tree, source_id)?);
        }
        Ok(tree.push(node))
    }
}

/// Split a document into stored units: sections at `level` or deeper, with
/// their question blocks stored separately.
pub fn extract_docs(tree: &Tree, roots: &[NodeId], level: usize) -> Vec<StoredDoc> {
    let mut docs = Vec::new();
    for &root in roots {
        collect_docs(tree, root, level, &mut docs);
    }
    docs
}

fn collect_docs(tree: &Tree, id: NodeId, level: usize, out: &mut Vec<StoredDoc>) {
    let node = &tree[id];
    if node.level().is_none_or(|l| l < level) {
        for &child in &node.children {
            if tree[child].is_section() {
                collect_docs(tree, child, level, out);
            }
        }
        return;
    }
    let questions: Vec<NodeId> = node
        .children
        .iter()
        .copied()
        .filter(|&c| tree[c].block_kind() == Some(BlockKind::Question))
        .collect();
    for &question in &questions {
        out.push(stored_doc(tree, question, &[]));
    }
    out.push(stored_doc(tree, id, &questions));
}

fn stored_doc(tree: &Tree, id: NodeId, skip: &[NodeId]) -> StoredDoc {
    let mut node = StoredNode::from_tree(tree, id, skip);
    if node.title.is_none() {
        let titles = metadata_dict(&node.metadata).remove("title").unwrap_or_default();
        if !titles.is_empty() {
            node.title = Some(titles.join("\n"));
        }
    }
    let content = combine_text(&node).join("\n");
    StoredDoc { node, content }
}

/// All text lines of a stored subtree, in document order.
pub fn combine_text(node: &StoredNode) -> Vec<String> {
    let mut lines = node.text.clone();
    for child in &node.children {
        lines.extend(combine_text(child));
    }
    lines
}

/// Store the document units of a tree into `collection`.
pub fn save_docs(
    store: &mut dyn DocumentStore,
    collection: &str,
    tree: &Tree,
    roots: &[NodeId],
    level: usize,
) -> Result<usize, ResolveError> {
    let docs = extract_docs(tree, roots, level)
        .into_iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    store.insert_many(collection, docs)
}

pub fn save_formats(store: &mut dyn DocumentStore, formats: &Formats) -> Result<usize, ResolveError> {
    let docs = formats
        .iter()
        .map(|(name, template)| serde_json::json!({ "_id": name, "template": template }))
        .collect();
    store.insert_many(FORMATS_COLLECTION, docs)
}

pub fn load_formats(store: &dyn DocumentStore) -> Result<Formats, ResolveError> {
    let mut formats = Formats::new();
    for doc in store.documents(FORMATS_COLLECTION)? {
        if let (Some(name), Some(template)) = (
            doc.get("_id").and_then(Value::as_str),
            doc.get("template").and_then(Value::as_str),
        ) {
            formats.insert(name.to_string(), template.to_string());
        }
    }
    Ok(formats)
}

/// Look up a stored node by identifier and import it into `tree`.
pub fn fetch_node(
    store: &dyn DocumentStore,
    collection: &str,
    id: &str,
    tree: &mut Tree,
    source_id: usize,
) -> Result<Option<NodeId>, ResolveError> {
    let Some(doc) = store.find_by_field(collection, ID_FIELD, id)? else {
        return Ok(None);
    };
    let stored: StoredDoc = serde_json::from_value(doc)?;
    stored.node.import(tree, source_id).map(Some)
}
