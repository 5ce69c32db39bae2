use std::collections::HashMap;

use rtext::tree::{BlockKind, Formats, NodeKind, join_lines};
use rtext::tree::attributes::metadata_dict;
use rtext::{NodeId, Tree};
use tracing::{debug, warn};

/// Normalize an identifier for index keys and lookups.
///
/// Whitespace runs become `_`, commas become `;`, parentheses are removed.
pub fn standardize_identifier(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace(',', ";")
        .replace(['(', ')'], "")
}

/// Identifier → node map that never overwrites a binding.
///
/// A key already bound to a different node is stored under `key.2`,
/// `key.3`, ... instead.
#[derive(Debug, Clone, Default)]
pub struct SourceIndex {
    entries: HashMap<String, NodeId>,
}

impl SourceIndex {
    pub fn new() -> Self {
        SourceIndex::default()
    }

    /// Insert `node` under `key`, returning the key actually used.
    pub fn insert(&mut self, key: &str, node: NodeId) -> String {
        let key = standardize_identifier(key);
        match self.entries.get(&key) {
            None => {
                self.entries.insert(key.clone(), node);
                key
            }
            Some(&existing) if existing == node => key,
            Some(_) => {
                let mut n = 2;
                loop {
                    let candidate = format!("{key}.{n}");
                    match self.entries.get(&candidate) {
                        Some(&existing) if existing == node => return candidate,
                        Some(_) => n += 1,
                        None => {
                            warn!(%key, renamed = %candidate, "duplicate identifier");
                            self.entries.insert(candidate.clone(), node);
                            return candidate;
                        }
                    }
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<NodeId> {
        self.entries.get(&standardize_identifier(key)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Index every identified node under `roots` and collect `:format:` templates.
pub fn index_tree(tree: &Tree, roots: &[NodeId]) -> (SourceIndex, Formats) {
    let mut index = SourceIndex::new();
    let mut formats = Formats::new();
    for &root in roots {
        visit(tree, root, None, &mut index, &mut formats);
    }
    debug!(entries = index.len(), templates = formats.len(), "indexed source");
    (index, formats)
}

/// Post-order: children are indexed before their parent.
fn visit(
    tree: &Tree,
    id: NodeId,
    parent_concept: Option<&str>,
    index: &mut SourceIndex,
    formats: &mut Formats,
) {
    let node = &tree[id];
    for &child in &node.children {
        // subsections do not inherit the enclosing concept
        let inherited = if tree[child].is_section() {
            None
        } else {
            node.concept.as_deref()
        };
        visit(tree, child, inherited, index, formats);
    }

    let meta = metadata_dict(&node.metadata);
    for proved in meta.get("proves").into_iter().flatten() {
        index.insert(&format!("{proved}.proof"), id);
    }
    if let Some(concept) = &node.concept {
        index.insert(&format!("{concept}.definition"), id);
    }
    for &entry in &node.glossary {
        if let NodeKind::Glossary { term } = &tree[entry].kind {
            index.insert(&format!("glossary.{term}"), entry);
        }
    }

    match (&node.kind, &node.id) {
        (NodeKind::Block(BlockKind::Format), Some(name)) => {
            formats.insert(name.clone(), join_lines(&node.text));
        }
        (NodeKind::Select { .. }, _) => {}
        (_, Some(key)) => {
            index.insert(key, id);
        }
        (NodeKind::Block(kind), None) => {
            if let Some(concept) = parent_concept {
                index.insert(&format!("{concept}.{}", kind.label()), id);
            }
        }
        _ => {}
    }
}
