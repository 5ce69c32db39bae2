pub mod line;
pub mod parser;
pub mod reference;
pub mod tree;

pub use parser::{ParseError, Parser};
pub use tree::{BlockKind, Node, NodeId, NodeKind, Tree};

/// A parsed structured-text document.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub tree: Tree,
    /// Top-level sections, in file order.
    pub roots: Vec<NodeId>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub source_id: usize,
}

/// Title and author declared in a document's leading text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocInfo {
    pub title: Option<String>,
    pub author: Option<String>,
}

impl Document {
    /// Read `.. title::` and `:Author:` lines from the first section's text.
    pub fn docinfo(&self) -> DocInfo {
        let mut info = DocInfo::default();
        let Some(&first) = self.roots.first() else {
            return info;
        };
        for line in &self.tree[first].text {
            let line = line.trim();
            if let Some(title) = line.strip_prefix(".. title::") {
                info.title = Some(title.trim().to_string());
            } else if let Some(author) = line.strip_prefix(":Author:") {
                info.author = Some(author.trim().to_string());
            }
        }
        info
    }
}
