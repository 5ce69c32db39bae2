pub mod blocks;
pub mod error;
pub mod sections;

pub use error::ParseError;

use crate::Document;
use crate::line::Lines;
use crate::tree::{BlockKind, NodeId, Tree};

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
    directives: Vec<BlockKind>,
}

impl Parser {
    pub fn new(source: String, file_id: usize) -> Self {
        Parser {
            source,
            file_id,
            directives: BlockKind::ALL.to_vec(),
        }
    }

    /// Restrict the recognized directives.
    pub fn with_directives(mut self, directives: &[BlockKind]) -> Self {
        self.directives = directives.to_vec();
        self
    }

    /// Parse the source into a new document with its own tree.
    pub fn parse(&self) -> Result<Document, Vec<ParseError>> {
        let mut tree = Tree::new();
        let roots = self.parse_into(&mut tree)?;
        Ok(Document {
            tree,
            roots,
            source_id: self.file_id,
        })
    }

    /// Parse the source into an existing tree, returning its top-level sections.
    pub fn parse_into(&self, tree: &mut Tree) -> Result<Vec<NodeId>, Vec<ParseError>> {
        let lines = Lines::new(&self.source);
        let forest = sections::section_forest(&lines, self.file_id).map_err(|e| vec![e])?;
        let mut parser = blocks::BlockParser {
            lines: &lines,
            tree,
            file_id: self.file_id,
            directives: &self.directives,
        };
        let mut roots = Vec::with_capacity(forest.len());
        for section in &forest {
            roots.push(parser.build_section(section).map_err(|e| vec![e])?);
        }
        Ok(roots)
    }
}
