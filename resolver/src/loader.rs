use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rtext::tree::{BlockKind, Formats, NodeKind, join_lines};
use rtext::{Document, NodeId, Parser, Tree};
use tracing::debug;

use crate::cache::{ArtifactCache, DiskCache};
use crate::config::Config;
use crate::error::{ResolveError, Warning};
use crate::index::{SourceIndex, index_tree};
use crate::source::find_source_files;
use crate::store::DocumentStore;

/// A source file registered with the resolver. Its position in
/// [`Resolver::files`] is the file id carried by its nodes.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

/// A loaded and indexed select source.
#[derive(Debug)]
pub struct SourceTable {
    pub index: SourceIndex,
    pub formats: Rc<Formats>,
    /// Path of the source, for error messages.
    pub origin: String,
}

/// State of one resolution pass over a single tree.
pub(crate) struct Session<'t> {
    pub tree: &'t mut Tree,
    /// Sources loaded into `tree`, by canonical path.
    pub loaded: HashMap<PathBuf, Rc<SourceTable>>,
}

impl<'t> Session<'t> {
    pub fn new(tree: &'t mut Tree) -> Self {
        Session {
            tree,
            loaded: HashMap::new(),
        }
    }
}

/// Outcome of asking for a text source.
pub(crate) enum Loaded {
    Table(Rc<SourceTable>),
    /// The path is already being loaded further up the stack.
    Cycle(PathBuf),
}

/// Parses documents and resolves their select directives.
pub struct Resolver {
    pub(crate) config: Config,
    pub(crate) cache: Box<dyn ArtifactCache>,
    pub(crate) store: Option<Box<dyn DocumentStore>>,
    pub(crate) files: Vec<SourceFile>,
    /// Canonical paths currently being loaded.
    pub(crate) loading: Vec<PathBuf>,
    pub(crate) warnings: Vec<Warning>,
}

impl Resolver {
    pub fn new(config: Config) -> Self {
        let cache = Box::new(DiskCache::from_config(&config));
        Resolver {
            config,
            cache,
            store: None,
            files: Vec::new(),
            loading: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_cache(mut self, cache: Box<dyn ArtifactCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_store(mut self, store: Box<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Register source text, returning its file id.
    pub fn add_source(&mut self, path: PathBuf, text: String) -> usize {
        self.files.push(SourceFile { path, text });
        self.files.len() - 1
    }

    /// Parse registered text into `tree`.
    pub fn parse_source_into(
        &mut self,
        tree: &mut Tree,
        path: PathBuf,
        text: String,
    ) -> Result<Vec<NodeId>, ResolveError> {
        let file_id = self.add_source(path.clone(), text.clone());
        Parser::new(text, file_id)
            .parse_into(tree)
            .map_err(|errors| ResolveError::Parse { path, errors })
    }

    /// Parse text that did not come from disk (or was already read).
    pub fn parse_source(&mut self, path: PathBuf, text: String) -> Result<Document, ResolveError> {
        let mut tree = Tree::new();
        let source_id = self.files.len();
        let roots = self.parse_source_into(&mut tree, path, text)?;
        Ok(Document {
            tree,
            roots,
            source_id,
        })
    }

    pub fn parse_file_into(&mut self, tree: &mut Tree, path: &Path) -> Result<Vec<NodeId>, ResolveError> {
        let text = std::fs::read_to_string(path).map_err(|e| ResolveError::io(path, e))?;
        debug!(path = %path.display(), "parsing");
        self.parse_source_into(tree, path.to_path_buf(), text)
    }

    pub fn parse_file(&mut self, path: &Path) -> Result<Document, ResolveError> {
        let text = std::fs::read_to_string(path).map_err(|e| ResolveError::io(path, e))?;
        self.parse_source(path.to_path_buf(), text)
    }

    /// Parse several files into one document, in order.
    pub fn parse_files(&mut self, paths: &[PathBuf]) -> Result<Document, ResolveError> {
        let mut doc = Document::default();
        for (i, path) in paths.iter().enumerate() {
            if i == 0 {
                doc.source_id = self.files.len();
            }
            let roots = self.parse_file_into(&mut doc.tree, path)?;
            doc.roots.extend(roots);
        }
        Ok(doc)
    }

    /// Template table from every `:format:` block of a formats document.
    pub fn read_formats(&mut self, path: &Path) -> Result<Formats, ResolveError> {
        let doc = self.parse_file(path)?;
        let mut formats = Formats::new();
        for id in doc.tree.walk(&doc.roots) {
            let node = &doc.tree[id];
            if let (NodeKind::Block(BlockKind::Format), Some(name)) = (&node.kind, &node.id) {
                formats.insert(name.clone(), join_lines(&node.text));
            }
        }
        Ok(formats)
    }

    /// Parse a file and resolve all of its select directives.
    pub fn process_select(&mut self, path: &Path) -> Result<Document, ResolveError> {
        let mut doc = self.parse_file(path)?;
        self.resolve(&mut doc)?;
        Ok(doc)
    }

    // -----------------------------------------------------------------------
    // Source loading
    // -----------------------------------------------------------------------

    /// Load, index and resolve a text source once per session.
    pub(crate) fn load_source(
        &mut self,
        session: &mut Session<'_>,
        path: &Path,
    ) -> Result<Loaded, ResolveError> {
        let canonical = path.canonicalize().map_err(|e| ResolveError::io(path, e))?;
        if self.loading.contains(&canonical) {
            return Ok(Loaded::Cycle(canonical));
        }
        if let Some(table) = session.loaded.get(&canonical) {
            debug!(path = %canonical.display(), "source already loaded");
            return Ok(Loaded::Table(table.clone()));
        }

        self.loading.push(canonical.clone());
        let result = self.load_uncached(session, &canonical);
        self.loading.pop();

        let table = Rc::new(result?);
        session.loaded.insert(canonical, table.clone());
        Ok(Loaded::Table(table))
    }

    fn load_uncached(
        &mut self,
        session: &mut Session<'_>,
        path: &Path,
    ) -> Result<SourceTable, ResolveError> {
        let files = if path.is_dir() {
            find_source_files(path, &self.config.source_suffix, &self.config.ignore_marker)
                .map_err(|e| ResolveError::io(path, e))?
        } else {
            vec![path.to_path_buf()]
        };

        let mut roots = Vec::new();
        for file in &files {
            roots.extend(self.parse_file_into(session.tree, file)?);
        }
        let (index, formats) = index_tree(session.tree, &roots);
        self.resolve_roots(session, &roots)?;
        debug!(path = %path.display(), files = files.len(), "loaded source");
        Ok(SourceTable {
            index,
            formats: Rc::new(formats),
            origin: path.display().to_string(),
        })
    }
}
