use std::collections::BTreeMap;
use std::rc::Rc;

use rtext::reference::{Group, Target};
use rtext::tree::{Binding, Formats, NodeKind, Param};
use rtext::{Document, NodeId, Tree};
use tracing::{debug, warn};

use crate::error::{ResolveError, Warning};
use crate::loader::{Loaded, Resolver, Session, SourceTable};
use crate::source::{LocalSource, Source, classify, classify_local, has_suffix};
use crate::store;

/// Template used for page selections from non-text sources.
pub const INCLUDEPDF_TEMPLATE: &str = r"
.. raw:: latex

   %%rst2beamer:endframe

   \includepdf[ {{- selectArgs -}} ]{ {{- srcpath -}} }

   %%

";

pub fn includepdf_formats() -> Formats {
    Formats::from([("includepdf".to_string(), INCLUDEPDF_TEMPLATE.to_string())])
}

/// Where the identifiers of one select directive are looked up.
enum Lookup {
    Table(Rc<SourceTable>),
    Store { collection: String, formats: Rc<Formats> },
}

impl Lookup {
    fn formats(&self) -> Rc<Formats> {
        match self {
            Lookup::Table(table) => table.formats.clone(),
            Lookup::Store { formats, .. } => formats.clone(),
        }
    }
}

/// One planned change to a select directive's children.
#[derive(Debug)]
enum Substitution {
    /// Replace the child at `position` by a copy of `source`.
    Replace {
        position: usize,
        source: NodeId,
        params: BTreeMap<String, Param>,
    },
    /// Keep the reference and bind resolved nodes as extra parameters.
    Augment {
        reference: NodeId,
        params: BTreeMap<String, Param>,
    },
}

impl Resolver {
    /// Resolve every select directive of `doc` in place.
    pub fn resolve(&mut self, doc: &mut Document) -> Result<(), ResolveError> {
        let roots = doc.roots.clone();
        let canonical = self
            .files
            .get(doc.source_id)
            .and_then(|f| f.path.canonicalize().ok());
        if let Some(path) = &canonical {
            self.loading.push(path.clone());
        }
        let mut session = Session::new(&mut doc.tree);
        let result = self.resolve_roots(&mut session, &roots);
        if canonical.is_some() {
            self.loading.pop();
        }
        result
    }

    pub(crate) fn resolve_roots(
        &mut self,
        session: &mut Session<'_>,
        roots: &[NodeId],
    ) -> Result<(), ResolveError> {
        let selects: Vec<NodeId> = session
            .tree
            .walk_pre(roots)
            .into_iter()
            .filter(|&id| {
                matches!(
                    session.tree[id].kind,
                    NodeKind::Select {
                        resolved: false,
                        ..
                    }
                )
            })
            .collect();
        for select in selects {
            self.resolve_select(session, select)?;
        }
        Ok(())
    }

    fn resolve_select(&mut self, session: &mut Session<'_>, select: NodeId) -> Result<(), ResolveError> {
        let node = &session.tree[select];
        let NodeKind::Select { source, .. } = &node.kind else {
            return Ok(());
        };
        let raw = source.clone();
        let (source_id, span) = (node.source_id, node.span.clone());
        let base = self.files.get(source_id).map(|f| f.path.clone());
        let suffix = self.config.source_suffix.clone();

        let local = match classify(&raw, base.as_deref(), &suffix) {
            Source::Remote(url) => classify_local(self.cache.download(&url)?, &suffix),
            Source::Local(local) => local,
            Source::Store(collection) => {
                let store = self.store.as_deref().ok_or_else(|| ResolveError::NoStore(raw.clone()))?;
                let lookup = Lookup::Store {
                    collection,
                    formats: Rc::new(store::load_formats(store)?),
                };
                return self.substitute(session.tree, select, &raw, lookup, source_id);
            }
        };

        let lookup = match local {
            LocalSource::Pages(path) => {
                let pdf = if has_suffix(&path, "pdf") {
                    path
                } else {
                    self.cache.convert(&path)?
                };
                bind_pages(session.tree, select, &pdf.display().to_string());
                return Ok(());
            }
            LocalSource::Text(path) => match self.load_source(session, &path)? {
                Loaded::Table(table) => Lookup::Table(table),
                Loaded::Cycle(path) => {
                    warn!(path = %path.display(), "select cycle blocked");
                    self.warnings.push(Warning::new(
                        format!("select cycle blocked: '{}' is already being loaded", path.display()),
                        span,
                        source_id,
                    ));
                    session.tree[select].children.clear();
                    return Ok(());
                }
            },
        };
        self.substitute(session.tree, select, &raw, lookup, source_id)
    }

    fn substitute(
        &self,
        tree: &mut Tree,
        select: NodeId,
        raw: &str,
        lookup: Lookup,
        source_id: usize,
    ) -> Result<(), ResolveError> {
        let plan = self.plan(tree, select, &lookup, source_id)?;
        debug!(source = %raw, substitutions = plan.len(), "resolved select");
        apply(tree, select, plan, lookup.formats());
        Ok(())
    }

    /// Compute the substitutions for a select directive's references.
    fn plan(
        &self,
        tree: &mut Tree,
        select: NodeId,
        lookup: &Lookup,
        source_id: usize,
    ) -> Result<Vec<Substitution>, ResolveError> {
        let mut plan = Vec::new();
        let references = tree[select].children.clone();
        for (position, reference) in references.into_iter().enumerate() {
            let NodeKind::Reference { target } = &tree[reference].kind else {
                continue;
            };
            let target = Target::parse(target)?;
            let mut params = tree[reference]
                .binding
                .as_ref()
                .map(|b| b.params.clone())
                .unwrap_or_default();
            match target {
                Target::Id(id) => {
                    let source = self.lookup(tree, lookup, &id, source_id)?;
                    plan.push(Substitution::Replace {
                        position,
                        source,
                        params,
                    });
                }
                Target::List(ids) => {
                    let nodes = self.lookup_all(tree, lookup, &ids, source_id)?;
                    params.insert("sources".to_string(), Param::Nodes(nodes));
                    plan.push(Substitution::Augment { reference, params });
                }
                Target::Dict(groups) => {
                    for (key, group) in groups {
                        let param = match group {
                            Group::Id(id) => {
                                Param::Node(self.lookup(tree, lookup, &id, source_id)?)
                            }
                            Group::List(ids) => {
                                Param::Nodes(self.lookup_all(tree, lookup, &ids, source_id)?)
                            }
                        };
                        params.insert(key, param);
                    }
                    plan.push(Substitution::Augment { reference, params });
                }
            }
        }
        Ok(plan)
    }

    fn lookup_all(
        &self,
        tree: &mut Tree,
        lookup: &Lookup,
        ids: &[String],
        source_id: usize,
    ) -> Result<Vec<NodeId>, ResolveError> {
        ids.iter()
            .map(|id| self.lookup(tree, lookup, id, source_id))
            .collect()
    }

    fn lookup(
        &self,
        tree: &mut Tree,
        lookup: &Lookup,
        id: &str,
        source_id: usize,
    ) -> Result<NodeId, ResolveError> {
        let found = match lookup {
            Lookup::Table(table) => table.index.get(id),
            Lookup::Store { collection, .. } => match self.store.as_deref() {
                Some(store) => store::fetch_node(store, collection, id, tree, source_id)?,
                None => None,
            },
        };
        found.ok_or_else(|| ResolveError::UnknownId {
            id: id.to_string(),
            origin: match lookup {
                Lookup::Table(table) => table.origin.clone(),
                Lookup::Store { collection, .. } => format!("store:{collection}"),
            },
        })
    }
}

fn apply(tree: &mut Tree, select: NodeId, plan: Vec<Substitution>, formats: Rc<Formats>) {
    for substitution in plan {
        match substitution {
            Substitution::Replace {
                position,
                source,
                params,
            } => {
                let copy = tree.shallow_copy(source);
                tree[copy].binding = Some(Binding {
                    params,
                    formats: formats.clone(),
                });
                tree[select].children[position] = copy;
            }
            Substitution::Augment { reference, params } => {
                let binding = tree[reference].binding.get_or_insert_with(Binding::default);
                binding.params.extend(params);
                binding.formats = formats.clone();
            }
        }
    }
    mark_resolved(tree, select);
}

/// Bind every reference of a page selection to the `includepdf` template.
fn bind_pages(tree: &mut Tree, select: NodeId, pdf: &str) {
    let formats = Rc::new(includepdf_formats());
    for reference in tree[select].children.clone() {
        let NodeKind::Reference { target } = &tree[reference].kind else {
            continue;
        };
        let pages = target.clone();
        let binding = tree[reference].binding.get_or_insert_with(Binding::default);
        binding
            .params
            .insert("format".to_string(), Param::Text("includepdf".to_string()));
        binding.params.insert("selectArgs".to_string(), Param::Text(pages));
        binding
            .params
            .insert("srcpath".to_string(), Param::Text(pdf.to_string()));
        binding.formats = formats.clone();
    }
    mark_resolved(tree, select);
}

fn mark_resolved(tree: &mut Tree, select: NodeId) {
    if let NodeKind::Select { resolved, .. } = &mut tree[select].kind {
        *resolved = true;
    }
}
