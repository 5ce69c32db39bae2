use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use minijinja::value::Value;
use minijinja::{Environment, ErrorKind, UndefinedBehavior};
use rtext::tree::attributes::{AttrValue, metadata_dict};
use rtext::tree::{Binding, BlockKind, Formats, NodeKind, Param, Postprocessors};
use rtext::{NodeId, Tree};
use serde_json::{Map, Value as Json, json};
use tracing::debug;

use crate::error::ResolveError;

/// Underline characters used by `make_title`, by nesting level.
pub const TITLE_MARKS: &str = "-.+=_:";

/// Renders resolved trees to text through bound templates.
pub struct Renderer {
    env: Environment<'static>,
    post: Postprocessors,
    /// Parameters every template sees, overridden by a node's own.
    defaults: BTreeMap<String, String>,
}

impl Default for Renderer {
    fn default() -> Self {
        Renderer::new(Postprocessors::default())
    }
}

impl Renderer {
    pub fn new(post: Postprocessors) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.add_function("indented", indented);
        env.add_function("directive", directive);
        env.add_function("make_title", make_title);
        Renderer {
            env,
            post,
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    pub fn postprocessors(&self) -> &Postprocessors {
        &self.post
    }

    /// Render the trees under `roots` to one text.
    pub fn render(&self, tree: &Tree, roots: &[NodeId]) -> Result<String, ResolveError> {
        let mut out = Vec::new();
        self.text_list(tree, roots, &mut out)?;
        Ok(out.join("\n"))
    }

    fn text_list(&self, tree: &Tree, ids: &[NodeId], out: &mut Vec<String>) -> Result<(), ResolveError> {
        for &id in ids {
            let node = &tree[id];
            if let Some(binding) = &node.binding {
                if binding.format().is_some() {
                    out.extend(self.render_bound(tree, id, binding)?);
                } else {
                    out.extend(node.text.iter().cloned());
                    self.text_list(tree, &node.children, out)?;
                }
                continue;
            }
            match &node.kind {
                NodeKind::Select { resolved: false, .. } => out.extend(node.text.iter().cloned()),
                NodeKind::Select { resolved: true, .. } => self.text_list(tree, &node.children, out)?,
                _ => {
                    if let Some(title) = node.title().filter(|t| !t.is_empty()) {
                        out.push(title.to_string());
                        out.push("-".repeat(title.chars().count()));
                    }
                    out.extend(node.text.iter().cloned());
                    self.text_list(tree, &node.children, out)?;
                }
            }
        }
        Ok(())
    }

    /// Output lines of a bound node: its template output, or its own text
    /// when no `format` is bound.
    pub fn render_bound(
        &self,
        tree: &Tree,
        id: NodeId,
        binding: &Binding,
    ) -> Result<Vec<String>, ResolveError> {
        let Some(format) = binding.format() else {
            return Ok(tree[id].text.clone());
        };
        let template = binding
            .formats
            .get(format)
            .ok_or_else(|| ResolveError::MissingTemplate(format.to_string()))?;

        let mut kwargs: Map<String, Json> = self
            .defaults
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        for (key, param) in &binding.params {
            kwargs.insert(key.clone(), self.param_json(tree, param)?);
        }

        let node = &tree[id];
        let title = node
            .title()
            .or_else(|| binding.text("title"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("Untitled {format}"));
        let children = node
            .children
            .iter()
            .map(|&c| self.node_view(tree, c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut ctx = kwargs.clone();
        ctx.insert("this".to_string(), self.node_view(tree, id)?);
        ctx.insert("children".to_string(), Json::Array(children));
        ctx.insert("title".to_string(), json!(title));
        ctx.insert("kwargs".to_string(), Json::Object(kwargs));

        debug!(template = format, node = id.index(), "rendering template");
        let text = self.env.render_str(template, Json::Object(ctx))?;
        Ok(vec![text])
    }

    fn param_json(&self, tree: &Tree, param: &Param) -> Result<Json, ResolveError> {
        Ok(match param {
            Param::Text(s) => json!(s),
            Param::Node(id) => self.node_view(tree, *id)?,
            Param::Nodes(ids) => Json::Array(
                ids.iter()
                    .map(|&id| self.node_view(tree, id))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Template view of a node: its attributes, structural fields and
    /// the views of its children.
    pub fn node_view(&self, tree: &Tree, id: NodeId) -> Result<Json, ResolveError> {
        let node = &tree[id];
        let attrs = tree.attributes(id, &self.post)?;
        let mut view = Map::new();
        for (key, values) in attrs.iter() {
            view.insert(key.clone(), Json::Array(values.iter().map(attr_json).collect()));
        }
        view.insert("kind".to_string(), json!(node.label()));
        view.insert("text".to_string(), json!(node.joined_text()));
        view.insert("lines".to_string(), json!(node.text));
        if let Some(rid) = &node.id {
            view.insert("id".to_string(), json!(rid));
        }
        if let NodeKind::Section { title, level } = &node.kind {
            view.insert("title".to_string(), json!(title));
            view.insert("level".to_string(), json!(level));
        }
        if let NodeKind::Glossary { term } = &node.kind {
            view.insert("term".to_string(), json!(term));
        }
        if let Some(correct) = attrs.correct {
            view.insert("correct".to_string(), json!(correct));
        }
        if !node.glossary.is_empty() {
            let entries = node
                .glossary
                .iter()
                .map(|&g| self.node_view(tree, g))
                .collect::<Result<Vec<_>, _>>()?;
            view.insert("glossary".to_string(), Json::Array(entries));
        }
        let children = node
            .children
            .iter()
            .map(|&c| self.node_view(tree, c))
            .collect::<Result<Vec<_>, _>>()?;
        view.insert("children".to_string(), Json::Array(children));
        Ok(Json::Object(view))
    }

    /// Assign templates by node kind, then render every visible node.
    ///
    /// Sections use `section` (or `fallacy`), questions one of the question
    /// templates with their descendants hidden, and other nodes their kind
    /// label when `formats` defines it.
    pub fn restyle(
        &self,
        tree: &mut Tree,
        roots: &[NodeId],
        formats: Rc<Formats>,
    ) -> Result<String, ResolveError> {
        let hidden = assign_formats(tree, roots, formats);
        let mut parts = Vec::new();
        for id in tree.walk_pre(roots) {
            if hidden.contains(&id) {
                continue;
            }
            match &tree[id].binding {
                Some(binding) => parts.extend(self.render_bound(tree, id, binding)?),
                None => parts.push(tree[id].text.join("\n")),
            }
        }
        Ok(parts.join("\n"))
    }
}

/// Bind a `format` to every node under `roots`, returning the nodes hidden
/// inside questions.
pub fn assign_formats(tree: &mut Tree, roots: &[NodeId], formats: Rc<Formats>) -> HashSet<NodeId> {
    let mut hidden = HashSet::new();
    for id in tree.walk_pre(roots) {
        let node = &tree[id];
        let format = match &node.kind {
            NodeKind::Section { .. } => {
                let meta = metadata_dict(&node.metadata);
                let fallacy = meta
                    .get("conceptType")
                    .is_some_and(|types| types.iter().any(|t| t.contains("fallacy")));
                Some(if fallacy { "fallacy" } else { "section" }.to_string())
            }
            NodeKind::Block(BlockKind::Question) => {
                let kinds: Vec<Option<BlockKind>> =
                    node.children.iter().map(|&c| tree[c].block_kind()).collect();
                hidden.extend(tree.walk_pre(&node.children));
                Some(if kinds.contains(&Some(BlockKind::Multichoice)) {
                    "multichoice-question"
                } else if kinds.contains(&Some(BlockKind::Question)) {
                    "multipart-question"
                } else {
                    "question"
                }
                .to_string())
            }
            NodeKind::Select { .. } => {
                // items are part of the directive text
                hidden.extend(tree.walk_pre(&node.children));
                Some("select".to_string()).filter(|label| formats.contains_key(label))
            }
            _ => Some(node.label().to_string()).filter(|label| formats.contains_key(label)),
        };
        let Some(format) = format else {
            continue;
        };
        let binding = tree[id].binding.get_or_insert_with(Binding::default);
        binding.params.insert("format".to_string(), Param::Text(format));
        binding.formats = formats.clone();
    }
    hidden
}

fn attr_json(value: &AttrValue) -> Json {
    match value {
        AttrValue::Text(s) => json!(s),
        AttrValue::Items(items) => json!(items),
    }
}

fn lines_of(value: &Value) -> Result<Vec<String>, minijinja::Error> {
    if let Some(s) = value.as_str() {
        return Ok(s.split('\n').map(str::to_string).collect());
    }
    Ok(value.try_iter()?.map(|v| v.to_string()).collect())
}

/// Prefix the first line with `prefix` and the rest with as many spaces.
pub fn indented(prefix: String, lines: Value) -> Result<String, minijinja::Error> {
    let lines = lines_of(&lines)?;
    let space = " ".repeat(prefix.chars().count());
    let mut out = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        let lead = if i == 0 { &prefix } else { &space };
        out.push(format!("{lead}{line}"));
    }
    Ok(out.join("\n"))
}

/// Build a `.. name:: arg` directive with `text` as its body.
pub fn directive(name: String, arg: Value, text: Value) -> Result<String, minijinja::Error> {
    let head = format!("{name}:: {arg}");
    if text.as_str().is_none() && text.try_iter().is_ok() {
        let mut lines = vec![head];
        lines.extend(lines_of(&text)?);
        return indented(".. ".to_string(), Value::from(lines));
    }
    indented(".. ".to_string(), Value::from(format!("{head}\n\n{text}")))
}

/// Title underlined with the mark for `level`.
pub fn make_title(title: String, level: Option<usize>) -> Result<String, minijinja::Error> {
    let level = level.unwrap_or(0);
    let mark = TITLE_MARKS.chars().nth(level).ok_or_else(|| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("no title mark for level {level}"),
        )
    })?;
    let underline: String = std::iter::repeat_n(mark, title.chars().count()).collect();
    Ok(format!("{title}\n{underline}"))
}
