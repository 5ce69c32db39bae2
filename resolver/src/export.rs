use std::io::Write;

use rtext::tree::BlockKind;
use rtext::tree::attributes::{AttrValue, metadata_dict};
use rtext::{NodeId, NodeKind, Tree};
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::ResolveError;
use crate::render::Renderer;

/// One quiz-bank row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionRecord {
    /// `mc` for multiple choice, otherwise `text`.
    pub kind: String,
    pub title: String,
    pub body: String,
    pub answer: String,
    pub errors: Vec<String>,
    pub correct: Option<usize>,
    pub choices: Vec<String>,
}

impl QuestionRecord {
    pub fn from_node(tree: &Tree, id: NodeId, renderer: &Renderer) -> Result<Self, ResolveError> {
        let node = &tree[id];
        let attrs = tree.attributes(id, renderer.postprocessors())?;
        let title = node
            .title()
            .filter(|t| !t.is_empty())
            .or_else(|| attrs.first_text("title"))
            .or_else(|| node.binding.as_ref().and_then(|b| b.text("title")))
            .unwrap_or_default();
        let choices = attrs.items("multichoice").map(<[String]>::to_vec);
        Ok(QuestionRecord {
            kind: if choices.is_some() { "mc" } else { "text" }.to_string(),
            title: title.to_string(),
            body: node.joined_text(),
            answer: attrs.first_text("answer").unwrap_or_default().to_string(),
            errors: attrs.texts("error").into_iter().map(str::to_string).collect(),
            correct: attrs.correct,
            choices: choices.unwrap_or_default(),
        })
    }

    /// Row fields: `kind, title, body, answer`, then the error count and
    /// error texts when there are errors (always for multiple choice), then
    /// the correct index and the choices for multiple choice.
    pub fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.kind.clone(),
            self.title.clone(),
            self.body.clone(),
            self.answer.clone(),
        ];
        let mc = self.kind == "mc";
        if mc || !self.errors.is_empty() {
            row.push(self.errors.len().to_string());
            row.extend(self.errors.iter().cloned());
        }
        if mc {
            row.push(self.correct.map(|c| c.to_string()).unwrap_or_default());
            row.extend(self.choices.iter().cloned());
        }
        row
    }
}

/// Question blocks brought in by selection, in document order.
pub fn selected_questions(tree: &Tree, roots: &[NodeId]) -> Vec<NodeId> {
    tree.walk_pre(roots)
        .into_iter()
        .filter(|&id| {
            let node = &tree[id];
            node.block_kind() == Some(BlockKind::Question) && node.binding.is_some()
        })
        .collect()
}

pub fn question_records(
    tree: &Tree,
    ids: &[NodeId],
    renderer: &Renderer,
) -> Result<Vec<QuestionRecord>, ResolveError> {
    ids.iter()
        .map(|&id| QuestionRecord::from_node(tree, id, renderer))
        .collect()
}

/// Quote a CSV field when it holds a separator, quote or line break.
pub fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn write_rows(records: &[QuestionRecord], out: &mut dyn Write) -> std::io::Result<()> {
    for record in records {
        let fields: Vec<String> = record.to_row().iter().map(|f| csv_field(f)).collect();
        write!(out, "{}\r\n", fields.join(","))?;
    }
    Ok(())
}

/// Flat JSON records of the trees under `roots`.
///
/// Sections carry their subsections as `children`; blocks inside a section
/// follow it as separate records. Select directives are replaced by their
/// items, and unreplaced items are rendered through their templates.
pub fn records(tree: &Tree, roots: &[NodeId], renderer: &Renderer) -> Result<Vec<Value>, ResolveError> {
    let mut out = Vec::new();
    for &root in roots {
        out.extend(node_records(tree, root, renderer)?);
    }
    Ok(out)
}

fn node_records(tree: &Tree, id: NodeId, renderer: &Renderer) -> Result<Vec<Value>, ResolveError> {
    let node = &tree[id];
    match &node.kind {
        NodeKind::Select { .. } => records(tree, &node.children, renderer),
        NodeKind::Reference { .. } => {
            let lines = match &node.binding {
                Some(binding) => renderer.render_bound(tree, id, binding)?,
                None => node.text.clone(),
            };
            let mut record = Map::new();
            record.insert("text".to_string(), json!(lines.join("\n")));
            record.insert("kind".to_string(), json!("selection"));
            if let Some(title) = node.binding.as_ref().and_then(|b| b.text("title")) {
                record.insert("title".to_string(), json!(title));
            }
            Ok(vec![Value::Object(record)])
        }
        NodeKind::Section { title, level } => {
            let mut record = base_record(tree, id, "section");
            record.insert("title".to_string(), json!(title));
            record.insert("level".to_string(), json!(level));
            let mut children = Vec::new();
            let mut blocks = Vec::new();
            for &child in &node.children {
                if tree[child].is_section() {
                    children.extend(node_records(tree, child, renderer)?);
                } else {
                    blocks.extend(node_records(tree, child, renderer)?);
                }
            }
            let keep = !title.is_empty() || !children.is_empty();
            if !children.is_empty() {
                record.insert("children".to_string(), Value::Array(children));
            }
            let mut out = Vec::new();
            if keep {
                out.push(Value::Object(record));
            }
            out.extend(blocks);
            Ok(out)
        }
        NodeKind::Block(_) | NodeKind::Glossary { .. } => {
            let mut record = base_record(tree, id, node.label());
            let (children, _) = rtext::tree::attributes::child_dict(tree, id, renderer.postprocessors())?;
            for (key, values) in children {
                if key == BlockKind::Multichoice.label() {
                    let Some(items) = values.first().and_then(AttrValue::items) else {
                        continue;
                    };
                    let mut text = record
                        .get("text")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    for (letter, item) in ('A'..='Z').zip(items) {
                        text.push_str(&format!("\n\n{letter}. {}", item.replace('\n', " ")));
                    }
                    record.insert("text".to_string(), json!(text));
                } else {
                    let texts: Vec<Value> = values
                        .iter()
                        .map(|v| match v {
                            AttrValue::Text(s) => json!(s),
                            AttrValue::Items(items) => json!(items),
                        })
                        .collect();
                    record.insert(key, Value::Array(texts));
                }
            }
            Ok(vec![Value::Object(record)])
        }
    }
}

/// `text`, `kind`, `rustID` and the flattened metadata of a node.
fn base_record(tree: &Tree, id: NodeId, kind: &str) -> Map<String, Value> {
    let node = &tree[id];
    let mut record = Map::new();
    for (key, values) in metadata_dict(&node.metadata) {
        if key == "title" {
            record.insert(key, json!(values.join(" ")));
        } else {
            record.insert(key, json!(values));
        }
    }
    record.insert("text".to_string(), json!(node.joined_text()));
    record.insert("kind".to_string(), json!(kind));
    if let Some(rid) = &node.id {
        record.insert("rustID".to_string(), json!(rid));
    }
    record
}
