use std::collections::BTreeMap;

use super::{NodeId, NodeKind, Tree, join_lines};
use crate::parser::ParseError;
use crate::parser::blocks::split_items;

/// Marker placed at the end of the correct multiple-choice item.
pub const CORRECT_MARKER: &str = ":correct:";

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Items(Vec<String>),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Items(_) => None,
        }
    }

    pub fn items(&self) -> Option<&[String]> {
        match self {
            AttrValue::Items(items) => Some(items),
            AttrValue::Text(_) => None,
        }
    }
}

/// Typed side-table of a node: metadata values and child-block texts keyed
/// by name, plus the correct-choice index of a multiple-choice child.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    values: BTreeMap<String, Vec<AttrValue>>,
    pub correct: Option<usize>,
}

impl Attributes {
    /// Values under `key`; empty when the key is absent.
    pub fn get(&self, key: &str) -> &[AttrValue] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn first_text(&self, key: &str) -> Option<&str> {
        self.get(key).iter().find_map(AttrValue::as_text)
    }

    pub fn texts(&self, key: &str) -> Vec<&str> {
        self.get(key).iter().filter_map(AttrValue::as_text).collect()
    }

    pub fn items(&self, key: &str) -> Option<&[String]> {
        self.get(key).iter().find_map(AttrValue::items)
    }

    pub fn push(&mut self, key: impl Into<String>, value: AttrValue) {
        self.values.entry(key.into()).or_default().push(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<AttrValue>)> {
        self.values.iter()
    }
}

/// Result of post-processing one child block's text.
#[derive(Debug, Clone, PartialEq)]
pub struct Processed {
    pub value: AttrValue,
    pub correct: Option<usize>,
}

pub type PostprocessFn = fn(&[String]) -> Result<Processed, String>;

/// Per-kind transforms applied to child-block text.
#[derive(Debug, Clone)]
pub struct Postprocessors {
    table: BTreeMap<String, PostprocessFn>,
}

impl Default for Postprocessors {
    fn default() -> Self {
        Postprocessors::none().with("multichoice", multichoice)
    }
}

impl Postprocessors {
    pub fn none() -> Self {
        Postprocessors {
            table: BTreeMap::new(),
        }
    }

    pub fn with(mut self, label: impl Into<String>, f: PostprocessFn) -> Self {
        self.table.insert(label.into(), f);
        self
    }

    pub fn get(&self, label: &str) -> Option<PostprocessFn> {
        self.table.get(label).copied()
    }
}

/// Split `:key: value` lines into key → values, in line order.
pub fn metadata_dict(metadata: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut dict: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for line in metadata {
        let mut parts = line.splitn(3, ':');
        parts.next();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        dict.entry(key.to_string())
            .or_default()
            .push(value.trim_start().to_string());
    }
    dict
}

/// Bullet items with the `:correct:` marker removed and its item index recorded.
pub fn multichoice(lines: &[String]) -> Result<Processed, String> {
    let mut items = split_items(lines);
    let mut correct = None;
    for (i, item) in items.iter_mut().enumerate() {
        let Some(last) = item.iter_mut().rev().find(|l| !l.trim().is_empty()) else {
            continue;
        };
        if let Some(pos) = last.find(CORRECT_MARKER) {
            last.truncate(pos);
            correct = Some(i);
            break;
        }
    }
    match correct {
        Some(_) => Ok(Processed {
            value: AttrValue::Items(item_texts(items)),
            correct,
        }),
        None => Err(format!(
            "multiple-choice question has no item marked {CORRECT_MARKER}"
        )),
    }
}

fn item_texts(items: Vec<Vec<String>>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| {
            let lines: Vec<String> = item.iter().map(|l| l.trim().to_string()).collect();
            join_lines(&lines)
        })
        .collect()
}

/// Immediate child blocks with text, by kind label.
pub fn child_dict(
    tree: &Tree,
    id: NodeId,
    post: &Postprocessors,
) -> Result<(BTreeMap<String, Vec<AttrValue>>, Option<usize>), ParseError> {
    let mut dict: BTreeMap<String, Vec<AttrValue>> = BTreeMap::new();
    let mut correct = None;
    for &child in &tree[id].children {
        let node = &tree[child];
        let NodeKind::Block(kind) = node.kind else {
            continue;
        };
        if node.text.iter().all(|l| l.trim().is_empty()) {
            continue;
        }
        let value = match post.get(kind.label()) {
            Some(f) => {
                let processed = f(&node.text).map_err(|message| {
                    ParseError::error(message, node.span.clone(), node.source_id)
                })?;
                if processed.correct.is_some() {
                    correct = processed.correct;
                }
                processed.value
            }
            None => AttrValue::Text(node.joined_text()),
        };
        dict.entry(kind.label().to_string()).or_default().push(value);
    }
    Ok((dict, correct))
}

pub(super) fn attributes(
    tree: &Tree,
    id: NodeId,
    post: &Postprocessors,
) -> Result<Attributes, ParseError> {
    let mut attrs = Attributes::default();
    for (key, values) in metadata_dict(&tree[id].metadata) {
        for value in values {
            attrs.push(key.clone(), AttrValue::Text(value));
        }
    }
    let (children, correct) = child_dict(tree, id, post)?;
    for (key, values) in children {
        for value in values {
            attrs.push(key.clone(), value);
        }
    }
    attrs.correct = correct;
    Ok(attrs)
}
