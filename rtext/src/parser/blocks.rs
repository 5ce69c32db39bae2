use std::collections::BTreeMap;
use std::ops::Range;

use tracing::debug;

use crate::line::{Lines, strip_columns};
use crate::parser::error::ParseError;
use crate::parser::sections::SectionInterval;
use crate::reference;
use crate::tree::{Binding, BlockKind, Node, NodeId, NodeKind, Param, Tree};

/// Option names of standard docutils directives and bibliographic fields.
/// Lines starting with these stay in the text instead of becoming metadata.
pub const DOCUTILS_OPTIONS: &[&str] = &[
    ":width:", ":alt:", ":height:", ":scale:", ":align:", ":target:", ":figwidth:",
    ":figclass:", ":subtitle:", ":header:", ":widths:", ":header-rows:", ":stub-columns:",
    ":file:", ":url:", ":encoding:", ":delim:", ":quote:", ":keepspace:", ":escape:",
    ":depth:", ":local:", ":backlinks:", ":prefix:", ":suffix:", ":start:", ":ltrim:",
    ":rtrim:", ":trim:", ":start-line:", ":end-line:", ":start-after:", ":end-before:",
    ":literal:", ":code:", ":number-lines:", ":tab-width:", ":Author:", ":Authors:",
    ":Organization:", ":Contact:", ":Address:", ":Version:", ":Status:", ":Date:",
    ":Copyright:", ":Dedication:", ":Abstract:",
];

const SELECT_PREFIX: &str = ".. select::";
const GLOSSARY_PREFIX: &str = ".. glossary::";
const BULLET: &str = "* ";

/// Location of one directive found by [`generate_blocks`].
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStart {
    /// Directive line.
    pub start: usize,
    /// One past the last body line.
    pub stop: usize,
    pub kind: BlockKind,
    /// Text after the directive token: the id, or a select's source.
    pub arg: Option<String>,
    /// Indent fixed by the first body line; `None` for an empty body.
    pub body_indent: Option<usize>,
}

/// True for a `:key: value` line that is not a docutils option.
pub fn is_metadata(line: &str) -> bool {
    let Some(token) = line.split_whitespace().next() else {
        return false;
    };
    token.len() > 2
        && token.starts_with(':')
        && token.ends_with(':')
        && token.split(':').count() == 3
        && !DOCUTILS_OPTIONS.contains(&token)
}

/// Recognize a directive at line `i`, with its body bounded by `end`.
pub fn block_start(
    lines: &Lines,
    i: usize,
    end: usize,
    directives: &[BlockKind],
) -> Option<BlockStart> {
    let text = lines.text(i);
    let (kind, arg) = if let Some(rest) = text.strip_prefix(SELECT_PREFIX) {
        (BlockKind::Select, Some(rest.trim().to_string()))
    } else {
        let mut tokens = text.split_whitespace();
        let kind = BlockKind::from_token(tokens.next()?)?;
        (kind, tokens.next().map(str::to_string))
    };
    if !directives.contains(&kind) {
        return None;
    }
    let arg = arg.filter(|a| !a.is_empty());
    let indent = lines.indent(i)?;

    let mut j = i + 1;
    while j < end && lines.is_blank(j) {
        j += 1;
    }
    let body_indent = match lines.indent_in(j, end) {
        Some(b) if b > indent => b,
        _ => {
            // no body: the next block starts at the next non-blank line
            return Some(BlockStart {
                start: i,
                stop: j,
                kind,
                arg,
                body_indent: None,
            });
        }
    };
    while j < end && lines.indent(j).is_none_or(|d| d >= body_indent) {
        j += 1;
    }
    Some(BlockStart {
        start: i,
        stop: j,
        kind,
        arg,
        body_indent: Some(body_indent),
    })
}

/// All sibling directives in `range`, in order.
pub fn generate_blocks(lines: &Lines, range: Range<usize>, directives: &[BlockKind]) -> Vec<BlockStart> {
    let mut blocks = Vec::new();
    let mut i = range.start;
    while i < range.end {
        match block_start(lines, i, range.end, directives) {
            Some(block) => {
                i = block.stop.max(i + 1);
                blocks.push(block);
            }
            None => i += 1,
        }
    }
    blocks
}

/// Split `range` into metadata lines and text de-indented by `indent`.
pub fn extract_metadata(lines: &Lines, range: Range<usize>, indent: usize) -> (Vec<String>, Vec<String>) {
    let mut metadata = Vec::new();
    let mut text = Vec::new();
    for i in range {
        if is_metadata(lines.text(i)) {
            metadata.push(lines.text(i).to_string());
        } else {
            text.push(strip_columns(lines.raw(i), indent).to_string());
        }
    }
    (metadata, text)
}

/// Split raw lines into `* ` bullet items.
///
/// The first bullet line fixes the item prefix (its raw text up to and
/// including the bullet); each later line with that prefix opens a new item.
pub fn split_items(lines: &[String]) -> Vec<Vec<String>> {
    let Some((first, pos)) = lines
        .iter()
        .enumerate()
        .find_map(|(i, l)| bullet_position(l).map(|pos| (i, pos)))
    else {
        return Vec::new();
    };
    let prefix = &lines[first][..pos + BULLET.len()];
    let mut items: Vec<Vec<String>> = Vec::new();
    for line in &lines[first..] {
        match line.strip_prefix(prefix) {
            Some(rest) => items.push(vec![rest.to_string()]),
            None => {
                if let Some(item) = items.last_mut() {
                    item.push(line.clone());
                }
            }
        }
    }
    items
}

fn bullet_position(line: &str) -> Option<usize> {
    let indent = line.len() - line.trim_start().len();
    line[indent..].starts_with(BULLET).then_some(indent)
}

// ---------------------------------------------------------------------------
// Node construction
// ---------------------------------------------------------------------------

pub(crate) struct BlockParser<'a> {
    pub lines: &'a Lines,
    pub tree: &'a mut Tree,
    pub file_id: usize,
    pub directives: &'a [BlockKind],
}

impl BlockParser<'_> {
    pub fn build_section(&mut self, section: &SectionInterval) -> Result<NodeId, ParseError> {
        let heading = section.heading.unwrap_or(section.start);
        let mut node = Node::new(
            NodeKind::Section {
                title: section.title.clone(),
                level: section.level,
            },
            self.file_id,
            self.lines.span(heading..section.stop),
        );
        self.parse_content(&mut node, section.start..section.stop)?;

        for line in &node.metadata {
            let mut tokens = line.split_whitespace();
            match tokens.next() {
                Some(":ID:") => node.id = tokens.next().map(str::to_string),
                Some(":defines:") => node.concept = tokens.next().map(str::to_string),
                _ => {}
            }
        }

        for i in section.start..section.stop {
            if self.lines.text(i).starts_with(GLOSSARY_PREFIX) {
                let entries = self.glossary(i, section.stop)?;
                node.glossary.extend(entries);
            }
        }

        for sub in &section.children {
            let child = self.build_section(sub)?;
            node.children.push(child);
        }
        debug!(title = %section.title, level = section.level, "parsed section");
        Ok(self.tree.push(node))
    }

    /// Fill a node's text, metadata and child blocks from `range`.
    fn parse_content(&mut self, node: &mut Node, range: Range<usize>) -> Result<(), ParseError> {
        let mut cursor = range.start;
        for block in generate_blocks(self.lines, range.clone(), self.directives) {
            // `:answer: 42` without an indented body is an inline tag
            if block.body_indent.is_none() && block.kind != BlockKind::Select {
                continue;
            }
            self.absorb_text(node, cursor..block.start);
            let child = self.build_block(&block)?;
            node.children.push(child);
            cursor = block.stop;
        }
        self.absorb_text(node, cursor..range.end);
        Ok(())
    }

    fn absorb_text(&self, node: &mut Node, range: Range<usize>) {
        if !self.lines.has_content(range.clone()) {
            return;
        }
        let (metadata, text) = extract_metadata(self.lines, range, node.indent);
        node.metadata.extend(metadata);
        node.text.extend(text);
    }

    fn build_block(&mut self, block: &BlockStart) -> Result<NodeId, ParseError> {
        let span = self.lines.span(block.start..block.stop);
        let body = block.start + 1..block.stop;
        if block.kind == BlockKind::Select {
            return self.build_select(block, span);
        }
        let mut node = Node::new(NodeKind::Block(block.kind), self.file_id, span);
        node.id = block.arg.clone();
        if let Some(indent) = block.body_indent {
            node.indent = indent;
            self.parse_content(&mut node, body)?;
        }
        Ok(self.tree.push(node))
    }

    fn build_select(&mut self, block: &BlockStart, span: Range<usize>) -> Result<NodeId, ParseError> {
        let source = block.arg.clone().unwrap_or_default();
        let mut node = Node::new(
            NodeKind::Select {
                source,
                resolved: false,
            },
            self.file_id,
            span.clone(),
        );
        let directive_indent = self.lines.indent(block.start).unwrap_or(0);
        node.indent = block.body_indent.unwrap_or(directive_indent);
        // kept verbatim so an unresolved select renders as written
        node.text = (block.start..block.stop)
            .map(|i| strip_columns(self.lines.raw(i), directive_indent).to_string())
            .collect();

        let body: Vec<String> = (block.start + 1..block.stop)
            .map(|i| strip_columns(self.lines.raw(i), node.indent).to_string())
            .collect();
        for item in split_items(&body) {
            let (target, params) = reference::parse_item(&item).map_err(|e| {
                ParseError::error(e.to_string(), span.clone(), self.file_id)
            })?;
            let params = params
                .into_iter()
                .map(|(k, v)| (k, Param::Text(v)))
                .collect::<BTreeMap<_, _>>();
            let mut item_node = Node::new(NodeKind::Reference { target }, self.file_id, span.clone());
            item_node.text = item;
            item_node.binding = Some(Binding::new(params));
            let id = self.tree.push(item_node);
            node.children.push(id);
        }
        Ok(self.tree.push(node))
    }

    /// Parse a `.. glossary::` region starting at line `at`.
    fn glossary(&mut self, at: usize, end: usize) -> Result<Vec<NodeId>, ParseError> {
        let directive_indent = self.lines.indent(at).unwrap_or(0);
        let mut term_indent = None;
        let mut def_indent: Option<usize> = None;
        let mut entries: Vec<(String, usize, Vec<String>)> = Vec::new();

        let mut i = at + 1;
        while i < end {
            let Some(indent) = self.lines.indent(i) else {
                if let Some((_, _, def)) = entries.last_mut() {
                    def.push(String::new());
                }
                i += 1;
                continue;
            };
            let terms = *term_indent.get_or_insert(indent);
            if indent <= directive_indent || indent < terms {
                break;
            }
            if indent == terms {
                entries.push((self.lines.text(i).to_string(), i, Vec::new()));
                def_indent = None;
            } else if let Some((_, _, def)) = entries.last_mut() {
                let cut = *def_indent.get_or_insert(indent);
                def.push(strip_columns(self.lines.raw(i), cut).to_string());
            }
            i += 1;
        }

        if entries.is_empty() {
            return Err(ParseError::error(
                "glossary has no indented entries",
                self.lines.span(at..at + 1),
                self.file_id,
            ));
        }

        let mut ids = Vec::new();
        for (term, line, mut def) in entries {
            while def.last().is_some_and(|l| l.trim().is_empty()) {
                def.pop();
            }
            let mut node = Node::new(
                NodeKind::Glossary { term },
                self.file_id,
                self.lines.span(line..line + 1 + def.len()),
            );
            node.text = def;
            ids.push(self.tree.push(node));
        }
        Ok(ids)
    }
}
