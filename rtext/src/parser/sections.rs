use crate::line::Lines;
use crate::parser::error::ParseError;

/// A section's line range within a document, with nested subsections.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionInterval {
    /// First body line (after the heading).
    pub start: usize,
    pub stop: usize,
    pub title: String,
    pub level: usize,
    /// First line of the heading, if the section has one.
    pub heading: Option<usize>,
    pub children: Vec<SectionInterval>,
}

/// Scan `lines` into a flat list of section intervals.
///
/// Levels index the list of distinct marks in the order they are first seen.
/// Untitled intervals are kept only if they contain text.
pub fn generate_sections(lines: &Lines) -> Vec<SectionInterval> {
    let mut marks: Vec<String> = Vec::new();
    let mut sections = Vec::new();
    let mut open = SectionInterval {
        start: 0,
        stop: 0,
        title: String::new(),
        level: 0,
        heading: None,
        children: Vec::new(),
    };

    let mut i = 0;
    while i < lines.len() {
        let Some(heading) = lines.section_start(i) else {
            i += 1;
            continue;
        };
        open.stop = i;
        if !open.title.is_empty() || lines.has_content(open.start..open.stop) {
            sections.push(open);
        }
        let level = match marks.iter().position(|m| *m == heading.mark) {
            Some(level) => level,
            None => {
                marks.push(heading.mark);
                marks.len() - 1
            }
        };
        open = SectionInterval {
            start: i + heading.consumed,
            stop: 0,
            title: heading.title,
            level,
            heading: Some(i),
            children: Vec::new(),
        };
        i += heading.consumed;
    }

    open.stop = lines.len();
    if !open.title.is_empty() || lines.has_content(open.start..open.stop) {
        sections.push(open);
    }
    sections
}

/// Nest the flat interval list by level.
pub fn section_forest(
    lines: &Lines,
    file_id: usize,
) -> Result<Vec<SectionInterval>, ParseError> {
    // stack[d] holds the open siblings at depth d
    let mut stack: Vec<Vec<SectionInterval>> = vec![Vec::new()];
    for section in generate_sections(lines) {
        let level = section.level;
        if level > stack.len() {
            let heading = section.heading.unwrap_or(section.start);
            return Err(ParseError::error(
                format!(
                    "section '{}' skips a heading level ({} levels open, found level {})",
                    section.title,
                    stack.len(),
                    level
                ),
                lines.span(heading..section.start),
                file_id,
            )
            .with_note("use the decoration of the enclosing level or one level deeper"));
        }
        if level == stack.len() {
            stack.push(vec![section]);
            continue;
        }
        while stack.len() > level + 1 {
            fold(&mut stack);
        }
        if let Some(top) = stack.last_mut() {
            top.push(section);
        }
    }
    while stack.len() > 1 {
        fold(&mut stack);
    }
    Ok(stack.pop().unwrap_or_default())
}

fn fold(stack: &mut Vec<Vec<SectionInterval>>) {
    let Some(subsections) = stack.pop() else {
        return;
    };
    match stack.last_mut() {
        Some(parent_level) => match parent_level.last_mut() {
            Some(parent) => parent.children.extend(subsections),
            None => parent_level.extend(subsections),
        },
        None => stack.push(subsections),
    }
}
