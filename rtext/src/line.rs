use std::ops::Range;

/// Characters that may form a section decoration line.
pub const SECTION_CHARS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Decoration lines shorter than this are ordinary text.
pub const MIN_MARK_LEN: usize = 4;

/// A recognized section heading at some line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub title: String,
    /// Number of lines the heading occupies (2 for title + underline, 3 with an overline).
    pub consumed: usize,
    pub mark: String,
}

/// Input lines kept in raw and stripped form, with byte offsets for diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Lines {
    raw: Vec<String>,
    text: Vec<String>,
    starts: Vec<usize>,
    source_len: usize,
}

impl Lines {
    pub fn new(source: &str) -> Self {
        let mut raw = Vec::new();
        let mut starts = Vec::new();
        let mut offset = 0;
        for piece in source.split('\n') {
            starts.push(offset);
            offset += piece.len() + 1;
            raw.push(piece.strip_suffix('\r').unwrap_or(piece).to_string());
        }
        // A trailing newline does not open another line.
        if source.ends_with('\n') {
            raw.pop();
            starts.pop();
        }
        let text = raw.iter().map(|l| l.trim().to_string()).collect();
        Lines {
            raw,
            text,
            starts,
            source_len: source.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn raw(&self, i: usize) -> &str {
        &self.raw[i]
    }

    pub fn text(&self, i: usize) -> &str {
        &self.text[i]
    }

    pub fn is_blank(&self, i: usize) -> bool {
        self.text[i].is_empty()
    }

    /// Column of the first non-blank character, or `None` for a blank line.
    pub fn indent(&self, i: usize) -> Option<usize> {
        if self.is_blank(i) {
            None
        } else {
            Some(leading_whitespace(&self.raw[i]))
        }
    }

    /// Indent of line `i`, treating lines at or past `end` as absent.
    pub fn indent_in(&self, i: usize, end: usize) -> Option<usize> {
        if i < end { self.indent(i) } else { None }
    }

    /// True when some line of `range` has content.
    pub fn has_content(&self, range: Range<usize>) -> bool {
        range.into_iter().any(|i| !self.is_blank(i))
    }

    /// Byte span of a line range, for diagnostics.
    pub fn span(&self, range: Range<usize>) -> Range<usize> {
        let start = self
            .starts
            .get(range.start)
            .copied()
            .unwrap_or(self.source_len);
        let end = if range.end > range.start {
            let last = range.end - 1;
            self.starts
                .get(last)
                .map(|s| s + self.raw[last].len())
                .unwrap_or(self.source_len)
        } else {
            start
        };
        start..end.max(start)
    }

    /// Returns the decoration string when line `i` is a section mark.
    pub fn section_mark(&self, i: usize) -> Option<&str> {
        let text = self.text.get(i)?;
        let first = text.chars().next()?;
        if text.chars().count() < MIN_MARK_LEN
            || !SECTION_CHARS.contains(first)
            || !self.raw[i].starts_with(first)
            || text.chars().any(|c| c != first)
        {
            return None;
        }
        Some(text)
    }

    /// Title framed by an overline and an identical underline.
    pub fn section_overline(&self, i: usize) -> Option<Heading> {
        let mark = self.section_mark(i)?;
        if i + 2 >= self.len() {
            return None;
        }
        let over = self.raw[i].trim_end();
        let title = self.raw[i + 1].trim_end();
        if over.chars().count() < title.chars().count() || over != self.raw[i + 2].trim_end() {
            return None;
        }
        Some(Heading {
            title: self.text[i + 1].clone(),
            consumed: 3,
            mark: mark.to_string(),
        })
    }

    /// Unindented title followed by a long enough underline.
    pub fn section_title(&self, i: usize) -> Option<Heading> {
        if i + 1 >= self.len() || self.is_blank(i) || self.indent(i) != Some(0) {
            return None;
        }
        let mark = self.section_mark(i + 1)?;
        if mark.chars().count() < self.text[i].chars().count() {
            return None;
        }
        Some(Heading {
            title: self.text[i].clone(),
            consumed: 2,
            mark: mark.to_string(),
        })
    }

    pub fn section_start(&self, i: usize) -> Option<Heading> {
        self.section_overline(i).or_else(|| self.section_title(i))
    }
}

/// Number of leading whitespace characters.
pub fn leading_whitespace(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

/// Drop up to `columns` leading whitespace characters.
pub fn strip_columns(line: &str, columns: usize) -> &str {
    let mut rest = line;
    for _ in 0..columns {
        let mut chars = rest.chars();
        match chars.next() {
            Some(c) if c.is_whitespace() => rest = chars.as_str(),
            _ => break,
        }
    }
    rest
}
