use std::collections::BTreeMap;
use std::fmt;

/// A selection target written after the bullet of a select item.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A single identifier: `my-block`
    Id(String),
    /// A list of identifiers: `[a,b,c]`
    List(Vec<String>),
    /// Named groups: `(key=[a,b],other=c)`
    Dict(Vec<(String, Group)>),
}

/// The value side of one dict entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Group {
    Id(String),
    List(Vec<String>),
}

impl Group {
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Group::Id(id) => vec![id],
            Group::List(ids) => ids.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceError {
    pub target: String,
    pub message: String,
}

impl ReferenceError {
    fn new(target: &str, message: impl Into<String>) -> Self {
        ReferenceError {
            target: target.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in '{}'", self.message, self.target)
    }
}

impl std::error::Error for ReferenceError {}

impl Target {
    pub fn parse(s: &str) -> Result<Target, ReferenceError> {
        let s = s.trim();
        if s.starts_with('[') {
            let (ids, _) = parse_list(s, s)?;
            Ok(Target::List(ids))
        } else if let Some(rest) = s.strip_prefix('(') {
            let close = rest
                .find(')')
                .ok_or_else(|| ReferenceError::new(s, "missing ')'"))?;
            parse_dict(&rest[..close], s).map(Target::Dict)
        } else if s.is_empty() {
            Err(ReferenceError::new(s, "empty target"))
        } else {
            Ok(Target::Id(s.to_string()))
        }
    }
}

/// Parse `[a,b]` at the start of `s`, returning the ids and the remaining text.
fn parse_list<'a>(s: &'a str, whole: &str) -> Result<(Vec<String>, &'a str), ReferenceError> {
    let inner = &s[1..];
    let close = inner
        .find(']')
        .ok_or_else(|| ReferenceError::new(whole, "missing ']'"))?;
    let ids = inner[..close]
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    Ok((ids, &inner[close + 1..]))
}

fn parse_dict(mut s: &str, whole: &str) -> Result<Vec<(String, Group)>, ReferenceError> {
    let mut groups = Vec::new();
    while !s.trim().is_empty() {
        let (key, rest) = s
            .split_once('=')
            .ok_or_else(|| ReferenceError::new(whole, "missing '=' after key"))?;
        let rest = rest.trim_start();
        let (group, rest) = if rest.starts_with('[') {
            let (ids, rest) = parse_list(rest, whole)?;
            (Group::List(ids), rest)
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            (Group::Id(rest[..end].trim().to_string()), &rest[end..])
        };
        groups.push((key.trim().to_string(), group));
        let rest = rest.trim_start();
        s = if rest.is_empty() {
            rest
        } else {
            rest.strip_prefix(',')
                .ok_or_else(|| ReferenceError::new(whole, "missing comma between entries"))?
        };
    }
    Ok(groups)
}

/// Split a select item into its target and parameters.
///
/// The first line holds the target followed by `key=value` tokens; further
/// lines may add `:key: value` parameters.
pub fn parse_item(lines: &[String]) -> Result<(String, BTreeMap<String, String>), ReferenceError> {
    let first = lines.first().map(String::as_str).unwrap_or("");
    let mut tokens = first.split_whitespace();
    let target = tokens
        .next()
        .ok_or_else(|| ReferenceError::new(first, "empty select item"))?
        .to_string();
    let mut params = BTreeMap::new();
    for token in tokens {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| ReferenceError::new(first, format!("bad select parameter '{token}'")))?;
        params.insert(key.to_string(), value.to_string());
    }
    for line in lines.iter().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let param = line
            .strip_prefix(':')
            .and_then(|rest| rest.split_once(':'))
            .ok_or_else(|| ReferenceError::new(line, "bad select parameter line"))?;
        params.insert(param.0.to_string(), param.1.trim().to_string());
    }
    Ok((target, params))
}
