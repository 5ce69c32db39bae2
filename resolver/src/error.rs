use std::ops::Range;
use std::path::PathBuf;

use rtext::ParseError;
use rtext::reference::ReferenceError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("parse errors in '{}': {}", path.display(), join_messages(errors))]
    Parse {
        path: PathBuf,
        errors: Vec<ParseError>,
    },

    #[error("{0}")]
    Malformed(#[from] ParseError),

    #[error("malformed reference: {0}")]
    Reference(#[from] ReferenceError),

    #[error("identifier '{id}' not found in {origin}")]
    UnknownId { id: String, origin: String },

    #[error("template '{0}' is not defined")]
    MissingTemplate(String),

    #[error("template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("cannot read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("download of {url} failed: {source}")]
    Download {
        url: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("conversion of '{}' failed: {message}", path.display())]
    Conversion { path: PathBuf, message: String },

    #[error("select from '{0}' needs a document store, but none is configured")]
    NoStore(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ResolveError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ResolveError::Io {
            path: path.into(),
            source,
        }
    }

    /// Parse errors carried by this error, for diagnostic rendering.
    pub fn parse_errors(&self) -> &[ParseError] {
        match self {
            ResolveError::Parse { errors, .. } => errors,
            ResolveError::Malformed(error) => std::slice::from_ref(error),
            _ => &[],
        }
    }
}

fn join_messages(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A non-fatal condition found while resolving, such as a select cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub message: String,
    pub span: Option<Range<usize>>,
    pub source_id: usize,
}

impl Warning {
    pub fn new(message: impl Into<String>, span: Range<usize>, source_id: usize) -> Self {
        Warning {
            message: message.into(),
            span: Some(span),
            source_id,
        }
    }
}
