use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::expand_path;

/// Prefix naming the injected document store as a select source.
pub const STORE_PREFIX: &str = "store:";

/// Where a select directive's content comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// `http:`/`https:` URL, downloaded before use.
    Remote(String),
    /// `store:<collection>` in the document store.
    Store(String),
    Local(LocalSource),
}

/// A select source on the local filesystem.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalSource {
    /// An existing file that is not structured text; its pages are selected.
    Pages(PathBuf),
    /// A structured-text file or a directory of them.
    Text(PathBuf),
}

/// Classify a select source written in the file at `relative_to`.
pub fn classify(source: &str, relative_to: Option<&Path>, suffix: &str) -> Source {
    if source.starts_with("http:") || source.starts_with("https:") {
        return Source::Remote(source.to_string());
    }
    if let Some(key) = source.strip_prefix(STORE_PREFIX) {
        return Source::Store(key.to_string());
    }
    Source::Local(classify_local(resolve_path(source, relative_to), suffix))
}

/// Classify a local path, such as a downloaded file.
pub fn classify_local(path: PathBuf, suffix: &str) -> LocalSource {
    if path.is_file() && !has_suffix(&path, suffix) {
        LocalSource::Pages(path)
    } else {
        LocalSource::Text(path)
    }
}

/// Expand `~` and variables, then join onto the selecting file's directory.
pub fn resolve_path(source: &str, relative_to: Option<&Path>) -> PathBuf {
    let raw = PathBuf::from(source);
    let expanded = expand_path(&raw).unwrap_or(raw);
    match relative_to.and_then(Path::parent) {
        Some(dir) => dir.join(expanded),
        None => expanded,
    }
}

/// Case-insensitive extension check.
pub fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(suffix))
}

/// Structured-text files under `dir`, sorted, skipping marked directories.
pub fn find_source_files(
    dir: &Path,
    suffix: &str,
    ignore_marker: &str,
) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_source_files(dir, suffix, ignore_marker, &mut files)?;
    Ok(files)
}

fn collect_source_files(
    dir: &Path,
    suffix: &str,
    ignore_marker: &str,
    out: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    if dir.join(ignore_marker).exists() {
        warn!(dir = %dir.display(), "skipping ignored directory");
        return Ok(());
    }
    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    entries.sort();

    for path in entries {
        if path.is_dir() {
            collect_source_files(&path, suffix, ignore_marker, out)?;
        } else if has_suffix(&path, suffix) {
            out.push(path);
        }
    }
    Ok(())
}
