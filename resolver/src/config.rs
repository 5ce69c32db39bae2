use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "rtext.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {config_path}: {source}")]
    ConfigReadError {
        config_path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {config_path}: {source}")]
    ConfigParseError {
        config_path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where remote sources are downloaded, keyed by URL basename.
    pub download_dir: PathBuf,
    /// Where non-text sources are converted to PDF.
    pub converted_dir: PathBuf,
    /// Conversion program and leading arguments; `-o <dir> <input>` is appended.
    pub convert_command: Vec<String>,
    /// Extension of structured-text source files.
    pub source_suffix: String,
    /// Directories containing this file are skipped when walking a source directory.
    pub ignore_marker: String,
    /// Optional formats document used by `restyle` when none is given.
    pub formats: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            download_dir: PathBuf::from("_downloaded"),
            converted_dir: PathBuf::from("_converted_pdf"),
            convert_command: vec!["unoconv".to_string(), "-f".to_string(), "pdf".to_string()],
            source_suffix: "rst".to_string(),
            ignore_marker: ".rust_ignore".to_string(),
            formats: None,
        }
    }
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(config_path: P) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(config_path).map_err(|source| {
            ConfigError::ConfigReadError {
                config_path: config_path.to_path_buf(),
                source,
            }
        })?;

        let mut config: Config =
            toml::from_str(&content).map_err(|source| ConfigError::ConfigParseError {
                config_path: config_path.to_path_buf(),
                source,
            })?;

        // Expand shell variables and tilde in the configured directories
        config.download_dir = expand_path(&config.download_dir).unwrap_or(config.download_dir);
        config.converted_dir = expand_path(&config.converted_dir).unwrap_or(config.converted_dir);
        config.formats = config
            .formats
            .map(|path| expand_path(&path).unwrap_or(path));

        Ok(Some(config))
    }

    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(Self::load_from_path(path)?.unwrap_or_default())
    }
}

/// Expand `~` and `$VAR` in a path.
pub fn expand_path(path: &Path) -> Option<PathBuf> {
    let path_str = path.to_string_lossy();
    match shellexpand::full(&path_str) {
        Ok(expanded) => Some(PathBuf::from(expanded.as_ref())),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.download_dir, PathBuf::from("_downloaded"));
        assert_eq!(config.converted_dir, PathBuf::from("_converted_pdf"));
        assert_eq!(config.convert_command, vec!["unoconv", "-f", "pdf"]);
        assert_eq!(config.source_suffix, "rst");
        assert_eq!(config.ignore_marker, ".rust_ignore");
    }

    #[test]
    fn test_load_config_file_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nonexistent.toml");

        assert!(Config::load_from_path(&missing).unwrap().is_none());
        assert_eq!(Config::load_or_default(&missing).unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(&config_file, "download_dir = \"/tmp/rtext-cache\"\n").unwrap();

        let config = Config::load_from_path(&config_file).unwrap().unwrap();
        assert_eq!(config.download_dir, PathBuf::from("/tmp/rtext-cache"));
        assert_eq!(config.source_suffix, "rst");
    }

    #[test]
    fn test_tilde_is_expanded() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(&config_file, "converted_dir = \"~/pdfs\"\n").unwrap();

        let config = Config::load_from_path(&config_file).unwrap().unwrap();
        let expanded = config.converted_dir.to_string_lossy();
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("pdfs"));
    }

    #[test]
    fn test_invalid_config_names_the_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join(CONFIG_FILE);
        std::fs::write(&config_file, "download_dir = [1, 2]\n").unwrap();

        let err = Config::load_from_path(&config_file).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigParseError { .. }));
        assert!(err.to_string().contains(CONFIG_FILE));
    }
}
