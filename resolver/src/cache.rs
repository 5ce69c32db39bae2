use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::ResolveError;

pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Retrieves the body of a URL.
pub trait Fetch {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<(), FetchError>;
}

/// Converts a document into a PDF inside `out_dir`.
pub trait Convert {
    fn convert(&self, input: &Path, out_dir: &Path) -> Result<(), String>;
}

/// Local copies of remote and converted sources.
pub trait ArtifactCache {
    /// Path of the downloaded copy of `url`.
    fn download(&mut self, url: &str) -> Result<PathBuf, ResolveError>;
    /// Path of the PDF converted from `input`.
    fn convert(&mut self, input: &Path) -> Result<PathBuf, ResolveError>;
}

/// HTTP GET through a blocking reqwest client.
#[derive(Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<(), FetchError> {
        let mut response = self.client.get(url).send()?.error_for_status()?;
        response.copy_to(dest)?;
        Ok(())
    }
}

/// Runs an external converter: `<command...> -o <out_dir> <input>`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    command: Vec<String>,
}

impl CommandConverter {
    pub fn new(command: Vec<String>) -> Self {
        CommandConverter { command }
    }
}

impl Convert for CommandConverter {
    fn convert(&self, input: &Path, out_dir: &Path) -> Result<(), String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| "no conversion command configured".to_string())?;
        info!(program = %program, input = %input.display(), "converting to PDF");
        let status = Command::new(program)
            .args(args)
            .arg("-o")
            .arg(out_dir)
            .arg(input)
            .status()
            .map_err(|e| format!("unable to run {program}: {e}"))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{program} exited with {status}"))
        }
    }
}

/// On-disk cache: downloads keyed by URL basename, conversions keyed by
/// source stem and fresh while newer than their source.
pub struct DiskCache {
    download_dir: PathBuf,
    converted_dir: PathBuf,
    fetcher: Box<dyn Fetch>,
    converter: Box<dyn Convert>,
}

impl DiskCache {
    pub fn new(
        download_dir: PathBuf,
        converted_dir: PathBuf,
        fetcher: Box<dyn Fetch>,
        converter: Box<dyn Convert>,
    ) -> Self {
        DiskCache {
            download_dir,
            converted_dir,
            fetcher,
            converter,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        DiskCache::new(
            config.download_dir.clone(),
            config.converted_dir.clone(),
            Box::new(HttpFetcher::default()),
            Box::new(CommandConverter::new(config.convert_command.clone())),
        )
    }

    pub fn download_path(&self, url: &str) -> PathBuf {
        let name = url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .unwrap_or("index");
        self.download_dir.join(name)
    }

    pub fn converted_path(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.converted_dir.join(format!("{stem}.pdf"))
    }
}

impl ArtifactCache for DiskCache {
    fn download(&mut self, url: &str) -> Result<PathBuf, ResolveError> {
        let path = self.download_path(url);
        if path.is_file() {
            debug!(url, path = %path.display(), "already downloaded");
            return Ok(path);
        }
        std::fs::create_dir_all(&self.download_dir)
            .map_err(|e| ResolveError::io(&self.download_dir, e))?;
        info!(url, "downloading");
        let mut file = File::create(&path).map_err(|e| ResolveError::io(&path, e))?;
        let result = self.fetcher.fetch(url, &mut file);
        drop(file);
        if let Err(source) = result {
            // never leave a partial download behind
            let _ = std::fs::remove_file(&path);
            return Err(ResolveError::Download {
                url: url.to_string(),
                source,
            });
        }
        Ok(path)
    }

    fn convert(&mut self, input: &Path) -> Result<PathBuf, ResolveError> {
        let pdf = self.converted_path(input);
        if is_fresh(&pdf, input) {
            debug!(input = %input.display(), pdf = %pdf.display(), "already converted");
            return Ok(pdf);
        }
        std::fs::create_dir_all(&self.converted_dir)
            .map_err(|e| ResolveError::io(&self.converted_dir, e))?;
        let failure = match self.converter.convert(input, &self.converted_dir) {
            Ok(()) if pdf.is_file() => return Ok(pdf),
            Ok(()) => format!("no output at '{}'", pdf.display()),
            Err(message) => message,
        };
        let _ = std::fs::remove_file(&pdf);
        Err(ResolveError::Conversion {
            path: input.to_path_buf(),
            message: failure,
        })
    }
}

/// True when `artifact` exists and is newer than `input`.
pub fn is_fresh(artifact: &Path, input: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(artifact), modified(input)) {
        (Some(a), Some(i)) => a > i,
        _ => false,
    }
}
