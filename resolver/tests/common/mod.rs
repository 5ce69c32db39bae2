#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use resolver::cache::{ArtifactCache, Convert, Fetch, FetchError};
use resolver::{Config, ResolveError, Resolver};
use tempfile::TempDir;

pub const BANK: &str = "\
Forces
======
:defines: force

Force is mass times acceleration.

:question: q1
   What is F for m=2, a=3?

   :answer:
      6

:question: q2
   Is force a vector?

   :answer:
      Yes

:question: q3
   :title: Colors
   Pick a primary colour

   :multichoice:
      * green
      * red :correct:

   :error:
      green is mixed

:format: slide
   Q: {{ this.text }} [{{ tag }}] ({{ this.answer[0] }})

:format: pair
   {% for s in sources %}{{ s.id }};{% endfor %}

:format: duel
   {{ pro[0].id }} vs {{ con.id }}
";

pub fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, text).unwrap();
    path
}

/// A temp dir holding `bank.rst` and `lecture.rst` selecting from it.
pub fn fixture(lecture: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "bank.rst", BANK);
    let path = write(dir.path(), "lecture.rst", lecture);
    (dir, path)
}

pub fn resolver_in(dir: &Path) -> Resolver {
    let config = Config {
        download_dir: dir.join("_downloaded"),
        converted_dir: dir.join("_converted_pdf"),
        ..Config::default()
    };
    Resolver::new(config)
}

pub fn render_file(resolver: &mut Resolver, path: &Path) -> String {
    let doc = resolver.process_select(path).unwrap();
    resolver::Renderer::default()
        .render(&doc.tree, &doc.roots)
        .unwrap()
}

/// Fetcher serving a fixed body and counting requests.
pub struct FakeFetcher {
    pub body: Result<String, String>,
    pub calls: Rc<Cell<usize>>,
}

impl Fetch for FakeFetcher {
    fn fetch(&self, _url: &str, dest: &mut dyn Write) -> Result<(), FetchError> {
        self.calls.set(self.calls.get() + 1);
        match &self.body {
            Ok(body) => {
                dest.write_all(body.as_bytes())?;
                Ok(())
            }
            Err(message) => {
                dest.write_all(b"partial")?;
                Err(message.clone().into())
            }
        }
    }
}

/// Converter writing `<stem>.pdf` (or failing after a partial write).
pub struct FakeConverter {
    pub fail: bool,
    pub produce: bool,
    pub calls: Rc<Cell<usize>>,
}

impl Convert for FakeConverter {
    fn convert(&self, input: &Path, out_dir: &Path) -> Result<(), String> {
        self.calls.set(self.calls.get() + 1);
        let stem = input.file_stem().unwrap().to_string_lossy().into_owned();
        if self.produce || self.fail {
            std::fs::write(out_dir.join(format!("{stem}.pdf")), "%PDF").map_err(|e| e.to_string())?;
        }
        if self.fail {
            return Err("converter crashed".to_string());
        }
        Ok(())
    }
}

/// Cache that records conversions without touching the disk.
#[derive(Default)]
pub struct RecordingCache {
    pub converted: Rc<RefCell<Vec<PathBuf>>>,
}

impl ArtifactCache for RecordingCache {
    fn download(&mut self, url: &str) -> Result<PathBuf, ResolveError> {
        Err(ResolveError::Download {
            url: url.to_string(),
            source: "offline".into(),
        })
    }

    fn convert(&mut self, input: &Path) -> Result<PathBuf, ResolveError> {
        self.converted.borrow_mut().push(input.to_path_buf());
        Ok(input.with_extension("pdf"))
    }
}
