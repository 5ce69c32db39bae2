mod test_runner;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::rc::Rc;

use clap::{ArgAction, Parser, Subcommand};
use codespan_reporting::diagnostic::{Diagnostic, Label, Severity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing::info;
use tracing_subscriber::EnvFilter;

use resolver::config::CONFIG_FILE;
use resolver::export;
use resolver::{Config, Renderer, ResolveError, Resolver, SourceFile, Warning};

const SUBCOMMANDS: &[&str] = &["render", "quiz", "json", "restyle", "check", "test", "help"];

#[derive(Parser)]
#[command(name = "rtext", version, about = "Structured-text selection and rendering")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Config file (default: ./rtext.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v for info, -vv for debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve selects and render the document as text
    Render(OutputArgs),

    /// Write quiz rows (CSV) for the selected questions, plus the slides text
    Quiz(OutputArgs),

    /// Export JSON records of the resolved document
    Json(OutputArgs),

    /// Render every node through the template for its kind
    Restyle(RestyleArgs),

    /// Parse only and report diagnostics
    Check(CheckArgs),

    /// Run .test.rst spec files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Structured-text source file
    file: PathBuf,

    /// Output file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
struct RestyleArgs {
    /// Structured-text source file
    file: PathBuf,

    /// Formats document holding the `:format:` templates
    #[arg(short, long)]
    formats: Option<PathBuf>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Structured-text source file
    file: PathBuf,

    /// Dump the parsed tree
    #[arg(long)]
    ast: bool,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.rst file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    // `rtext file.rst` works like `rtext render file.rst`.
    let mut args: Vec<String> = std::env::args().collect();
    if let Some(pos) = args
        .iter()
        .skip(1)
        .position(|a| !a.starts_with('-'))
        .map(|p| p + 1)
    {
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "render".to_string());
        }
    }

    let cli = Cli::parse_from(&args);
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
    let config = match Config::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };

    let color_choice = if cli.no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    };

    match cli.command {
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category, &config);
            process::exit(exit_code);
        }
        Command::Check(check_args) => do_check(check_args, color_choice),
        command => {
            let mut resolver = Resolver::new(config);
            let result = match command {
                Command::Render(a) => do_render(&mut resolver, &a),
                Command::Quiz(a) => do_quiz(&mut resolver, &a),
                Command::Json(a) => do_json(&mut resolver, &a),
                Command::Restyle(a) => do_restyle(&mut resolver, &a),
                Command::Check(_) | Command::Test(_) => Ok(()),
            };
            let reporter = Reporter::new(color_choice, resolver.files());
            reporter.warnings(resolver.warnings());
            if let Err(error) = result {
                reporter.error(&error);
                process::exit(1);
            }
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn do_render(resolver: &mut Resolver, args: &OutputArgs) -> Result<(), ResolveError> {
    let doc = resolver.process_select(&args.file)?;
    let text = Renderer::default().render(&doc.tree, &doc.roots)?;
    write_output(args.output.as_deref(), &text)
}

fn do_quiz(resolver: &mut Resolver, args: &OutputArgs) -> Result<(), ResolveError> {
    let doc = resolver.process_select(&args.file)?;
    let renderer = Renderer::default();
    let questions = export::selected_questions(&doc.tree, &doc.roots);
    let records = export::question_records(&doc.tree, &questions, &renderer)?;

    let csv_path = args
        .output
        .clone()
        .unwrap_or_else(|| sibling(&args.file, "", "csv"));
    info!(path = %csv_path.display(), "writing");
    let mut rows = Vec::new();
    export::write_rows(&records, &mut rows).map_err(|e| ResolveError::io(&csv_path, e))?;
    std::fs::write(&csv_path, rows).map_err(|e| ResolveError::io(&csv_path, e))?;

    let slides = sibling(&args.file, "_slides", "rst");
    info!(path = %slides.display(), "writing");
    let text = renderer.render(&doc.tree, &doc.roots)?;
    write_output(Some(&slides), &text)
}

fn do_json(resolver: &mut Resolver, args: &OutputArgs) -> Result<(), ResolveError> {
    let doc = resolver.process_select(&args.file)?;
    let records = export::records(&doc.tree, &doc.roots, &Renderer::default())?;
    let path = args
        .output
        .clone()
        .unwrap_or_else(|| sibling(&args.file, "", "json"));
    info!(path = %path.display(), "writing");
    let text = serde_json::to_string(&records)?;
    write_output(Some(&path), &text)
}

fn do_restyle(resolver: &mut Resolver, args: &RestyleArgs) -> Result<(), ResolveError> {
    let Some(formats_path) = args
        .formats
        .clone()
        .or_else(|| resolver.config().formats.clone())
    else {
        eprintln!("error: restyle needs a formats document (--formats, or `formats` in {CONFIG_FILE})");
        process::exit(1);
    };
    let formats = resolver.read_formats(&formats_path)?;
    let mut doc = resolver.parse_file(&args.file)?;
    let text = Renderer::default().restyle(&mut doc.tree, &doc.roots, Rc::new(formats))?;
    write_output(args.output.as_deref(), &text)
}

fn do_check(args: CheckArgs, color_choice: ColorChoice) {
    let source = match std::fs::read_to_string(&args.file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read '{}': {}", args.file.display(), e);
            process::exit(1);
        }
    };
    let file = SourceFile {
        path: args.file.clone(),
        text: source.clone(),
    };
    let reporter = Reporter::new(color_choice, std::slice::from_ref(&file));

    match rtext::Parser::new(source, 0).parse() {
        Ok(doc) if args.ast => println!("{:#?}", doc),
        Ok(_) => eprintln!("ok: {} parsed successfully", args.file.display()),
        Err(errors) => {
            for error in &errors {
                reporter.emit(&error.to_diagnostic());
            }
            process::exit(1);
        }
    }
}

/// `dir/stem<tag>.<ext>` next to `file`.
fn sibling(file: &Path, tag: &str, ext: &str) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    file.with_file_name(format!("{stem}{tag}.{ext}"))
}

fn write_output(path: Option<&Path>, text: &str) -> Result<(), ResolveError> {
    match path {
        Some(path) => std::fs::write(path, text).map_err(|e| ResolveError::io(path, e)),
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{text}").map_err(|e| ResolveError::io("<stdout>", e))
        }
    }
}

/// Renders errors and warnings against the source files they came from.
struct Reporter {
    writer: StandardStream,
    config: term::Config,
    files: SimpleFiles<String, String>,
}

impl Reporter {
    fn new(color_choice: ColorChoice, sources: &[SourceFile]) -> Self {
        let mut files = SimpleFiles::new();
        for source in sources {
            files.add(source.path.display().to_string(), source.text.clone());
        }
        Reporter {
            writer: StandardStream::stderr(color_choice),
            config: term::Config::default(),
            files,
        }
    }

    fn emit(&self, diagnostic: &Diagnostic<usize>) {
        let _ = term::emit_to_write_style(&mut self.writer.lock(), &self.config, &self.files, diagnostic);
    }

    fn error(&self, error: &ResolveError) {
        let parse_errors = error.parse_errors();
        if parse_errors.is_empty() {
            eprintln!("error: {error}");
            return;
        }
        for parse_error in parse_errors {
            self.emit(&parse_error.to_diagnostic());
        }
    }

    fn warnings(&self, warnings: &[Warning]) {
        for warning in warnings {
            match &warning.span {
                Some(span) => self.emit(
                    &Diagnostic::new(Severity::Warning)
                        .with_message(&warning.message)
                        .with_labels(vec![Label::primary(warning.source_id, span.clone())]),
                ),
                None => eprintln!("warning: {}", warning.message),
            }
        }
    }
}
