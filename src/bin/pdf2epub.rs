//! CLI binary for pdf2epub.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionConfig` / `SyncConfig` and prints results.

use anyhow::{Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pdf2epub::pipeline::input::resolve_input;
use pdf2epub::{
    read_package, ArtifactRef, CalibrationRegistry, ConversionConfig, Converter, DocumentMetadata,
    JobError, JobId, JobProgressCallback, JobReport, JobStatus, MonotonicityPolicy,
    ProgressCallback, SyncConfig, SyncQuery,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One spinner per job, stacked in a `MultiProgress` so concurrent
/// conversions each get their own line.
struct CliProgressCallback {
    multi: MultiProgress,
    bars: Mutex<HashMap<JobId, ProgressBar>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        })
    }

    fn take_bar(&self, job: &JobId) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(job)
    }
}

impl JobProgressCallback for CliProgressCallback {
    fn on_job_submitted(&self, job: &JobId, filename: &str) {
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(style);
        bar.set_prefix(filename.to_string());
        bar.set_message("queued");
        bar.enable_steady_tick(Duration::from_millis(80));

        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(*job, bar);
        }
    }

    fn on_stage(&self, job: &JobId, status: JobStatus) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(bar) = bars.get(job) {
                bar.set_message(format!("{status}…"));
            }
        }
    }

    fn on_job_done(&self, job: &JobId, artifact: &ArtifactRef, chapters: usize) {
        if let Some(bar) = self.take_bar(job) {
            bar.finish_and_clear();
            let _ = self.multi.println(format!(
                "  {} {}  {}",
                green("✓"),
                bar.prefix(),
                dim(&format!("{chapters} chapters → {}", artifact.path.display())),
            ));
        }
    }

    fn on_job_failed(&self, job: &JobId, error: &JobError) {
        if let Some(bar) = self.take_bar(job) {
            bar.finish_and_clear();
            // Truncate very long error messages to keep output tidy.
            let msg = error.message.lines().next().unwrap_or_default();
            let msg = if msg.chars().count() > 80 {
                format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
            } else {
                msg.to_string()
            };
            let _ = self.multi.println(format!(
                "  {} {}  {}",
                red("✗"),
                bar.prefix(),
                red(&format!("{} during {}: {msg}", error.kind, error.stage)),
            ));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert a PDF; the EPUB lands in ./epub-output/{uuid}.epub
  pdf2epub convert walden.pdf --author "Henry David Thoreau"

  # Several inputs at once, local and remote
  pdf2epub convert a.pdf b.pdf https://example.com/c.pdf --output-dir books/

  # Manage artifacts
  pdf2epub list --output-dir books/
  pdf2epub delete 0f8e4c1e-6a53-4c1b-9b0e-3f3a9a1c2d4e --output-dir books/

  # Inspect a package
  pdf2epub inspect books/0f8e4c1e-6a53-4c1b-9b0e-3f3a9a1c2d4e.epub --json

  # Map between pages and narration time
  pdf2epub sync --table walden.json --page 42
  pdf2epub sync --table walden.json --time 1830.5 --json

CALIBRATION TABLE FORMAT:
  {
    "title_key": "walden",
    "total_pages": 149,
    "total_duration_secs": 5400,
    "points": [
      { "page": 1,  "timestamp": 0,   "label": "Economy" },
      { "page": 12, "timestamp": 125, "label": "Where I Lived", "note": "approx" }
    ]
  }

ENVIRONMENT VARIABLES:
  PDF2EPUB_OUTPUT_DIR       Default --output-dir
  PDF2EPUB_TEMP_DIR         Directory for per-job temp files
  PDF2EPUB_MAX_SIZE_MB      Upload size ceiling
  PDF2EPUB_MIN_CHAPTER_CHARS  Segmenter noise threshold
  RUST_LOG                  Overrides the log filter (e.g. pdf2epub=debug)
"#;

/// Convert PDFs to chapterized EPUBs and map pages to narration time.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2epub",
    version,
    about = "Convert PDFs to chapterized EPUBs and map pages to narration time",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2EPUB_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2EPUB_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one or more PDFs (paths or HTTP/HTTPS URLs) to EPUB.
    Convert(ConvertArgs),
    /// List artifacts in the output directory.
    List {
        #[command(flatten)]
        dir: OutputDirArg,
        /// Output JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Delete one artifact by id.
    Delete {
        /// Artifact id (the UUID in `{id}.epub`).
        artifact_id: String,
        #[command(flatten)]
        dir: OutputDirArg,
    },
    /// Print the metadata and chapter list of an EPUB.
    Inspect {
        epub: PathBuf,
        /// Output JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Translate a page to a narration timestamp, or back.
    Sync(SyncArgs),
}

#[derive(Args, Debug)]
struct OutputDirArg {
    /// Directory artifacts are written to and read from.
    #[arg(short, long, env = "PDF2EPUB_OUTPUT_DIR", default_value = "epub-output")]
    output_dir: PathBuf,
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Local PDF file paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    #[command(flatten)]
    dir: OutputDirArg,

    /// Directory for per-job temp files (default: system temp dir).
    #[arg(long, env = "PDF2EPUB_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Book title (default: the input's filename).
    #[arg(long)]
    title: Option<String>,

    /// Book author.
    #[arg(long, env = "PDF2EPUB_AUTHOR")]
    author: Option<String>,

    /// Book description.
    #[arg(long)]
    description: Option<String>,

    /// BCP 47 language tag.
    #[arg(long, env = "PDF2EPUB_LANGUAGE")]
    language: Option<String>,

    /// Reject uploads larger than this many MiB.
    #[arg(long, env = "PDF2EPUB_MAX_SIZE_MB", default_value_t = 50,
          value_parser = clap::value_parser!(u64).range(1..=4096))]
    max_size_mb: u64,

    /// Drop text blocks shorter than this many characters.
    #[arg(long, env = "PDF2EPUB_MIN_CHAPTER_CHARS", default_value_t = 50)]
    min_chapter_chars: usize,

    /// Number of documents converted at once.
    #[arg(short, long, env = "PDF2EPUB_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2EPUB_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print job reports as JSON.
    #[arg(long)]
    json: bool,

    /// Disable progress spinners.
    #[arg(long, env = "PDF2EPUB_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("query").required(true).args(["page", "time"])))]
struct SyncArgs {
    /// Calibration table JSON file.
    #[arg(long)]
    table: PathBuf,

    /// Page to translate to a timestamp.
    #[arg(long)]
    page: Option<u32>,

    /// Narration time in seconds to translate to a page.
    #[arg(long)]
    time: Option<f64>,

    /// Seconds per page used outside the calibrated range.
    #[arg(long, env = "PDF2EPUB_SECONDS_PER_PAGE", default_value_t = 12.0)]
    seconds_per_page: f64,

    /// Refuse tables whose timestamps decrease as pages increase.
    #[arg(long)]
    strict: bool,

    /// Output JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Spinners give the feedback that matters during conversion, so library
    // INFO logs are suppressed unless asked for.
    let spinners = matches!(&cli.command, Command::Convert(a) if !a.no_progress && !a.json);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinners {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Convert(args) => run_convert(args, cli.quiet, spinners && !cli.quiet).await,
        Command::List { dir, json } => run_list(dir, json).await,
        Command::Delete { artifact_id, dir } => run_delete(&artifact_id, dir, cli.quiet).await,
        Command::Inspect { epub, json } => run_inspect(epub, json).await,
        Command::Sync(args) => run_sync(args),
    }
}

// ── convert ──────────────────────────────────────────────────────────────

async fn run_convert(args: ConvertArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as ProgressCallback)
    } else {
        None
    };

    let mut builder = ConversionConfig::builder()
        .output_dir(args.dir.output_dir.clone())
        .max_upload_bytes(mib_to_bytes(args.max_size_mb))
        .min_chapter_chars(args.min_chapter_chars)
        .download_timeout_secs(args.download_timeout);
    if let Some(ref dir) = args.temp_dir {
        builder = builder.temp_dir(dir.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    let config = builder.build().context("Invalid configuration")?;

    let metadata = DocumentMetadata {
        title: args.title.clone(),
        author: args.author.clone(),
        description: args.description.clone(),
        language: args.language.clone(),
    };
    if metadata.title.is_some() && args.inputs.len() > 1 {
        tracing::warn!("--title applies to every input");
    }

    let converter = Converter::new(config);
    let config = converter.config();

    let results: Vec<(String, Result<JobReport>)> = stream::iter(args.inputs.iter().cloned())
        .map(|input| {
            let converter = converter.clone();
            let metadata = metadata.clone();
            async move {
                let result: Result<JobReport> = async {
                    let upload = resolve_input(&input, config)
                        .await
                        .with_context(|| format!("Failed to read '{input}'"))?;
                    let handle = converter
                        .submit(upload, metadata)
                        .with_context(|| format!("Rejected '{input}'"))?;
                    converter
                        .wait(&handle)
                        .await
                        .with_context(|| format!("Lost track of job for '{input}'"))
                }
                .await;
                (input, result)
            }
        })
        .buffer_unordered(args.concurrency.max(1))
        .collect()
        .await;

    let total = results.len();
    let mut failed = 0;
    let mut reports = Vec::new();

    for (input, result) in results {
        match result {
            Ok(report) => {
                if report.status != JobStatus::Done {
                    failed += 1;
                }
                if !args.json && !quiet && !show_progress {
                    print_report(&input, &report);
                }
                reports.push(report);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {input}: {e:#}", red("✘"));
            }
        }
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?
        );
    } else if !quiet {
        // Job outputs go to stdout so they can be piped.
        for report in reports.iter().filter(|r| r.status == JobStatus::Done) {
            if let Some(ref artifact) = report.artifact {
                println!("{}", artifact.path.display());
            }
        }
        eprintln!(
            "{}  {}/{} converted",
            if failed == 0 { green("✔") } else { red("✘") },
            bold(&(total - failed).to_string()),
            total
        );
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {total} conversions failed");
    }
    Ok(())
}

fn print_report(input: &str, report: &JobReport) {
    match (&report.artifact, &report.error) {
        (Some(artifact), _) => {
            let chapters = report.stats.as_ref().map(|s| s.chapter_count).unwrap_or(0);
            eprintln!(
                "{} {input} → {}  {}",
                green("✓"),
                artifact.path.display(),
                dim(&format!("{chapters} chapters"))
            );
        }
        (None, Some(error)) => eprintln!("{} {input}: {error}", red("✗")),
        (None, None) => eprintln!("{} {input}: {}", red("✗"), report.status),
    }
}

// ── list / delete ────────────────────────────────────────────────────────

fn artifact_converter(dir: OutputDirArg) -> Result<Converter> {
    let config = ConversionConfig::builder()
        .output_dir(dir.output_dir)
        .build()
        .context("Invalid configuration")?;
    Ok(Converter::new(config))
}

async fn run_list(dir: OutputDirArg, json: bool) -> Result<()> {
    let shown = dir.output_dir.display().to_string();
    let artifacts = artifact_converter(dir)?
        .list_artifacts()
        .await
        .with_context(|| format!("Failed to list '{shown}'"))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&artifacts).context("Failed to serialise artifacts")?
        );
        return Ok(());
    }

    if artifacts.is_empty() {
        eprintln!("{}", dim(&format!("No artifacts in {shown}")));
        return Ok(());
    }
    for artifact in &artifacts {
        let size = tokio::fs::metadata(&artifact.path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        println!("{}  {:>10}  {}", artifact.id, size, dim(&artifact.path.display().to_string()));
    }
    Ok(())
}

async fn run_delete(artifact_id: &str, dir: OutputDirArg, quiet: bool) -> Result<()> {
    let id = uuid::Uuid::parse_str(artifact_id.trim())
        .with_context(|| format!("'{artifact_id}' is not an artifact id"))?;
    artifact_converter(dir)?
        .delete_artifact_by_id(id)
        .await
        .with_context(|| format!("Failed to delete artifact {id}"))?;
    if !quiet {
        eprintln!("{} deleted {id}", green("✔"));
    }
    Ok(())
}

// ── inspect ──────────────────────────────────────────────────────────────

async fn run_inspect(epub: PathBuf, json: bool) -> Result<()> {
    let bytes = tokio::fs::read(&epub)
        .await
        .with_context(|| format!("Failed to read {:?}", epub))?;
    let summary = read_package(&bytes).with_context(|| format!("Failed to inspect {:?}", epub))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
        return Ok(());
    }

    println!("File:         {}", epub.display());
    if let Some(ref t) = summary.title {
        println!("Title:        {}", t);
    }
    if let Some(ref a) = summary.author {
        println!("Author:       {}", a);
    }
    if let Some(ref l) = summary.language {
        println!("Language:     {}", l);
    }
    if let Some(ref i) = summary.identifier {
        println!("Identifier:   {}", i);
    }
    println!("Chapters:     {}", summary.chapter_titles.len());
    for (i, title) in summary.chapter_titles.iter().enumerate() {
        println!("  {:>3}. {}", i + 1, title);
    }
    Ok(())
}

// ── sync ─────────────────────────────────────────────────────────────────

fn run_sync(args: SyncArgs) -> Result<()> {
    let policy = if args.strict {
        MonotonicityPolicy::Reject
    } else {
        MonotonicityPolicy::Tolerate
    };
    let config = SyncConfig::builder()
        .avg_seconds_per_page(args.seconds_per_page)
        .monotonicity(policy)
        .build()
        .context("Invalid sync configuration")?;

    let registry = CalibrationRegistry::new(config).context("Invalid sync configuration")?;
    let table = registry
        .load_file(&args.table)
        .with_context(|| format!("Failed to load calibration table {:?}", args.table))?;

    let query = match (args.page, args.time) {
        (Some(page), _) => SyncQuery::ByPage(page),
        (None, Some(t)) => SyncQuery::ByTime(t),
        (None, None) => anyhow::bail!("one of --page or --time is required"),
    };
    let result = table.mapper().query(query);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else {
        println!(
            "page {}  ⇄  {}  {}  {}",
            bold(&result.page.to_string()),
            bold(&format_timestamp(result.timestamp)),
            result.label,
            dim(&format!("({})", result.precision)),
        );
    }
    Ok(())
}

/// `h:mm:ss.s`
fn format_timestamp(secs: f64) -> String {
    let whole = secs.max(0.0);
    let h = (whole / 3600.0).floor();
    let m = ((whole - h * 3600.0) / 60.0).floor();
    let s = whole - h * 3600.0 - m * 60.0;
    format!("{}:{:02}:{:04.1}", h as u64, m as u64, s)
}

/// `--max-size-mb` in bytes, saturating on platforms where it does not fit.
fn mib_to_bytes(mib: u64) -> usize {
    usize::try_from(mib.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
}
