//! CLI binary for mineru-pipe.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ProcessingConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use mineru_pipe::config::DEFAULT_BASE_URL;
use mineru_pipe::{
    plan_document, process_many, ChunkSeparator, DocumentFormat, DocumentReport, ModelVersion,
    PageRange, ProcessingConfig, ProcessingError, ProcessingProgressCallback, ProgressCallback,
};
use serde_json::json;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const SPINNER: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar counting chunks across every document,
/// plus a log line per finished chunk. Chunks finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Chunk start times by sequence index.
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} chunks  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER);

        bar.set_style(style);
        bar.set_prefix("Parsing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed(&self, chunk: usize) -> String {
        let ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&chunk)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);
        dim(&format!("{:.1}s", ms as f64 / 1000.0))
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProcessingProgressCallback for CliProgressCallback {
    fn on_document_start(&self, document: &str, total_chunks: usize) {
        self.bar.inc_length(total_chunks as u64);
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(document),
            dim(&format!("{total_chunks} chunk(s)"))
        ));
    }

    fn on_chunk_start(&self, chunk: usize, _total: usize, range: Option<PageRange>) {
        self.start_times
            .lock()
            .unwrap()
            .insert(chunk, Instant::now());
        let pages = range.map_or_else(|| "all pages".to_string(), |r| format!("pages {r}"));
        self.bar.set_message(format!("chunk {chunk}: {pages}"));
    }

    fn on_chunk_progress(&self, chunk: usize, processed: u64, total: u64) {
        self.bar
            .set_message(format!("chunk {chunk}: {processed}/{total} pages parsed"));
    }

    fn on_chunk_complete(&self, chunk: usize, total: usize, markdown_len: usize) {
        self.bar.println(format!(
            "  {} Chunk {:>2}/{:<2}  {:<12}  {}",
            green("✓"),
            chunk,
            total,
            dim(&format!("{markdown_len:>7} bytes")),
            self.elapsed(chunk),
        ));
        self.bar.inc(1);
    }

    fn on_chunk_error(&self, chunk: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Chunk {:>2}/{:<2}  {}  {}",
            red("✗"),
            chunk,
            total,
            red(&msg),
            self.elapsed(chunk),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse one PDF into ./output/report.md + ./output/report_images/
  mineru report.pdf

  # Parse a remote document
  mineru https://cdn-mineru.openxlab.org.cn/demo/example.pdf -o parsed

  # Every supported file in a folder, three chunks in flight per document
  mineru ./inbox --recursive -c 3

  # Show how a large book would be split, without submitting anything
  mineru --dry-run book.pdf

  # Scanned images with OCR, pipeline model, English
  mineru --ocr --model pipeline --language en scan.png

CREDENTIALS (first match wins):
  --token / MINERU_TOKEN          single bearer token
  --tokens / MINERU_TOKENS_FILE   JSON pool: {"account": {"token": "..."}}
  ./all_tokens.json               picked up from the working directory
  With a pool, each request uses a randomly chosen account.

SUPPORTED FORMATS:
  pdf, doc, docx, ppt, pptx, png, jpg, jpeg, html   (≤ 200 MB each)

SPLITTING:
  PDF, PPTX and DOCX files over --max-pages pages are split into equal page
  ranges (650 pages → 1-325 and 326-650). The merged Markdown keeps page
  order; images are renamed chunk_<i>_<name> and links are rewritten.
  A document is written only when every chunk succeeded.
"#;

/// Parse documents into Markdown with the MinerU service.
#[derive(Parser, Debug)]
#[command(
    name = "mineru",
    version,
    about = "Parse PDF, Office, image and HTML documents into Markdown with MinerU",
    long_about = "Submit local files or URLs to the MinerU document-parsing service. Documents \
over the service's page limit are split into page ranges, parsed concurrently and merged back \
into one Markdown file with one image folder.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files, directories or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Directory receiving <name>.md and <name>_images/.
    #[arg(short, long, env = "MINERU_OUTPUT_DIR", default_value = "output")]
    output_dir: PathBuf,

    /// JSON credential pool.
    #[arg(long = "tokens", env = "MINERU_TOKENS_FILE")]
    tokens_file: Option<PathBuf>,

    /// Single bearer token.
    #[arg(long, env = "MINERU_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// API root.
    #[arg(long, env = "MINERU_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Parsing model: pipeline, vlm, html. HTML inputs always use html.
    #[arg(long, env = "MINERU_MODEL", default_value = "vlm")]
    model: ModelVersion,

    /// Force OCR (on by default for images only).
    #[arg(long, env = "MINERU_OCR")]
    ocr: bool,

    /// Disable formula recognition.
    #[arg(long, env = "MINERU_NO_FORMULA")]
    no_formula: bool,

    /// Disable table recognition.
    #[arg(long, env = "MINERU_NO_TABLE")]
    no_table: bool,

    /// Document language hint (e.g. ch, en). Auto-detected when unset.
    #[arg(long, env = "MINERU_LANGUAGE")]
    language: Option<String>,

    /// Page selection for unsplit documents, e.g. "2,4-6".
    #[arg(long, env = "MINERU_PAGE_RANGES")]
    page_ranges: Option<String>,

    /// Chunks in flight per document.
    #[arg(short, long, env = "MINERU_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Documents processed at once.
    #[arg(long, env = "MINERU_DOCUMENTS", default_value_t = 2)]
    documents: usize,

    /// Maximum pages per chunk.
    #[arg(long, env = "MINERU_MAX_PAGES", default_value_t = 600,
          value_parser = clap::value_parser!(u64).range(1..))]
    max_pages: u64,

    /// Also split so that each chunk covers at most this many MiB of the file.
    #[arg(long, env = "MINERU_MAX_CHUNK_MB")]
    max_chunk_mb: Option<u64>,

    /// Seconds between status requests.
    #[arg(long, env = "MINERU_POLL_INTERVAL", default_value_t = 5,
          value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,

    /// Per-chunk polling budget in seconds.
    #[arg(long, env = "MINERU_TIMEOUT", default_value_t = 600,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Chunk separator: none, hr, comment, heading, or custom string.
    #[arg(long, env = "MINERU_SEPARATOR", default_value = "hr")]
    separator: ChunkSeparator,

    /// Keep per-chunk bundles in <output>/<name>_chunks/.
    #[arg(long, env = "MINERU_KEEP_INTERMEDIATE")]
    keep_intermediate: bool,

    /// Validate and print the chunk plan without submitting.
    #[arg(long)]
    dry_run: bool,

    /// Print a JSON report on stdout.
    #[arg(long, env = "MINERU_JSON")]
    json: bool,

    /// Descend into subdirectories of directory inputs.
    #[arg(short, long)]
    recursive: bool,

    /// Disable progress bar.
    #[arg(long, env = "MINERU_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MINERU_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MINERU_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; --verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.dry_run;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    let inputs = expand_inputs(&cli.inputs, cli.recursive)?;
    if inputs.is_empty() {
        anyhow::bail!("No supported documents found in {:?}", cli.inputs);
    }

    let progress = if show_progress {
        Some(CliProgressCallback::new())
    } else {
        None
    };
    let config = build_config(
        &cli,
        progress.clone().map(|cb| cb as Arc<dyn ProcessingProgressCallback>),
    )?;

    // ── Dry run ──────────────────────────────────────────────────────────
    if cli.dry_run {
        return dry_run(&cli, &inputs, &config).await;
    }

    // ── Process ──────────────────────────────────────────────────────────
    let started = Instant::now();
    let reports = process_many(&inputs, &cli.output_dir, &config)
        .await
        .context("Processing failed")?;
    if let Some(ref cb) = progress {
        cb.finish();
    }

    let failed = reports.iter().filter(|r| r.result.is_err()).count();
    if cli.json {
        let doc: Vec<serde_json::Value> = reports.iter().map(report_json).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        for report in &reports {
            print_report(report);
        }
        eprintln!(
            "{} {}/{} document(s) in {:.1}s",
            if failed == 0 { green("✔") } else { red("✘") },
            reports.len() - failed,
            reports.len(),
            started.elapsed().as_secs_f64(),
        );
    }

    if failed > 0 {
        anyhow::bail!("{} of {} document(s) failed", failed, reports.len());
    }
    Ok(())
}

/// Map CLI args to `ProcessingConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ProcessingConfig> {
    let mut builder = ProcessingConfig::builder()
        .base_url(&cli.base_url)
        .model_version(cli.model)
        .enable_formula(!cli.no_formula)
        .enable_table(!cli.no_table)
        .concurrency(cli.concurrency)
        .document_concurrency(cli.documents)
        .max_pages_per_chunk(cli.max_pages as usize)
        .poll_interval_ms(cli.poll_interval * 1000)
        .poll_timeout_secs(cli.timeout)
        .separator(cli.separator.clone())
        .keep_intermediate(cli.keep_intermediate);

    if cli.ocr {
        builder = builder.ocr(true);
    }
    if let Some(ref lang) = cli.language {
        builder = builder.language(lang);
    }
    if let Some(ref ranges) = cli.page_ranges {
        builder = builder.page_ranges(ranges);
    }
    if let Some(mb) = cli.max_chunk_mb {
        builder = builder.max_bytes_per_chunk(mb.saturating_mul(1024 * 1024));
    }
    if let Some(ref token) = cli.token {
        builder = builder.token(token);
    }
    if let Some(ref path) = cli.tokens_file {
        builder = builder.tokens_file(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Expand directory inputs into the supported files they contain, sorted.
fn expand_inputs(inputs: &[String], recursive: bool) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for input in inputs {
        let path = Path::new(input);
        if !path.is_dir() {
            out.push(input.clone());
            continue;
        }
        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to scan {}", input))?;
            if entry.file_type().is_file() && DocumentFormat::from_path(entry.path()).is_some() {
                out.push(entry.path().to_string_lossy().into_owned());
            }
        }
    }
    Ok(out)
}

async fn dry_run(cli: &Cli, inputs: &[String], config: &ProcessingConfig) -> Result<()> {
    let mut plans = Vec::new();
    let mut failed = 0;
    for input in inputs {
        match plan_document(input, config).await {
            Ok(plan) => {
                if cli.json {
                    plans.push(serde_json::to_value(&plan)?);
                } else {
                    let d = &plan.descriptor;
                    println!(
                        "{}  {}  {:.1} MB  {} page(s)",
                        bold(&d.display_name),
                        d.format,
                        d.size_bytes as f64 / 1_048_576.0,
                        d.page_count
                            .map_or_else(|| "?".to_string(), |p| p.to_string()),
                    );
                    for c in &plan.chunks {
                        let pages = c
                            .page_range
                            .map_or_else(|| "whole document".to_string(), |r| format!("pages {r}"));
                        println!("  chunk {:>2}: {}", c.sequence_index, pages);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                if cli.json {
                    plans.push(json!({ "input": input, "error": e.to_string() }));
                } else {
                    eprintln!("{} {}: {}", red("✘"), input, e);
                }
            }
        }
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
    }
    if failed > 0 {
        anyhow::bail!("{} of {} input(s) failed validation", failed, inputs.len());
    }
    Ok(())
}

fn print_report(report: &DocumentReport) {
    match &report.result {
        Ok(out) => {
            eprintln!(
                "{} {}  →  {}  {}",
                green("✔"),
                report.input,
                bold(&out.merged_document_path.display().to_string()),
                dim(&format!(
                    "{} chunk(s), {} image(s), {}ms",
                    out.stats.total_chunks, out.stats.image_count, out.stats.total_duration_ms
                )),
            );
        }
        Err(e) => {
            eprintln!("{} {}: {}", red("✘"), report.input, e);
            if let ProcessingError::ChunksFailed { outcomes, .. } = e {
                for o in outcomes {
                    let range = o
                        .page_range
                        .map_or_else(|| "all".to_string(), |r| r.to_string());
                    match &o.error {
                        Some(err) => eprintln!(
                            "    chunk {} (pages {}) [{}]: {}",
                            o.sequence_index,
                            range,
                            err.stage(),
                            red(&err.to_string())
                        ),
                        None => eprintln!(
                            "    chunk {} (pages {}) {}",
                            o.sequence_index,
                            range,
                            green("ok")
                        ),
                    }
                }
            }
        }
    }
}

fn report_json(report: &DocumentReport) -> serde_json::Value {
    match &report.result {
        Ok(out) => json!({ "input": report.input, "ok": true, "output": out }),
        Err(e) => json!({
            "input": report.input,
            "ok": false,
            "error": e.to_string(),
            "chunk_outcomes": e.chunk_outcomes(),
        }),
    }
}
