//! Configuration types for document processing.
//!
//! Every knob lives in [`ProcessingConfig`], built via its
//! [`ProcessingConfigBuilder`]. Parse options forwarded to the remote service
//! are grouped in [`ParseOptions`] so a client implementation only ever sees
//! what it needs.

use crate::client::ParseService;
use crate::error::ProcessingError;
use crate::output::{DocumentFormat, PageRange};
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default API root of the hosted MinerU service.
pub const DEFAULT_BASE_URL: &str = "https://mineru.net/api/v4";

/// Largest file or remote resource accepted for submission (200 MiB).
pub const DEFAULT_MAX_FILE_BYTES: u64 = 200 * 1024 * 1024;

/// Largest page count the service accepts in one job.
pub const DEFAULT_MAX_PAGES_PER_CHUNK: usize = 600;

/// Configuration for processing one or more documents.
///
/// Built via [`ProcessingConfig::builder()`] or using
/// [`ProcessingConfig::default()`].
///
/// # Example
/// ```rust
/// use mineru_pipe::ProcessingConfig;
///
/// let config = ProcessingConfig::builder()
///     .token("eyJ0eXBlIjoi...")
///     .concurrency(3)
///     .max_pages_per_chunk(300)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ProcessingConfig {
    /// API root, without a trailing slash. Default: [`DEFAULT_BASE_URL`].
    pub base_url: String,

    /// A single bearer token. Takes precedence over `tokens_file`.
    pub token: Option<String>,

    /// Path to a JSON credential pool (`{"account": {"token": "..."}}`).
    pub tokens_file: Option<PathBuf>,

    /// Pre-constructed service. Takes precedence over every credential source.
    pub service: Option<Arc<dyn ParseService>>,

    /// Size ceiling enforced by validation, in bytes. Default: 200 MiB.
    pub max_file_bytes: u64,

    /// Maximum pages per chunk. Default: 600.
    pub max_pages_per_chunk: usize,

    /// Optional per-chunk size ceiling. When set, the planner splits until
    /// both the page and the byte constraint hold.
    pub max_bytes_per_chunk: Option<u64>,

    /// Chunks of one document in flight at once. Default: 5.
    pub concurrency: usize,

    /// Documents processed at once by [`crate::process_many`]. Default: 2.
    pub document_concurrency: usize,

    /// Delay between status requests, in milliseconds. Default: 5000.
    pub poll_interval_ms: u64,

    /// Per-chunk polling budget, in seconds. Default: 600.
    pub poll_timeout_secs: u64,

    /// Timeout of the metadata probe for URL inputs. Default: 10.
    pub probe_timeout_secs: u64,

    /// Timeout of ordinary API requests. Default: 30.
    pub request_timeout_secs: u64,

    /// Timeout of uploads and bundle downloads. Default: 300.
    pub transfer_timeout_secs: u64,

    /// Options forwarded to the service with every job.
    pub parse: ParseOptions,

    /// Marker placed between chunks in the merged document.
    pub separator: ChunkSeparator,

    /// Keep per-chunk work directories after a successful merge. Default: false.
    pub keep_intermediate: bool,

    /// Optional progress callback for per-chunk events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            tokens_file: None,
            service: None,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_pages_per_chunk: DEFAULT_MAX_PAGES_PER_CHUNK,
            max_bytes_per_chunk: None,
            concurrency: 5,
            document_concurrency: 2,
            poll_interval_ms: 5_000,
            poll_timeout_secs: 600,
            probe_timeout_secs: 10,
            request_timeout_secs: 30,
            transfer_timeout_secs: 300,
            parse: ParseOptions::default(),
            separator: ChunkSeparator::default(),
            keep_intermediate: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ProcessingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("tokens_file", &self.tokens_file)
            .field("service", &self.service.as_ref().map(|_| "<dyn ParseService>"))
            .field("max_file_bytes", &self.max_file_bytes)
            .field("max_pages_per_chunk", &self.max_pages_per_chunk)
            .field("max_bytes_per_chunk", &self.max_bytes_per_chunk)
            .field("concurrency", &self.concurrency)
            .field("document_concurrency", &self.document_concurrency)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .field("parse", &self.parse)
            .field("separator", &self.separator)
            .field("keep_intermediate", &self.keep_intermediate)
            .finish()
    }
}

impl ProcessingConfig {
    /// Create a new builder for `ProcessingConfig`.
    pub fn builder() -> ProcessingConfigBuilder {
        ProcessingConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

/// Builder for [`ProcessingConfig`].
pub struct ProcessingConfigBuilder {
    config: ProcessingConfig,
}

impl fmt::Debug for ProcessingConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ProcessingConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.config.token = Some(token.into());
        self
    }

    pub fn tokens_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tokens_file = Some(path.into());
        self
    }

    pub fn service(mut self, service: Arc<dyn ParseService>) -> Self {
        self.config.service = Some(service);
        self
    }

    pub fn max_file_bytes(mut self, bytes: u64) -> Self {
        self.config.max_file_bytes = bytes;
        self
    }

    pub fn max_pages_per_chunk(mut self, pages: usize) -> Self {
        self.config.max_pages_per_chunk = pages;
        self
    }

    pub fn max_bytes_per_chunk(mut self, bytes: u64) -> Self {
        self.config.max_bytes_per_chunk = Some(bytes);
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn document_concurrency(mut self, n: usize) -> Self {
        self.config.document_concurrency = n.max(1);
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    pub fn poll_timeout_secs(mut self, secs: u64) -> Self {
        self.config.poll_timeout_secs = secs;
        self
    }

    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.probe_timeout_secs = secs;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn transfer_timeout_secs(mut self, secs: u64) -> Self {
        self.config.transfer_timeout_secs = secs;
        self
    }

    pub fn parse_options(mut self, options: ParseOptions) -> Self {
        self.config.parse = options;
        self
    }

    pub fn model_version(mut self, model: ModelVersion) -> Self {
        self.config.parse.model_version = model;
        self
    }

    pub fn ocr(mut self, on: bool) -> Self {
        self.config.parse.is_ocr = Some(on);
        self
    }

    pub fn enable_formula(mut self, on: bool) -> Self {
        self.config.parse.enable_formula = on;
        self
    }

    pub fn enable_table(mut self, on: bool) -> Self {
        self.config.parse.enable_table = on;
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.parse.language = Some(lang.into());
        self
    }

    pub fn page_ranges(mut self, ranges: impl Into<String>) -> Self {
        self.config.parse.page_ranges = Some(ranges.into());
        self
    }

    pub fn separator(mut self, sep: ChunkSeparator) -> Self {
        self.config.separator = sep;
        self
    }

    pub fn keep_intermediate(mut self, v: bool) -> Self {
        self.config.keep_intermediate = v;
        self
    }

    /// Set a progress callback to receive per-chunk events.
    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessingConfig, ProcessingError> {
        let c = &self.config;
        if c.max_pages_per_chunk == 0 {
            return Err(ProcessingError::InvalidConfig(
                "max_pages_per_chunk must be ≥ 1".into(),
            ));
        }
        if c.max_bytes_per_chunk == Some(0) {
            return Err(ProcessingError::InvalidConfig(
                "max_bytes_per_chunk must be ≥ 1".into(),
            ));
        }
        if c.max_file_bytes == 0 {
            return Err(ProcessingError::InvalidConfig(
                "max_file_bytes must be ≥ 1".into(),
            ));
        }
        if c.poll_interval_ms == 0 {
            return Err(ProcessingError::InvalidConfig(
                "poll interval must be ≥ 1 ms".into(),
            ));
        }
        if c.poll_timeout_secs == 0 {
            return Err(ProcessingError::InvalidConfig(
                "poll timeout must be ≥ 1 s".into(),
            ));
        }
        if c.poll_timeout() < c.poll_interval() {
            return Err(ProcessingError::InvalidConfig(format!(
                "poll timeout ({}s) is shorter than the poll interval ({}ms); no status would ever be requested",
                c.poll_timeout_secs, c.poll_interval_ms
            )));
        }
        if !(c.base_url.starts_with("http://") || c.base_url.starts_with("https://")) {
            return Err(ProcessingError::InvalidConfig(format!(
                "base URL must be http(s), got '{}'",
                c.base_url
            )));
        }
        if let Some(ranges) = &c.parse.page_ranges {
            if ranges.trim().is_empty() {
                return Err(ProcessingError::InvalidConfig(
                    "page_ranges must not be empty".into(),
                ));
            }
        }
        Ok(self.config)
    }
}

// ── Parse options ────────────────────────────────────────────────────────

/// Parsing backend requested from the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ModelVersion {
    /// Classic layout pipeline.
    #[serde(rename = "pipeline")]
    Pipeline,
    /// Vision-language model (default).
    #[default]
    #[serde(rename = "vlm")]
    Vlm,
    /// Dedicated HTML model; forced for `.html` inputs.
    #[serde(rename = "MinerU-HTML")]
    Html,
}

impl ModelVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelVersion::Pipeline => "pipeline",
            ModelVersion::Vlm => "vlm",
            ModelVersion::Html => "MinerU-HTML",
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pipeline" => Ok(ModelVersion::Pipeline),
            "vlm" => Ok(ModelVersion::Vlm),
            "html" | "mineru-html" => Ok(ModelVersion::Html),
            other => Err(format!(
                "unknown model '{other}' (expected pipeline, vlm or html)"
            )),
        }
    }
}

/// Options sent to the service with every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    pub model_version: ModelVersion,
    /// `None` lets the format decide: on for images, off otherwise.
    pub is_ocr: Option<bool>,
    pub enable_formula: bool,
    pub enable_table: bool,
    /// `None` lets the service detect the language.
    pub language: Option<String>,
    /// User page selection (e.g. `"2,4-6"`). Only applied to unsplit documents;
    /// a planned chunk's own range always wins.
    pub page_ranges: Option<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            model_version: ModelVersion::default(),
            is_ocr: None,
            enable_formula: true,
            enable_table: true,
            language: None,
            page_ranges: None,
        }
    }
}

impl ParseOptions {
    /// Options as they should be sent for a chunk of `format` covering `range`.
    pub fn effective_for(&self, format: DocumentFormat, range: Option<PageRange>) -> ParseOptions {
        let mut opts = self.clone();
        if format == DocumentFormat::Html {
            opts.model_version = ModelVersion::Html;
        }
        if opts.is_ocr.is_none() {
            opts.is_ocr = Some(format.is_image());
        }
        if let Some(r) = range {
            opts.page_ranges = Some(r.to_string());
        }
        opts
    }

    /// OCR flag after format defaults were applied.
    pub fn ocr_enabled(&self) -> bool {
        self.is_ocr.unwrap_or(false)
    }
}

// ── Separator ────────────────────────────────────────────────────────────

/// How to separate chunks in the merged Markdown output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSeparator {
    /// Chunks joined with a blank line only.
    None,
    /// Horizontal rule between chunks. (default)
    #[default]
    HorizontalRule,
    /// HTML comment naming the chunk and its pages: `<!-- chunk 2: pages 301-600 -->`.
    Comment,
    /// Level-2 heading naming the pages of the following chunk.
    Heading,
    /// Custom string inserted between chunks.
    Custom(String),
}

impl ChunkSeparator {
    /// Render the marker placed before chunk `sequence_index` (1-based, ≥ 2).
    pub fn render(&self, sequence_index: usize, range: Option<PageRange>) -> String {
        let pages = range
            .map(|r| format!("pages {}", r))
            .unwrap_or_else(|| "whole document".to_string());
        match self {
            ChunkSeparator::None => "\n\n".to_string(),
            ChunkSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            ChunkSeparator::Comment => {
                format!("\n\n<!-- chunk {}: {} -->\n\n", sequence_index, pages)
            }
            ChunkSeparator::Heading => match range {
                Some(r) => format!("\n\n## Pages {}–{}\n\n", r.start, r.end),
                None => format!("\n\n## Part {}\n\n", sequence_index),
            },
            ChunkSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

impl std::str::FromStr for ChunkSeparator {
    type Err = String;

    /// `none`, `hr`, `comment`, `heading`; anything else is used verbatim.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "none" => ChunkSeparator::None,
            "hr" | "rule" => ChunkSeparator::HorizontalRule,
            "comment" => ChunkSeparator::Comment,
            "heading" => ChunkSeparator::Heading,
            other => ChunkSeparator::Custom(other.to_string()),
        })
    }
}
