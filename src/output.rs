//! Data model shared by every pipeline stage.
//!
//! ```text
//! DocumentDescriptor ──plan──▶ ChunkSpec* ──submit/poll──▶ RemoteJob
//!                                                         │
//!        MergedOutput ◀──merge── ChunkOutcome* ◀──materialize
//! ```
//!
//! Descriptors are immutable after validation and shared between chunks via
//! `Arc`. A `RemoteJob` belongs to exactly one chunk for its whole lifetime.

use crate::error::ChunkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ── Formats ──────────────────────────────────────────────────────────────

/// Input formats accepted by the remote parsing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Doc,
    Docx,
    Ppt,
    Pptx,
    Png,
    Jpg,
    Jpeg,
    Html,
}

impl DocumentFormat {
    /// Every supported format, in lookup order.
    ///
    /// Order matters for MIME fallback: `image/jpeg` resolves to [`Jpg`](Self::Jpg).
    pub const ALL: [DocumentFormat; 9] = [
        DocumentFormat::Pdf,
        DocumentFormat::Doc,
        DocumentFormat::Docx,
        DocumentFormat::Ppt,
        DocumentFormat::Pptx,
        DocumentFormat::Png,
        DocumentFormat::Jpg,
        DocumentFormat::Jpeg,
        DocumentFormat::Html,
    ];

    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Doc => "doc",
            DocumentFormat::Docx => "docx",
            DocumentFormat::Ppt => "ppt",
            DocumentFormat::Pptx => "pptx",
            DocumentFormat::Png => "png",
            DocumentFormat::Jpg => "jpg",
            DocumentFormat::Jpeg => "jpeg",
            DocumentFormat::Html => "html",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Doc => "application/msword",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Ppt => "application/vnd.ms-powerpoint",
            DocumentFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            DocumentFormat::Png => "image/png",
            DocumentFormat::Jpg | DocumentFormat::Jpeg => "image/jpeg",
            DocumentFormat::Html => "text/html",
        }
    }

    /// Case-insensitive extension lookup (without the leading dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }

    /// Lookup by declared `Content-Type`; parameters such as `; charset=` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let media = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        if media.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|f| f.mime_type() == media)
    }

    /// Lookup by the extension of a filesystem path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub fn is_image(self) -> bool {
        matches!(
            self,
            DocumentFormat::Png | DocumentFormat::Jpg | DocumentFormat::Jpeg
        )
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

// ── Descriptor ───────────────────────────────────────────────────────────

/// A validated input document. Never re-measured after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    /// Local path or absolute URL, exactly as supplied.
    pub location: String,
    /// File name shown to users and used to name outputs.
    pub display_name: String,
    /// Size in bytes. Remote resources without a `Content-Length` report 0.
    pub size_bytes: u64,
    pub format: DocumentFormat,
    /// Known only for local files whose format can be introspected.
    pub page_count: Option<usize>,
    pub is_remote: bool,
}

impl DocumentDescriptor {
    /// Whether the page count alone forces a split at `max_pages_per_chunk`.
    pub fn needs_split(&self, max_pages_per_chunk: usize) -> bool {
        self.page_count
            .map(|p| p > max_pages_per_chunk)
            .unwrap_or(false)
    }

    /// Filesystem-safe stem used for output names (`<stem>.md`, `<stem>_images/`).
    pub fn output_stem(&self) -> String {
        let stem = Path::new(&self.display_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let cleaned: String = stem
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if cleaned.is_empty() {
            "document".to_string()
        } else {
            cleaned
        }
    }
}

// ── Chunks ───────────────────────────────────────────────────────────────

/// Inclusive, 1-based page bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start >= 1 && start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end + 1 - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Renders in the service's `page_ranges` syntax, e.g. `326-650`.
impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One planned unit of submission.
#[derive(Debug, Clone)]
pub struct ChunkSpec {
    pub source: Arc<DocumentDescriptor>,
    /// 1-based; ascending index matches ascending pages and fixes merge order.
    pub sequence_index: usize,
    /// `None` means the whole document is submitted unsplit.
    pub page_range: Option<PageRange>,
}

/// Serializable view of a planned chunk, for dry runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChunk {
    pub sequence_index: usize,
    pub page_range: Option<PageRange>,
}

impl From<&ChunkSpec> for PlannedChunk {
    fn from(spec: &ChunkSpec) -> Self {
        Self {
            sequence_index: spec.sequence_index,
            page_range: spec.page_range,
        }
    }
}

/// A validated document and its chunk plan, produced without submitting anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPlan {
    pub descriptor: DocumentDescriptor,
    pub chunks: Vec<PlannedChunk>,
}

// ── Remote jobs ──────────────────────────────────────────────────────────

/// Which status endpoint a job handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Submitted by URL; `job_id` is a task id.
    Task,
    /// Submitted by upload; `job_id` is a batch id holding one file.
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

/// Advisory progress reported while a job runs. Never used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub processed_units: u64,
    pub total_units: u64,
}

/// A remote parse job owned by exactly one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub job_id: String,
    pub kind: JobKind,
    pub state: JobState,
    pub progress: Option<JobProgress>,
    /// Present only when `state == Done`.
    pub result_bundle_url: Option<String>,
    /// Present only when `state == Failed`.
    pub error_message: Option<String>,
}

impl RemoteJob {
    /// A freshly submitted job.
    pub fn submitted(job_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            state: JobState::Pending,
            progress: None,
            result_bundle_url: None,
            error_message: None,
        }
    }

    /// Refresh from a status report, dropping fields that do not belong to `state`.
    pub fn with_status(
        &self,
        state: JobState,
        progress: Option<JobProgress>,
        bundle_url: Option<String>,
        error_message: Option<String>,
    ) -> Self {
        let non_empty = |s: Option<String>| s.filter(|v| !v.trim().is_empty());
        Self {
            job_id: self.job_id.clone(),
            kind: self.kind,
            state,
            progress: if state == JobState::Running {
                progress
            } else {
                None
            },
            result_bundle_url: if state == JobState::Done {
                non_empty(bundle_url)
            } else {
                None
            },
            error_message: if state == JobState::Failed {
                non_empty(error_message)
            } else {
                None
            },
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ── Results ──────────────────────────────────────────────────────────────

/// The extracted bundle of one finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedResult {
    /// Directory the bundle was extracted into.
    pub chunk_dir: PathBuf,
    /// The canonical Markdown file found in the bundle.
    pub markdown_path: PathBuf,
    /// The bundle's `images` directory, if it had one.
    pub images_dir: Option<PathBuf>,
}

/// Record of one chunk's run, kept for diagnostics whether it succeeded or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOutcome {
    pub sequence_index: usize,
    pub page_range: Option<PageRange>,
    /// Remote job id, once the submission was accepted.
    pub job_id: Option<String>,
    pub duration_ms: u64,
    /// Set on success.
    pub result: Option<MaterializedResult>,
    /// Set on failure.
    pub error: Option<ChunkError>,
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.is_some()
    }
}

/// Aggregate statistics for one processed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_chunks: usize,
    pub succeeded_chunks: usize,
    pub image_count: usize,
    pub markdown_bytes: usize,
    pub total_duration_ms: u64,
}

/// Final artifact set for one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedOutput {
    pub descriptor: DocumentDescriptor,
    pub merged_document_path: PathBuf,
    /// `None` when no chunk produced images.
    pub merged_image_directory: Option<PathBuf>,
    /// `<stem>_chunks.json`: job ids and page ranges of every chunk.
    pub manifest_path: PathBuf,
    /// One record per chunk, in sequence order.
    pub chunk_outcomes: Vec<ChunkOutcome>,
    pub stats: ProcessingStats,
}

/// Per-chunk record written beside the merged Markdown as `<stem>_chunks.json`.
///
/// Written whether or not the document merged, so failed ranges can be
/// resubmitted after the chunk work directories are gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub descriptor: DocumentDescriptor,
    /// Every chunk succeeded and the merged document was written.
    pub complete: bool,
    pub chunks: Vec<ChunkOutcome>,
}
