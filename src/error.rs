//! Error types for the mineru-pipe library.
//!
//! Five error types reflect five distinct failure scopes:
//!
//! * [`ValidationError`]: the input itself is unusable (missing file, wrong
//!   format, too large). Never retried; no job is ever submitted.
//!
//! * [`ChunkError`]: **non-fatal** for the document's siblings: one chunk
//!   failed at a named stage (submit, poll, remote, materialize). Stored inside
//!   [`crate::output::ChunkOutcome`] so the caller can retry just that chunk.
//!
//! * [`ProcessingError`]: **fatal** for one document: validation failed, no
//!   credentials are configured, the output could not be written, or at least
//!   one chunk failed so the all-or-nothing merge was skipped.
//!
//! * [`ServiceError`]: transport and protocol failures of a
//!   [`crate::client::ParseService`]. The coordinator maps these into the
//!   stage-labelled [`ChunkError`] variants.
//!
//! * [`MaterializeError`]: a finished job's bundle could not be downloaded,
//!   extracted or searched. Becomes [`ChunkError::Materialization`].

use crate::output::ChunkOutcome;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Input rejected by the file validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Local file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    NotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The path exists but is a directory or other non-regular file.
    #[error("'{path}' is not a regular file")]
    NotAFile { path: PathBuf },

    /// Zero-byte local file.
    #[error("File is empty: '{path}'")]
    Empty { path: PathBuf },

    /// File or remote resource exceeds the configured size ceiling.
    #[error("'{location}' is {size_bytes} bytes, over the {limit_bytes}-byte limit")]
    TooLarge {
        location: String,
        size_bytes: u64,
        limit_bytes: u64,
    },

    /// Neither the extension nor the declared content type maps to a supported format.
    #[error("Unsupported format for '{location}': {detail}\nSupported: pdf, doc, docx, ppt, pptx, png, jpg, jpeg, html")]
    UnsupportedFormat { location: String, detail: String },

    /// The metadata probe (HEAD request) failed or returned a non-2xx status.
    #[error("Could not probe '{url}': {reason}")]
    ProbeFailed { url: String, reason: String },

    /// The metadata probe did not answer within the configured timeout.
    #[error("Probe timed out after {secs}s for '{url}'")]
    ProbeTimeout { url: String, secs: u64 },
}

/// Pipeline stage at which a chunk failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Submit,
    Poll,
    Remote,
    Materialize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Submit => "submit",
            Stage::Poll => "poll",
            Stage::Remote => "remote",
            Stage::Materialize => "materialize",
        };
        f.write_str(label)
    }
}

/// A terminal failure of a single chunk.
///
/// Stored alongside [`crate::output::ChunkOutcome`]. Sibling chunks keep
/// running; the document as a whole is only reported failed once every chunk
/// has finished.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ChunkError {
    /// The service rejected the job, or the upload could not be completed.
    #[error("Chunk {chunk}: submission failed: {detail}")]
    Submission { chunk: usize, detail: String },

    /// The job did not reach a terminal state within the polling budget.
    #[error("Chunk {chunk}: no terminal state after {secs}s")]
    PollTimeout { chunk: usize, secs: u64 },

    /// The service reported the job as failed.
    #[error("Chunk {chunk}: remote parse failed: {message}")]
    RemoteFailure { chunk: usize, message: String },

    /// The job finished but its bundle could not be downloaded, extracted or read.
    #[error("Chunk {chunk}: materialization failed: {detail}")]
    Materialization { chunk: usize, detail: String },
}

impl ChunkError {
    /// Stage label for diagnostics.
    pub fn stage(&self) -> Stage {
        match self {
            ChunkError::Submission { .. } => Stage::Submit,
            ChunkError::PollTimeout { .. } => Stage::Poll,
            ChunkError::RemoteFailure { .. } => Stage::Remote,
            ChunkError::Materialization { .. } => Stage::Materialize,
        }
    }

    /// 1-based sequence index of the failed chunk.
    pub fn chunk(&self) -> usize {
        match self {
            ChunkError::Submission { chunk, .. }
            | ChunkError::PollTimeout { chunk, .. }
            | ChunkError::RemoteFailure { chunk, .. }
            | ChunkError::Materialization { chunk, .. } => *chunk,
        }
    }
}

/// Failure talking to the remote parsing service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Connection, TLS or timeout failure.
    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    /// Non-2xx HTTP status.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The service answered with a non-zero application code.
    #[error("{endpoint} rejected the request (code {code}): {message}")]
    Rejected {
        endpoint: String,
        code: i64,
        message: String,
    },

    /// The payload did not have the expected shape.
    #[error("malformed response from {endpoint}: {detail}")]
    Protocol { endpoint: String, detail: String },

    /// Local I/O failed while preparing an upload or writing a download.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure turning a finished job into files on disk.
///
/// Mapped into [`ChunkError::Materialization`] by the coordinator.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// Only `Done` jobs carry a bundle.
    #[error("job {job_id} is not done")]
    NotDone { job_id: String },

    #[error("bundle download failed: {0}")]
    Download(#[from] ServiceError),

    /// The bundle is not a readable zip archive.
    #[error("cannot extract '{path}': {detail}")]
    Extract { path: PathBuf, detail: String },

    /// The extracted tree holds no Markdown file.
    #[error("no Markdown file found under '{dir}'")]
    NoMarkdown { dir: PathBuf },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// All fatal, document-level errors returned by the mineru-pipe library.
///
/// Chunk-level failures use [`ChunkError`] and are stored in
/// [`crate::output::ChunkOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ProcessingError {
    // ── Input errors ──────────────────────────────────────────────────────
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // ── Service errors ────────────────────────────────────────────────────
    /// No credential could be found for the remote service.
    #[error("MinerU service is not configured.\n{hint}")]
    ServiceNotConfigured { hint: String },

    /// At least one chunk failed, so no merged output was produced.
    ///
    /// `outcomes` holds every chunk's record in sequence order, successes
    /// included, so the caller can resubmit only the failed chunks.
    #[error("{failed}/{total} chunks of '{document}' failed; nothing was merged")]
    ChunksFailed {
        document: String,
        failed: usize,
        total: usize,
        outcomes: Vec<ChunkOutcome>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write a merged output file or directory.
    #[error("Failed to write output '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProcessingError {
    /// Per-chunk records, when the failure happened after chunks were run.
    pub fn chunk_outcomes(&self) -> Option<&[ChunkOutcome]> {
        match self {
            ProcessingError::ChunksFailed { outcomes, .. } => Some(outcomes),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_error_reports_stage_and_index() {
        let e = ChunkError::RemoteFailure {
            chunk: 2,
            message: "bad scan".into(),
        };
        assert_eq!(e.stage(), Stage::Remote);
        assert_eq!(e.chunk(), 2);
        assert!(e.to_string().contains("Chunk 2"));
        assert!(e.to_string().contains("bad scan"));
    }

    #[test]
    fn poll_timeout_display() {
        let e = ChunkError::PollTimeout { chunk: 1, secs: 600 };
        assert_eq!(e.stage(), Stage::Poll);
        assert!(e.to_string().contains("600s"));
    }

    #[test]
    fn stage_serialises_lowercase() {
        let json = serde_json::to_string(&Stage::Materialize).unwrap();
        assert_eq!(json, "\"materialize\"");
    }

    #[test]
    fn too_large_display() {
        let e = ValidationError::TooLarge {
            location: "big.pdf".into(),
            size_bytes: 300,
            limit_bytes: 200,
        };
        let msg = e.to_string();
        assert!(msg.contains("big.pdf"), "got: {msg}");
        assert!(msg.contains("200"), "got: {msg}");
    }

    #[test]
    fn chunks_failed_exposes_outcomes() {
        let e = ProcessingError::ChunksFailed {
            document: "doc.pdf".into(),
            failed: 1,
            total: 2,
            outcomes: Vec::new(),
        };
        assert!(e.to_string().contains("1/2"));
        assert!(e.chunk_outcomes().is_some());
        assert!(ProcessingError::Internal("x".into()).chunk_outcomes().is_none());
    }
}
