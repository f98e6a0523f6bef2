//! Progress-callback trait for per-chunk processing events.
//!
//! Inject an [`Arc<dyn ProcessingProgressCallback>`] via
//! [`crate::config::ProcessingConfigBuilder::progress_callback`] to receive
//! events as the coordinator submits, polls and materializes each chunk.
//!
//! # Example
//!
//! ```rust
//! use mineru_pipe::{ProcessingProgressCallback, ProcessingConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ProcessingProgressCallback for CountingCallback {
//!     fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, markdown_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Chunk {}/{} done ({} bytes)", chunk, total_chunks, markdown_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ProcessingConfig::builder()
//!     .progress_callback(counter as Arc<dyn ProcessingProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::PageRange;
use std::sync::Arc;

/// Called by the coordinator as it processes each chunk.
///
/// Chunks run concurrently, so every method except the document-level ones
/// may be called from several tasks at once. All methods default to no-ops.
pub trait ProcessingProgressCallback: Send + Sync {
    /// Called once per document after planning, before any submission.
    fn on_document_start(&self, document: &str, total_chunks: usize) {
        let _ = (document, total_chunks);
    }

    /// Called when a chunk passes the admission gate.
    fn on_chunk_start(&self, chunk: usize, total_chunks: usize, range: Option<PageRange>) {
        let _ = (chunk, total_chunks, range);
    }

    /// Called once the service accepted the chunk's job.
    fn on_chunk_submitted(&self, chunk: usize, job_id: &str) {
        let _ = (chunk, job_id);
    }

    /// Advisory progress reported by the service while the job runs.
    fn on_chunk_progress(&self, chunk: usize, processed_units: u64, total_units: u64) {
        let _ = (chunk, processed_units, total_units);
    }

    /// Called when a chunk's bundle has been materialized.
    ///
    /// `markdown_len` is the byte length of the chunk's Markdown.
    fn on_chunk_complete(&self, chunk: usize, total_chunks: usize, markdown_len: usize) {
        let _ = (chunk, total_chunks, markdown_len);
    }

    /// Called when a chunk fails at any stage.
    fn on_chunk_error(&self, chunk: usize, total_chunks: usize, error: &str) {
        let _ = (chunk, total_chunks, error);
    }

    /// Called once per document after every chunk has been attempted.
    fn on_document_complete(&self, document: &str, total_chunks: usize, success_count: usize) {
        let _ = (document, total_chunks, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl ProcessingProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessingConfig`].
pub type ProgressCallback = Arc<dyn ProcessingProgressCallback>;
