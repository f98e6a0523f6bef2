//! # mineru-pipe
//!
//! Parse PDF, Office, image and HTML documents into Markdown with the MinerU
//! document-parsing service, splitting documents that exceed the service's
//! page limit and merging the results.
//!
//! ## Pipeline Overview
//!
//! ```text
//! path / URL
//!  │
//!  ├─ 1. Validate     existence, size ceiling, format; page count for local files
//!  ├─ 2. Plan         equal page-range chunks of at most 600 pages
//!  ├─ 3. Submit/Poll  one remote job per chunk, bounded concurrency
//!  ├─ 4. Materialize  download + extract each result bundle
//!  └─ 5. Merge        one Markdown file + one image directory, in page order
//! ```
//!
//! A document is merged only when every chunk succeeded. Otherwise
//! [`ProcessingError::ChunksFailed`] carries each chunk's outcome so the
//! failed ranges can be resubmitted.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mineru_pipe::{process, ProcessingConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Token from MINERU_TOKEN, or ./all_tokens.json
//!     let config = ProcessingConfig::default();
//!     let output = process("book.pdf", "output", &config).await?;
//!     println!("{}", output.merged_document_path.display());
//!     eprintln!("{} chunks, {} images",
//!         output.stats.total_chunks,
//!         output.stats.image_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mineru` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! ```toml
//! mineru-pipe = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{MineruClient, ParseService};
pub use config::{
    ChunkSeparator, ModelVersion, ParseOptions, ProcessingConfig, ProcessingConfigBuilder,
};
pub use credentials::{pick_credential, Credential, CredentialError, CredentialStore};
pub use error::{ChunkError, MaterializeError, ProcessingError, ServiceError, Stage, ValidationError};
pub use output::{
    ChunkManifest, ChunkOutcome, ChunkSpec, DocumentDescriptor, DocumentFormat, DocumentPlan,
    JobKind, JobProgress, JobState, MaterializedResult, MergedOutput, PageRange, PlannedChunk,
    ProcessingStats, RemoteJob,
};
pub use pipeline::materialize::materialize;
pub use pipeline::plan::ChunkPlanner;
pub use pipeline::poll::{PollOutcome, PollPolicy};
pub use pipeline::validate::{validate, ValidationLimits};
pub use process::{
    plan_document, process, process_descriptor, process_many, process_sync, resolve_service,
    DocumentReport,
};
pub use progress::{NoopProgressCallback, ProcessingProgressCallback, ProgressCallback};
