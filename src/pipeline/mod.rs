//! Pipeline stages for document processing.
//!
//! Each submodule implements one step; [`crate::process`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! validate ──▶ plan ──▶ poll ──▶ materialize ──▶ merge
//! (+inspect)  (chunks)  (jobs)   (bundles)       (one .md)
//! ```
//!
//! 1. [`validate`] turns a path or URL into a `DocumentDescriptor`; [`inspect`]
//!    counts pages of local PDF/PPTX/DOCX files in `spawn_blocking`
//! 2. [`plan`] partitions the page range into equal chunks
//! 3. [`poll`] drives a submitted job to a terminal state on a fixed interval
//! 4. [`materialize`] downloads and unpacks a finished job's bundle
//! 5. [`merge`] concatenates Markdown in page order and merges image folders

pub mod inspect;
pub mod materialize;
pub mod merge;
pub mod plan;
pub mod poll;
pub mod validate;
