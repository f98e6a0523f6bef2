//! Document processing entry points: the merge coordinator.
//!
//! ```text
//! validate ─▶ plan ─▶ ┌ gate ─▶ submit ─▶ poll ─▶ materialize ┐ ─▶ merge
//!                     ├ gate ─▶ submit ─▶ poll ─▶ materialize ┤
//!                     └ ...                                   ┘
//! ```
//!
//! Chunks of one document run concurrently behind a semaphore of
//! `config.concurrency` permits, held from submission through
//! materialization. Outcomes are returned in sequence order whatever order
//! they complete in. The merge is all-or-nothing: one failed chunk fails the
//! document, and every chunk's outcome is returned with the error.
//!
//! Output layout for a document with stem `report`:
//!
//! ```text
//! <out>/report.md                 merged Markdown
//! <out>/report_images/chunk_<i>_* merged images
//! <out>/report_chunks.json        job id, page range and result of every
//!                                 chunk (written on failure too)
//! <out>/report_chunks/chunk_<i>/  per-chunk bundles (removed after merge
//!                                 unless keep_intermediate)
//! ```

use crate::client::{MineruClient, ParseService};
use crate::config::{ParseOptions, ProcessingConfig};
use crate::credentials::CredentialStore;
use crate::error::{ChunkError, ProcessingError, ValidationError};
use crate::output::{
    ChunkManifest, ChunkOutcome, ChunkSpec, DocumentDescriptor, DocumentPlan, JobState,
    MergedOutput, PlannedChunk, ProcessingStats, RemoteJob,
};
use crate::pipeline::merge::{self, ChunkMarkdown};
use crate::pipeline::plan::ChunkPlanner;
use crate::pipeline::poll::{PollOutcome, PollPolicy};
use crate::pipeline::validate::{self, ValidationLimits};
use crate::pipeline::materialize;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Credential file picked up from the working directory when nothing else is configured.
pub const DEFAULT_TOKENS_FILE: &str = "all_tokens.json";

/// Validate, split, parse and merge one document.
///
/// # Arguments
/// * `input`: local file path or HTTP/HTTPS URL
/// * `output_dir`: directory receiving `<stem>.md` and `<stem>_images/`
/// * `config`: processing configuration
///
/// # Errors
/// * [`ProcessingError::Validation`] when the input is rejected; nothing is submitted.
/// * [`ProcessingError::ServiceNotConfigured`] when no credential can be found.
/// * [`ProcessingError::ChunksFailed`] when any chunk fails; carries every outcome.
/// * [`ProcessingError::OutputWriteFailed`] when merged files cannot be written.
pub async fn process(
    input: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: &ProcessingConfig,
) -> Result<MergedOutput, ProcessingError> {
    let input = input.as_ref();
    info!("Processing {}", input);

    let descriptor = validate::validate(input, &validation_limits(config)).await?;
    let service = resolve_service(config)?;
    process_descriptor(descriptor, output_dir.as_ref(), service, config).await
}

/// Process an already validated document with an explicit service.
///
/// Outputs are named after [`DocumentDescriptor::output_stem`].
pub async fn process_descriptor(
    descriptor: DocumentDescriptor,
    output_dir: &Path,
    service: Arc<dyn ParseService>,
    config: &ProcessingConfig,
) -> Result<MergedOutput, ProcessingError> {
    let stem = descriptor.output_stem();
    process_as(descriptor, &stem, output_dir, service, config).await
}

async fn process_as(
    descriptor: DocumentDescriptor,
    stem: &str,
    output_dir: &Path,
    service: Arc<dyn ParseService>,
    config: &ProcessingConfig,
) -> Result<MergedOutput, ProcessingError> {
    let total_start = Instant::now();
    let descriptor = Arc::new(descriptor);
    let chunks = planner(config).plan(Arc::clone(&descriptor));
    let total = chunks.len();

    if let Some(ranges) = ignored_page_selection(&config.parse, &chunks) {
        warn!(
            "Page selection '{}' ignored for {}: the document is split into {} chunks",
            ranges, descriptor.display_name, total
        );
    }

    let manifest_path = output_dir.join(format!("{}_chunks.json", stem));
    let chunks_root = output_dir.join(format!("{}_chunks", stem));
    create_dir(&chunks_root).await?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_document_start(&descriptor.display_name, total);
    }

    // ── Run every chunk behind the admission gate ────────────────────────
    let gate = Arc::new(Semaphore::new(config.concurrency.max(1)));
    let runs = chunks.iter().map(|chunk| {
        let gate = Arc::clone(&gate);
        let service = Arc::clone(&service);
        let dir = chunks_root.join(format!("chunk_{}", chunk.sequence_index));
        async move {
            let started = Instant::now();
            match gate.acquire().await {
                Ok(_permit) => run_chunk(service.as_ref(), chunk, total, &dir, config).await,
                Err(_) => failed(
                    chunk,
                    None,
                    started,
                    ChunkError::Submission {
                        chunk: chunk.sequence_index,
                        detail: "admission gate closed".into(),
                    },
                ),
            }
        }
    });
    let mut outcomes: Vec<ChunkOutcome> = join_all(runs).await;
    outcomes.sort_by_key(|o| o.sequence_index);

    let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
    if let Some(ref cb) = config.progress_callback {
        cb.on_document_complete(&descriptor.display_name, total, succeeded);
    }

    if succeeded < total {
        for o in outcomes.iter().filter_map(|o| o.error.as_ref()) {
            warn!("{} [{}]", o, o.stage());
        }
        if let Err(e) = write_manifest(&manifest_path, &descriptor, false, &outcomes).await {
            warn!("{}", e);
        }
        return Err(ProcessingError::ChunksFailed {
            document: descriptor.display_name.clone(),
            failed: total - succeeded,
            total,
            outcomes,
        });
    }

    // ── Merge ────────────────────────────────────────────────────────────
    let merged_path = output_dir.join(format!("{}.md", stem));
    let image_dir_name = format!("{}_images", stem);
    let image_dir = output_dir.join(&image_dir_name);

    let mut parts = Vec::with_capacity(total);
    for outcome in &outcomes {
        let Some(result) = outcome.result.as_ref() else {
            continue;
        };
        let markdown = tokio::fs::read_to_string(&result.markdown_path)
            .await
            .map_err(|e| ProcessingError::OutputWriteFailed {
                path: result.markdown_path.clone(),
                source: e,
            })?;
        parts.push(ChunkMarkdown {
            sequence_index: outcome.sequence_index,
            page_range: outcome.page_range,
            markdown: merge::rewrite_image_links(&markdown, outcome.sequence_index, &image_dir_name),
        });
    }
    let markdown = merge::merge_markdown(&parts, &config.separator);

    let image_sources: Vec<(usize, PathBuf)> = outcomes
        .iter()
        .filter_map(|o| {
            let dir = o.result.as_ref()?.images_dir.clone()?;
            Some((o.sequence_index, dir))
        })
        .collect();
    let image_count = copy_images(image_sources, image_dir.clone()).await?;

    merge::write_atomic(&merged_path, &markdown)
        .await
        .map_err(|e| ProcessingError::OutputWriteFailed {
            path: merged_path.clone(),
            source: e,
        })?;
    write_manifest(&manifest_path, &descriptor, true, &outcomes).await?;

    if !config.keep_intermediate {
        if let Err(e) = tokio::fs::remove_dir_all(&chunks_root).await {
            warn!("Could not remove {}: {}", chunks_root.display(), e);
        }
    }

    let stats = ProcessingStats {
        total_chunks: total,
        succeeded_chunks: succeeded,
        image_count,
        markdown_bytes: markdown.len(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };
    info!(
        "Merged {} chunk(s) of {} → {} ({} images, {}ms)",
        total,
        descriptor.display_name,
        merged_path.display(),
        image_count,
        stats.total_duration_ms
    );

    Ok(MergedOutput {
        descriptor: (*descriptor).clone(),
        merged_document_path: merged_path,
        merged_image_directory: (image_count > 0).then_some(image_dir),
        manifest_path,
        chunk_outcomes: outcomes,
        stats,
    })
}

/// Outcome of one input of [`process_many`].
#[derive(Debug)]
pub struct DocumentReport {
    pub input: String,
    pub result: Result<MergedOutput, ProcessingError>,
}

/// Process several documents, at most `config.document_concurrency` at a time.
///
/// Every input is validated first. Each document gets its own chunk gate;
/// the service and its credential pool are shared. Documents whose stems
/// collide (`a/report.pdf`, `b/report.pdf`) are written as `report`,
/// `report_2`, ... in input order. Reports come back in input order.
pub async fn process_many(
    inputs: &[String],
    output_dir: impl AsRef<Path>,
    config: &ProcessingConfig,
) -> Result<Vec<DocumentReport>, ProcessingError> {
    let output_dir = output_dir.as_ref();
    let service = resolve_service(config)?;
    let limits = validation_limits(config);
    let width = config.document_concurrency.max(1);

    let validated: Vec<Result<DocumentDescriptor, ValidationError>> =
        stream::iter(inputs.iter().map(|input| validate::validate(input, &limits)))
            .buffered(width)
            .collect()
            .await;

    let mut taken = HashSet::new();
    let jobs: Vec<(usize, &String, Result<(DocumentDescriptor, String), ValidationError>)> = inputs
        .iter()
        .zip(validated)
        .enumerate()
        .map(|(i, (input, result))| {
            let named = result.map(|d| {
                let stem = claim_stem(&mut taken, d.output_stem());
                (d, stem)
            });
            (i, input, named)
        })
        .collect();

    let mut reports: Vec<(usize, DocumentReport)> =
        stream::iter(jobs.into_iter().map(|(i, input, named)| {
            let service = Arc::clone(&service);
            async move {
                let result = match named {
                    Ok((d, stem)) => process_as(d, &stem, output_dir, service, config).await,
                    Err(e) => Err(e.into()),
                };
                (
                    i,
                    DocumentReport {
                        input: input.clone(),
                        result,
                    },
                )
            }
        }))
        .buffer_unordered(width)
        .collect()
        .await;

    reports.sort_by_key(|(i, _)| *i);
    Ok(reports.into_iter().map(|(_, r)| r).collect())
}

/// Reserve `stem`, or the first free `stem_<n>` (n ≥ 2) when it is taken.
///
/// Comparison ignores ASCII case so outputs stay distinct on
/// case-insensitive filesystems.
fn claim_stem(taken: &mut HashSet<String>, stem: String) -> String {
    let mut candidate = stem.clone();
    let mut n = 1;
    while !taken.insert(candidate.to_ascii_lowercase()) {
        n += 1;
        candidate = format!("{}_{}", stem, n);
    }
    if n > 1 {
        warn!("Output name '{}' already used in this run; writing '{}'", stem, candidate);
    }
    candidate
}

/// The user's page selection, when splitting makes it inapplicable.
fn ignored_page_selection<'a>(parse: &'a ParseOptions, chunks: &[ChunkSpec]) -> Option<&'a str> {
    let ranges = parse.page_ranges.as_deref()?;
    chunks
        .iter()
        .any(|c| c.page_range.is_some())
        .then_some(ranges)
}

/// Validate and plan without contacting the parsing service.
///
/// URL inputs still receive their metadata probe.
pub async fn plan_document(
    input: impl AsRef<str>,
    config: &ProcessingConfig,
) -> Result<DocumentPlan, ProcessingError> {
    let descriptor = Arc::new(validate::validate(input.as_ref(), &validation_limits(config)).await?);
    let chunks = planner(config)
        .plan(Arc::clone(&descriptor))
        .iter()
        .map(PlannedChunk::from)
        .collect();
    Ok(DocumentPlan {
        descriptor: (*descriptor).clone(),
        chunks,
    })
}

/// Synchronous wrapper around [`process`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    input: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: &ProcessingConfig,
) -> Result<MergedOutput, ProcessingError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ProcessingError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process(input, output_dir, config))
}

/// Pick the parsing service, in order of precedence:
///
/// 1. **Injected service** (`config.service`).
/// 2. **Single token** (`config.token`).
/// 3. **Credential file** (`config.tokens_file`).
/// 4. **`MINERU_TOKEN`** environment variable.
/// 5. **`./all_tokens.json`**, if present.
pub fn resolve_service(config: &ProcessingConfig) -> Result<Arc<dyn ParseService>, ProcessingError> {
    if let Some(ref service) = config.service {
        return Ok(Arc::clone(service));
    }

    let store = if let Some(ref token) = config.token {
        CredentialStore::single(token.clone())
    } else if let Some(ref path) = config.tokens_file {
        load_store(path)?
    } else if let Some(token) = std::env::var("MINERU_TOKEN").ok().filter(|t| !t.is_empty()) {
        CredentialStore::single(token)
    } else if Path::new(DEFAULT_TOKENS_FILE).is_file() {
        load_store(Path::new(DEFAULT_TOKENS_FILE))?
    } else {
        return Err(ProcessingError::ServiceNotConfigured {
            hint: format!(
                "Set MINERU_TOKEN, pass --token / --tokens <file>, or place {} in the working directory.",
                DEFAULT_TOKENS_FILE
            ),
        });
    };

    debug!("Using {} credential(s)", store.len());
    let client = MineruClient::from_config(config, store)
        .map_err(|e| ProcessingError::Internal(format!("Failed to build HTTP client: {}", e)))?;
    Ok(Arc::new(client))
}

fn load_store(path: &Path) -> Result<CredentialStore, ProcessingError> {
    CredentialStore::load(path).map_err(|e| ProcessingError::ServiceNotConfigured {
        hint: e.to_string(),
    })
}

fn validation_limits(config: &ProcessingConfig) -> ValidationLimits {
    ValidationLimits {
        max_file_bytes: config.max_file_bytes,
        probe_timeout: Duration::from_secs(config.probe_timeout_secs),
    }
}

fn planner(config: &ProcessingConfig) -> ChunkPlanner {
    let planner = ChunkPlanner::new(config.max_pages_per_chunk);
    match config.max_bytes_per_chunk {
        Some(bytes) => planner.with_byte_limit(bytes),
        None => planner,
    }
}

async fn write_manifest(
    path: &Path,
    descriptor: &DocumentDescriptor,
    complete: bool,
    outcomes: &[ChunkOutcome],
) -> Result<(), ProcessingError> {
    let manifest = ChunkManifest {
        descriptor: descriptor.clone(),
        complete,
        chunks: outcomes.to_vec(),
    };
    let json = serde_json::to_string_pretty(&manifest)
        .map_err(|e| ProcessingError::Internal(format!("Failed to serialise manifest: {}", e)))?;
    merge::write_atomic(path, &json)
        .await
        .map_err(|e| ProcessingError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

async fn create_dir(path: &Path) -> Result<(), ProcessingError> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| ProcessingError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Submit, poll and materialize one chunk. Never fails: errors land in the outcome.
async fn run_chunk(
    service: &dyn ParseService,
    chunk: &ChunkSpec,
    total: usize,
    dir: &Path,
    config: &ProcessingConfig,
) -> ChunkOutcome {
    let started = Instant::now();
    let seq = chunk.sequence_index;
    let cb = config.progress_callback.as_ref();
    if let Some(cb) = cb {
        cb.on_chunk_start(seq, total, chunk.page_range);
    }

    // ── Submit ───────────────────────────────────────────────────────────
    let options = config
        .parse
        .effective_for(chunk.source.format, chunk.page_range);
    let job = match service.submit(chunk, &options).await {
        Ok(job) => job,
        Err(e) => {
            let err = ChunkError::Submission {
                chunk: seq,
                detail: e.to_string(),
            };
            return report_failure(chunk, total, None, started, err, config);
        }
    };
    if let Some(cb) = cb {
        cb.on_chunk_submitted(seq, &job.job_id);
    }
    debug!("Chunk {}/{} submitted as {}", seq, total, job.job_id);

    // ── Poll ─────────────────────────────────────────────────────────────
    let policy = PollPolicy::new(config.poll_interval(), config.poll_timeout(), RemoteJob::is_terminal);
    let job_ref = &job;
    let outcome = policy
        .run(
            move || service.poll(job_ref),
            |status: &RemoteJob| {
                if let (Some(cb), Some(p)) = (cb, status.progress) {
                    cb.on_chunk_progress(seq, p.processed_units, p.total_units);
                }
            },
        )
        .await;

    let finished = match outcome {
        PollOutcome::Terminal(j) if j.state == JobState::Done => j,
        PollOutcome::Terminal(j) => {
            let err = ChunkError::RemoteFailure {
                chunk: seq,
                message: j
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "no error message".to_string()),
            };
            return report_failure(chunk, total, Some(j.job_id), started, err, config);
        }
        PollOutcome::TimedOut { elapsed, .. } => {
            debug!("Chunk {} gave up after {:?}", seq, elapsed);
            let err = ChunkError::PollTimeout {
                chunk: seq,
                secs: config.poll_timeout_secs,
            };
            return report_failure(chunk, total, Some(job.job_id.clone()), started, err, config);
        }
    };

    // ── Materialize ──────────────────────────────────────────────────────
    if dir.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(dir).await {
            warn!("Could not clear stale {}: {}", dir.display(), e);
        }
    }
    match materialize::materialize(service, &finished, dir).await {
        Ok(result) => {
            if let Some(cb) = cb {
                let len = tokio::fs::metadata(&result.markdown_path)
                    .await
                    .map(|m| m.len() as usize)
                    .unwrap_or(0);
                cb.on_chunk_complete(seq, total, len);
            }
            ChunkOutcome {
                sequence_index: seq,
                page_range: chunk.page_range,
                job_id: Some(finished.job_id),
                duration_ms: started.elapsed().as_millis() as u64,
                result: Some(result),
                error: None,
            }
        }
        Err(e) => {
            let err = ChunkError::Materialization {
                chunk: seq,
                detail: e.to_string(),
            };
            report_failure(chunk, total, Some(finished.job_id), started, err, config)
        }
    }
}

fn report_failure(
    chunk: &ChunkSpec,
    total: usize,
    job_id: Option<String>,
    started: Instant,
    error: ChunkError,
    config: &ProcessingConfig,
) -> ChunkOutcome {
    warn!("{}", error);
    if let Some(ref cb) = config.progress_callback {
        cb.on_chunk_error(chunk.sequence_index, total, &error.to_string());
    }
    failed(chunk, job_id, started, error)
}

fn failed(chunk: &ChunkSpec, job_id: Option<String>, started: Instant, error: ChunkError) -> ChunkOutcome {
    ChunkOutcome {
        sequence_index: chunk.sequence_index,
        page_range: chunk.page_range,
        job_id,
        duration_ms: started.elapsed().as_millis() as u64,
        result: None,
        error: Some(error),
    }
}

/// Replace `target` with the prefixed images of every chunk.
async fn copy_images(sources: Vec<(usize, PathBuf)>, target: PathBuf) -> Result<usize, ProcessingError> {
    if sources.is_empty() {
        return Ok(0);
    }
    let target_for_err = target.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<usize> {
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        let mut count = 0;
        for (seq, dir) in &sources {
            count += merge::merge_images(dir, *seq, &target)?;
        }
        Ok(count)
    })
    .await
    .map_err(|e| ProcessingError::Internal(format!("Image copy task panicked: {}", e)))?
    .map_err(|e| ProcessingError::OutputWriteFailed {
        path: target_for_err,
        source: e,
    })
}
