//! Integration tests for the processing pipeline.
//!
//! The coordinator is driven through a scripted [`ParseService`] and, for the
//! HTTP client, through a minimal local server speaking the MinerU v4 wire
//! format. Nothing here touches the network beyond 127.0.0.1.

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object};
use mineru_pipe::{
    plan_document, process, process_many, ChunkError, ChunkManifest, ChunkSpec, JobKind,
    JobProgress, JobState, ParseOptions, ParseService, ProcessingConfig, ProcessingError,
    RemoteJob, ServiceError, Stage, ValidationError,
};
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use zip::write::SimpleFileOptions;

// ── Fixtures ─────────────────────────────────────────────────────────────────

fn write_pdf(path: &Path, pages: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// A result bundle as the service ships it: `full.md` plus `images/*`.
fn bundle_zip(markdown: &str, images: &[String]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("full.md", SimpleFileOptions::default()).unwrap();
    zip.write_all(markdown.as_bytes()).unwrap();
    zip.start_file("layout.json", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"{}").unwrap();
    for name in images {
        zip.start_file(format!("images/{name}"), SimpleFileOptions::default())
            .unwrap();
        zip.write_all(name.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

fn chunk_markdown(seq: usize, images: &[String]) -> String {
    let mut md = format!("# Part {seq}\n\nBody of part {seq}.\n");
    for name in images {
        md.push_str(&format!("\n![figure](images/{name})\n"));
    }
    md
}

// ── Scripted parse service ───────────────────────────────────────────────────

/// Completes every job on first poll unless its chunk is listed in `fail`
/// (reported failed), `stall` (running forever) or `corrupt` (unreadable bundle).
struct FakeService {
    fail: HashSet<usize>,
    stall: HashSet<usize>,
    corrupt: HashSet<usize>,
    images_per_chunk: usize,
    /// Poll latency per chunk; lets tests force out-of-order completion.
    delay: fn(usize) -> Duration,
    submissions: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    page_ranges: Mutex<Vec<(usize, Option<String>)>>,
}

impl FakeService {
    fn new() -> Self {
        Self {
            fail: HashSet::new(),
            stall: HashSet::new(),
            corrupt: HashSet::new(),
            images_per_chunk: 0,
            delay: |_| Duration::from_millis(5),
            submissions: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            page_ranges: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, seq: usize) -> Self {
        self.fail.insert(seq);
        self
    }

    fn stalling(mut self, seq: usize) -> Self {
        self.stall.insert(seq);
        self
    }

    fn corrupting(mut self, seq: usize) -> Self {
        self.corrupt.insert(seq);
        self
    }

    fn with_images(mut self, n: usize) -> Self {
        self.images_per_chunk = n;
        self
    }

    fn with_delay(mut self, delay: fn(usize) -> Duration) -> Self {
        self.delay = delay;
        self
    }

    fn images(&self) -> Vec<String> {
        (1..=self.images_per_chunk)
            .map(|k| format!("img_{k}.jpg"))
            .collect()
    }
}

fn seq_of(id: &str) -> usize {
    id.rsplit('-').next().unwrap().parse().unwrap()
}

#[async_trait]
impl ParseService for FakeService {
    async fn submit(
        &self,
        chunk: &ChunkSpec,
        options: &ParseOptions,
    ) -> Result<RemoteJob, ServiceError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.page_ranges
            .lock()
            .unwrap()
            .push((chunk.sequence_index, options.page_ranges.clone()));
        Ok(RemoteJob::submitted(
            format!("job-{}", chunk.sequence_index),
            JobKind::Batch,
        ))
    }

    async fn poll(&self, job: &RemoteJob) -> Result<RemoteJob, ServiceError> {
        let seq = seq_of(&job.job_id);
        tokio::time::sleep((self.delay)(seq)).await;
        if self.fail.contains(&seq) {
            self.active.fetch_sub(1, Ordering::SeqCst);
            return Ok(job.with_status(
                JobState::Failed,
                None,
                None,
                Some("page 3 is corrupt".into()),
            ));
        }
        if self.stall.contains(&seq) {
            return Ok(job.with_status(
                JobState::Running,
                Some(JobProgress {
                    processed_units: 1,
                    total_units: 10,
                }),
                None,
                None,
            ));
        }
        Ok(job.with_status(
            JobState::Done,
            None,
            Some(format!("fake://bundle-{seq}")),
            None,
        ))
    }

    async fn download_bundle(&self, url: &str, dest: &Path) -> Result<u64, ServiceError> {
        let seq = seq_of(url);
        let images = self.images();
        let bytes = if self.corrupt.contains(&seq) {
            b"PK\x03\x04 truncated".to_vec()
        } else {
            bundle_zip(&chunk_markdown(seq, &images), &images)
        };
        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|source| ServiceError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(bytes.len() as u64)
    }
}

fn config_with(service: Arc<FakeService>, max_pages: usize, concurrency: usize) -> ProcessingConfig {
    ProcessingConfig::builder()
        .service(service)
        .max_pages_per_chunk(max_pages)
        .concurrency(concurrency)
        .poll_interval_ms(10)
        .poll_timeout_secs(5)
        .build()
        .unwrap()
}

// ── Coordinator scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn test_plan_splits_650_pages_into_two_ranges() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("book.pdf");
    write_pdf(&pdf, 650);

    let config = config_with(Arc::new(FakeService::new()), 600, 5);
    let plan = plan_document(pdf.to_str().unwrap(), &config).await.unwrap();

    assert_eq!(plan.descriptor.page_count, Some(650));
    let ranges: Vec<String> = plan
        .chunks
        .iter()
        .map(|c| c.page_range.unwrap().to_string())
        .collect();
    assert_eq!(ranges, vec!["1-325", "326-650"]);
}

#[tokio::test]
async fn test_split_document_submits_each_range() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("book.pdf");
    write_pdf(&pdf, 650);
    let out = dir.path().join("out");

    let service = Arc::new(FakeService::new());
    let config = config_with(Arc::clone(&service), 600, 5);
    let merged = process(pdf.to_str().unwrap(), &out, &config).await.unwrap();

    let mut seen = service.page_ranges.lock().unwrap().clone();
    seen.sort();
    assert_eq!(
        seen,
        vec![
            (1, Some("1-325".to_string())),
            (2, Some("326-650".to_string())),
        ]
    );
    assert_eq!(merged.stats.total_chunks, 2);
    assert_eq!(merged.merged_document_path, out.join("book.md"));
    // Chunk bundles are removed after a successful merge.
    assert!(!out.join("book_chunks").exists());
}

#[tokio::test]
async fn test_small_document_is_one_unranged_chunk() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("memo.pdf");
    write_pdf(&pdf, 4);

    let service = Arc::new(FakeService::new());
    let config = config_with(Arc::clone(&service), 600, 5);
    let merged = process(pdf.to_str().unwrap(), dir.path(), &config)
        .await
        .unwrap();

    assert_eq!(service.submissions.load(Ordering::SeqCst), 1);
    assert_eq!(*service.page_ranges.lock().unwrap(), vec![(1, None)]);
    assert!(merged.merged_image_directory.is_none());
    let md = std::fs::read_to_string(&merged.merged_document_path).unwrap();
    assert_eq!(md, "# Part 1\n\nBody of part 1.\n");
}

#[tokio::test]
async fn test_one_failed_chunk_fails_the_document() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("report.pdf");
    write_pdf(&pdf, 20);
    let out = dir.path().join("out");

    let service = Arc::new(FakeService::new().failing(2));
    let config = config_with(Arc::clone(&service), 10, 5);
    let err = process(pdf.to_str().unwrap(), &out, &config)
        .await
        .unwrap_err();

    match err {
        ProcessingError::ChunksFailed {
            failed,
            total,
            ref outcomes,
            ..
        } => {
            assert_eq!((failed, total), (1, 2));
            assert_eq!(outcomes.len(), 2);
            assert!(outcomes[0].is_success());
            assert_eq!(outcomes[0].page_range.unwrap().to_string(), "1-10");
            let error = outcomes[1].error.as_ref().unwrap();
            assert_eq!(error.stage(), Stage::Remote);
            assert_eq!(
                *error,
                ChunkError::RemoteFailure {
                    chunk: 2,
                    message: "page 3 is corrupt".into()
                }
            );
            assert_eq!(outcomes[1].job_id.as_deref(), Some("job-2"));
        }
        other => panic!("expected ChunksFailed, got {other:?}"),
    }
    assert!(!out.join("report.md").exists());
    assert!(!out.join("report_images").exists());
}

#[tokio::test]
async fn test_images_from_every_chunk_are_kept_apart() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("atlas.pdf");
    write_pdf(&pdf, 30);
    let out = dir.path().join("out");

    let service = Arc::new(FakeService::new().with_images(2));
    let config = config_with(Arc::clone(&service), 10, 5);
    let merged = process(pdf.to_str().unwrap(), &out, &config).await.unwrap();

    let image_dir = merged.merged_image_directory.clone().unwrap();
    assert_eq!(image_dir, out.join("atlas_images"));
    let mut names: Vec<String> = std::fs::read_dir(&image_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "chunk_1_img_1.jpg",
            "chunk_1_img_2.jpg",
            "chunk_2_img_1.jpg",
            "chunk_2_img_2.jpg",
            "chunk_3_img_1.jpg",
            "chunk_3_img_2.jpg",
        ]
    );
    assert_eq!(merged.stats.image_count, 6);
    assert_eq!(
        std::fs::read(image_dir.join("chunk_2_img_1.jpg")).unwrap(),
        b"img_1.jpg"
    );

    let md = std::fs::read_to_string(&merged.merged_document_path).unwrap();
    assert!(md.contains("![figure](atlas_images/chunk_3_img_2.jpg)"));
    assert!(!md.contains("](images/"));
}

#[tokio::test]
async fn test_merge_keeps_page_order_when_chunks_finish_backwards() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("novel.pdf");
    write_pdf(&pdf, 40);

    // Chunk 1 is the slowest, chunk 4 the fastest.
    let service =
        Arc::new(FakeService::new().with_delay(|seq| Duration::from_millis(80 - 20 * seq as u64)));
    let config = config_with(Arc::clone(&service), 10, 4);
    let merged = process(pdf.to_str().unwrap(), dir.path(), &config)
        .await
        .unwrap();

    let md = std::fs::read_to_string(&merged.merged_document_path).unwrap();
    let positions: Vec<usize> = (1..=4)
        .map(|i| {
            let needle = format!("# Part {i}\n");
            assert_eq!(md.matches(&needle).count(), 1);
            md.find(&needle).unwrap()
        })
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    assert_eq!(md.matches("\n\n---\n\n").count(), 3);

    let order: Vec<usize> = merged
        .chunk_outcomes
        .iter()
        .map(|o| o.sequence_index)
        .collect();
    assert_eq!(order, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_in_flight_chunks_never_exceed_concurrency() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("long.pdf");
    write_pdf(&pdf, 60);

    let service = Arc::new(FakeService::new().with_delay(|_| Duration::from_millis(30)));
    let config = config_with(Arc::clone(&service), 10, 2);
    process(pdf.to_str().unwrap(), dir.path(), &config)
        .await
        .unwrap();

    assert_eq!(service.submissions.load(Ordering::SeqCst), 6);
    assert_eq!(service.peak.load(Ordering::SeqCst), 2);
    assert_eq!(service.active.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_keep_intermediate_leaves_chunk_bundles() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("kept.pdf");
    write_pdf(&pdf, 20);

    let service = Arc::new(FakeService::new());
    let config = ProcessingConfig::builder()
        .service(service)
        .max_pages_per_chunk(10)
        .poll_interval_ms(10)
        .keep_intermediate(true)
        .build()
        .unwrap();
    process(pdf.to_str().unwrap(), dir.path(), &config)
        .await
        .unwrap();

    for i in 1..=2 {
        let chunk_dir = dir.path().join(format!("kept_chunks/chunk_{i}"));
        assert!(chunk_dir.join("full.md").is_file());
        assert!(!chunk_dir.join("result.zip").exists());
    }
}

#[tokio::test]
async fn test_stalled_chunk_times_out_without_cancelling_siblings() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("stuck.pdf");
    write_pdf(&pdf, 20);
    let out = dir.path().join("out");

    let service = Arc::new(FakeService::new().stalling(2));
    let config = ProcessingConfig::builder()
        .service(Arc::clone(&service) as Arc<dyn ParseService>)
        .max_pages_per_chunk(10)
        .poll_interval_ms(50)
        .poll_timeout_secs(1)
        .build()
        .unwrap();
    let err = process(pdf.to_str().unwrap(), &out, &config)
        .await
        .unwrap_err();

    let outcomes = err.chunk_outcomes().unwrap();
    assert!(outcomes[0].is_success());
    let error = outcomes[1].error.as_ref().unwrap();
    assert_eq!(error.stage(), Stage::Poll);
    assert_eq!(*error, ChunkError::PollTimeout { chunk: 2, secs: 1 });
    assert_eq!(outcomes[1].job_id.as_deref(), Some("job-2"));
    assert!(!out.join("stuck.md").exists());
}

#[tokio::test]
async fn test_slow_status_request_counts_against_the_chunk_budget() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("slow.pdf");
    write_pdf(&pdf, 20);

    let service = Arc::new(FakeService::new().with_delay(|seq| {
        if seq == 2 {
            Duration::from_secs(3)
        } else {
            Duration::from_millis(5)
        }
    }));
    let config = ProcessingConfig::builder()
        .service(Arc::clone(&service) as Arc<dyn ParseService>)
        .max_pages_per_chunk(10)
        .poll_interval_ms(200)
        .poll_timeout_secs(1)
        .build()
        .unwrap();
    let err = process(pdf.to_str().unwrap(), dir.path(), &config)
        .await
        .unwrap_err();

    let outcomes = err.chunk_outcomes().unwrap();
    assert!(outcomes[0].is_success());
    assert_eq!(outcomes[1].error.as_ref().unwrap().stage(), Stage::Poll);
    assert!(outcomes[1].duration_ms < 2_000, "{}ms", outcomes[1].duration_ms);
}

#[tokio::test]
async fn test_unreadable_bundle_is_a_materialization_failure() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("broken.pdf");
    write_pdf(&pdf, 20);
    let out = dir.path().join("out");

    let service = Arc::new(FakeService::new().corrupting(1));
    let config = config_with(Arc::clone(&service), 10, 5);
    let err = process(pdf.to_str().unwrap(), &out, &config)
        .await
        .unwrap_err();

    let outcomes = err.chunk_outcomes().unwrap();
    let error = outcomes[0].error.as_ref().unwrap();
    assert_eq!(error.stage(), Stage::Materialize);
    assert!(matches!(error, ChunkError::Materialization { chunk: 1, .. }));
    assert!(outcomes[1].is_success());
    assert!(!out.join("broken.md").exists());
    assert!(!out.join("broken_images").exists());
}

#[tokio::test]
async fn test_manifest_records_every_chunk() {
    let dir = tempdir().unwrap();
    let pdf = dir.path().join("ledger.pdf");
    write_pdf(&pdf, 20);
    let out = dir.path().join("out");

    // Failed document: the manifest survives so chunk 2 can be resubmitted.
    let service = Arc::new(FakeService::new().failing(2));
    let config = config_with(Arc::clone(&service), 10, 5);
    process(pdf.to_str().unwrap(), &out, &config)
        .await
        .unwrap_err();

    let text = std::fs::read_to_string(out.join("ledger_chunks.json")).unwrap();
    let manifest: ChunkManifest = serde_json::from_str(&text).unwrap();
    assert!(!manifest.complete);
    assert_eq!(manifest.chunks.len(), 2);
    assert_eq!(manifest.chunks[1].page_range.unwrap().to_string(), "11-20");
    assert_eq!(manifest.chunks[1].job_id.as_deref(), Some("job-2"));
    assert!(manifest.chunks[1].error.is_some());

    // Successful rerun overwrites it.
    let config = config_with(Arc::new(FakeService::new()), 10, 5);
    let merged = process(pdf.to_str().unwrap(), &out, &config).await.unwrap();
    assert_eq!(merged.manifest_path, out.join("ledger_chunks.json"));
    let manifest: ChunkManifest =
        serde_json::from_str(&std::fs::read_to_string(&merged.manifest_path).unwrap()).unwrap();
    assert!(manifest.complete);
    assert!(manifest.chunks.iter().all(|c| c.is_success()));
}

#[tokio::test]
async fn test_same_file_name_in_different_folders_keeps_both_outputs() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("a")).unwrap();
    std::fs::create_dir_all(dir.path().join("b")).unwrap();
    let first = dir.path().join("a/report.pdf");
    let second = dir.path().join("b/report.pdf");
    write_pdf(&first, 20);
    write_pdf(&second, 30);
    let out = dir.path().join("out");

    let config = config_with(Arc::new(FakeService::new()), 10, 5);
    let inputs = vec![
        first.to_string_lossy().into_owned(),
        second.to_string_lossy().into_owned(),
    ];
    let reports = process_many(&inputs, &out, &config).await.unwrap();

    let a = reports[0].result.as_ref().unwrap();
    let b = reports[1].result.as_ref().unwrap();
    assert_eq!(a.merged_document_path, out.join("report.md"));
    assert_eq!(b.merged_document_path, out.join("report_2.md"));

    let md_a = std::fs::read_to_string(&a.merged_document_path).unwrap();
    let md_b = std::fs::read_to_string(&b.merged_document_path).unwrap();
    assert_eq!(md_a.matches("# Part ").count(), 2);
    assert_eq!(md_b.matches("# Part ").count(), 3);
    assert!(out.join("report_chunks.json").is_file());
    assert!(out.join("report_2_chunks.json").is_file());
}

#[tokio::test]
async fn test_process_many_reports_in_input_order() {
    let dir = tempdir().unwrap();
    let good = dir.path().join("good.pdf");
    write_pdf(&good, 3);
    let missing = dir.path().join("missing.pdf");

    let service = Arc::new(FakeService::new());
    let config = config_with(Arc::clone(&service), 600, 5);
    let inputs = vec![
        missing.to_string_lossy().into_owned(),
        good.to_string_lossy().into_owned(),
    ];
    let reports = process_many(&inputs, dir.path().join("out"), &config)
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].input, inputs[0]);
    assert!(matches!(
        reports[0].result,
        Err(ProcessingError::Validation(ValidationError::NotFound { .. }))
    ));
    assert!(reports[1].result.is_ok());
    assert_eq!(service.submissions.load(Ordering::SeqCst), 1);
}

// ── Minimal HTTP server ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

struct Reply {
    status: u16,
    content_type: &'static str,
    /// Overrides the body length, for HEAD answers.
    content_length: Option<u64>,
    body: Vec<u8>,
}

impl Reply {
    fn json(value: serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            content_length: None,
            body: value.to_string().into_bytes(),
        }
    }

    fn bytes(content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            content_type,
            content_length: None,
            body,
        }
    }

    fn head(content_type: &'static str, length: u64) -> Self {
        Self {
            status: 200,
            content_type,
            content_length: Some(length),
            body: Vec::new(),
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            content_length: None,
            body: b"not found".to_vec(),
        }
    }
}

async fn read_request(sock: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = buf[header_end..].to_vec();
    while body.len() < length {
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(Request {
        method,
        path,
        headers,
        body,
    })
}

/// Serve `handler` on an ephemeral port; every request is recorded.
async fn serve<F>(handler: F) -> (SocketAddr, Arc<Mutex<Vec<Request>>>)
where
    F: Fn(&Request, SocketAddr) -> Reply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let recorded = Arc::clone(&log);
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let Some(req) = read_request(&mut sock).await else {
                    return;
                };
                let reply = handler(&req, addr);
                recorded.lock().unwrap().push(req.clone());

                let length = reply.content_length.unwrap_or(reply.body.len() as u64);
                let head = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.status, reply.content_type, length
                );
                let _ = sock.write_all(head.as_bytes()).await;
                if req.method != "HEAD" {
                    let _ = sock.write_all(&reply.body).await;
                }
                let _ = sock.shutdown().await;
            });
        }
    });
    (addr, log)
}

// ── Validation against a live HEAD endpoint ──────────────────────────────────────────

#[tokio::test]
async fn test_url_without_extension_or_known_type_is_rejected_before_submission() {
    let (addr, _) = serve(|req, _| match (req.method.as_str(), req.path.as_str()) {
        ("HEAD", "/download") => Reply::head("application/octet-stream", 2048),
        _ => Reply::not_found(),
    })
    .await;

    let service = Arc::new(FakeService::new());
    let config = config_with(Arc::clone(&service), 600, 5);
    let dir = tempdir().unwrap();
    let err = process(format!("http://{addr}/download"), dir.path(), &config)
        .await
        .unwrap_err();

    assert!(
        matches!(
            err,
            ProcessingError::Validation(ValidationError::UnsupportedFormat { .. })
        ),
        "{err:?}"
    );
    assert_eq!(service.submissions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_url_content_type_resolves_format() {
    let (addr, _) = serve(|req, _| match req.method.as_str() {
        "HEAD" => Reply::head("application/pdf; charset=binary", 4096),
        _ => Reply::not_found(),
    })
    .await;

    let config = config_with(Arc::new(FakeService::new()), 600, 5);
    let plan = plan_document(format!("http://{addr}/files/12345"), &config)
        .await
        .unwrap();

    assert_eq!(plan.descriptor.size_bytes, 4096);
    assert!(plan.descriptor.is_remote);
    assert_eq!(plan.descriptor.page_count, None);
    assert_eq!(plan.chunks.len(), 1);
    assert_eq!(plan.chunks[0].page_range, None);
}

#[tokio::test]
async fn test_failed_head_request_is_a_validation_error() {
    let (addr, _) = serve(|_, _| Reply::not_found()).await;

    let config = config_with(Arc::new(FakeService::new()), 600, 5);
    let err = plan_document(format!("http://{addr}/gone.pdf"), &config)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessingError::Validation(ValidationError::ProbeFailed { .. })
    ));
}

// ── HTTP client against the wire format ──────────────────────────────────────

fn mineru_handler(req: &Request, addr: SocketAddr) -> Reply {
    let path = req.path.as_str();
    match req.method.as_str() {
        "POST" if path == "/api/v4/file-urls/batch" => {
            let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
            let range = body["files"][0]["page_ranges"].as_str().unwrap_or("all");
            let id = format!("batch-{}", range.split('-').next().unwrap_or("0"));
            Reply::json(serde_json::json!({
                "code": 0,
                "msg": "ok",
                "data": {
                    "batch_id": id,
                    "file_urls": [format!("http://{addr}/upload/{id}")],
                },
            }))
        }
        "PUT" if path.starts_with("/upload/") => Reply::bytes("text/plain", Vec::new()),
        "GET" if path.starts_with("/api/v4/extract-results/batch/") => {
            let id = path.rsplit('/').next().unwrap();
            Reply::json(serde_json::json!({
                "code": 0,
                "msg": "ok",
                "data": {
                    "batch_id": id,
                    "extract_result": [{
                        "file_name": "slides.pdf",
                        "state": "done",
                        "err_msg": "",
                        "full_zip_url": format!("http://{addr}/bundles/{id}.zip"),
                    }],
                },
            }))
        }
        "GET" if path.starts_with("/bundles/") => {
            let id = path
                .trim_start_matches("/bundles/")
                .trim_end_matches(".zip")
                .to_string();
            let images = vec!["fig.png".to_string()];
            let md = format!("From {id}\n\n![x](images/fig.png)\n");
            Reply::bytes("application/zip", bundle_zip(&md, &images))
        }
        _ => Reply::not_found(),
    }
}

#[tokio::test]
async fn test_http_client_uploads_polls_and_downloads_each_chunk() {
    let (addr, log) = serve(mineru_handler).await;

    let dir = tempdir().unwrap();
    let pdf = dir.path().join("slides.pdf");
    write_pdf(&pdf, 3);
    let out = dir.path().join("out");

    let config = ProcessingConfig::builder()
        .base_url(format!("http://{addr}/api/v4/"))
        .token("secret-token")
        .max_pages_per_chunk(2)
        .poll_interval_ms(10)
        .poll_timeout_secs(5)
        .build()
        .unwrap();
    let merged = process(pdf.to_str().unwrap(), &out, &config).await.unwrap();

    let md = std::fs::read_to_string(&merged.merged_document_path).unwrap();
    assert!(md.find("From batch-1").unwrap() < md.find("From batch-2").unwrap());
    assert!(md.contains("![x](slides_images/chunk_1_fig.png)"));
    assert!(md.contains("![x](slides_images/chunk_2_fig.png)"));
    assert!(out.join("slides_images/chunk_2_fig.png").is_file());

    let requests = log.lock().unwrap().clone();
    for req in &requests {
        let auth = req.headers.get("authorization");
        if req.path.starts_with("/api/v4/") {
            assert_eq!(auth.map(String::as_str), Some("Bearer secret-token"));
        } else {
            // Pre-signed upload and bundle URLs never see the token.
            assert!(auth.is_none(), "{} {} carried auth", req.method, req.path);
        }
    }

    let mut uploads: Vec<&Request> = requests.iter().filter(|r| r.method == "PUT").collect();
    uploads.sort_by_key(|r| r.path.clone());
    assert_eq!(uploads.len(), 2);
    let original = std::fs::read(&pdf).unwrap();
    assert!(uploads.iter().all(|r| r.body == original));

    let submitted: Vec<serde_json::Value> = requests
        .iter()
        .filter(|r| r.method == "POST")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    let mut ranges: Vec<&str> = submitted
        .iter()
        .map(|b| b["files"][0]["page_ranges"].as_str().unwrap())
        .collect();
    ranges.sort();
    assert_eq!(ranges, vec!["1-1", "2-3"]);
    assert!(submitted.iter().all(|b| b["model_version"] == "vlm"));
}

#[tokio::test]
async fn test_http_client_surfaces_rejected_submission() {
    let (addr, _) = serve(|req, _| match req.method.as_str() {
        "POST" => Reply::json(serde_json::json!({
            "code": -60005,
            "msg": "file size exceeds limit",
            "data": null,
        })),
        _ => Reply::not_found(),
    })
    .await;

    let dir = tempdir().unwrap();
    let pdf = dir.path().join("big.pdf");
    write_pdf(&pdf, 1);

    let config = ProcessingConfig::builder()
        .base_url(format!("http://{addr}/api/v4"))
        .token("t")
        .poll_interval_ms(10)
        .build()
        .unwrap();
    let err = process(pdf.to_str().unwrap(), dir.path(), &config)
        .await
        .unwrap_err();

    let outcomes = err.chunk_outcomes().unwrap();
    assert_eq!(outcomes.len(), 1);
    let error = outcomes[0].error.as_ref().unwrap();
    assert_eq!(error.stage(), Stage::Submit);
    assert!(error.to_string().contains("file size exceeds limit"), "{error}");
    assert!(outcomes[0].job_id.is_none());
}
