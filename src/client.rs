//! Remote job client for the MinerU v4 REST API.
//!
//! [`ParseService`] is the seam the coordinator talks to; [`MineruClient`]
//! is the HTTP implementation. Tests inject their own `ParseService` through
//! [`crate::config::ProcessingConfigBuilder::service`].
//!
//! Two submission paths exist because the service has two job kinds:
//!
//! * **URL task**: `POST /extract/task` with the document URL, then
//!   `GET /extract/task/{task_id}`.
//! * **Upload batch**: `POST /file-urls/batch` returns a pre-signed upload
//!   URL, the raw bytes are `PUT` there (no auth header), then
//!   `GET /extract-results/batch/{batch_id}`.
//!
//! Every API response is wrapped in `{code, msg, data}`; a non-zero `code`
//! is a rejection even when the HTTP status is 200.

use crate::config::{ParseOptions, ProcessingConfig};
use crate::credentials::{pick_credential, CredentialStore};
use crate::error::ServiceError;
use crate::output::{ChunkSpec, JobKind, JobProgress, JobState, RemoteJob};
use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Operations the coordinator needs from a remote parsing service.
///
/// `options` passed to [`submit`](Self::submit) are already adjusted for the
/// chunk's format and page range (see [`ParseOptions::effective_for`]).
#[async_trait]
pub trait ParseService: Send + Sync {
    /// Create one remote job for `chunk`.
    async fn submit(
        &self,
        chunk: &ChunkSpec,
        options: &ParseOptions,
    ) -> Result<RemoteJob, ServiceError>;

    /// Fetch the current state of `job`. Never mutates `job`.
    async fn poll(&self, job: &RemoteJob) -> Result<RemoteJob, ServiceError>;

    /// Stream the result bundle at `url` into the file `dest`; returns bytes written.
    async fn download_bundle(&self, url: &str, dest: &Path) -> Result<u64, ServiceError>;
}

/// HTTP client for the hosted MinerU service.
pub struct MineruClient {
    api: reqwest::Client,
    transfer: reqwest::Client,
    base_url: String,
    credentials: CredentialStore,
}

impl std::fmt::Debug for MineruClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MineruClient")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials.len())
            .finish()
    }
}

impl MineruClient {
    /// Build a client. `api_timeout` bounds ordinary API calls;
    /// `transfer_timeout` bounds uploads and bundle downloads.
    pub fn new(
        base_url: impl Into<String>,
        credentials: CredentialStore,
        api_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Result<Self, ServiceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if credentials.is_empty() {
            return Err(ServiceError::Protocol {
                endpoint: base_url,
                detail: "credential pool is empty".into(),
            });
        }
        let build = |timeout: Duration| {
            reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| ServiceError::Transport {
                    endpoint: "client".into(),
                    reason: e.to_string(),
                })
        };
        Ok(Self {
            api: build(api_timeout)?,
            transfer: build(transfer_timeout)?,
            base_url,
            credentials,
        })
    }

    /// Build a client from the timeouts and base URL in `config`.
    pub fn from_config(
        config: &ProcessingConfig,
        credentials: CredentialStore,
    ) -> Result<Self, ServiceError> {
        Self::new(
            config.base_url.clone(),
            credentials,
            Duration::from_secs(config.request_timeout_secs),
            Duration::from_secs(config.transfer_timeout_secs),
        )
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn bearer(&self, endpoint: &str) -> Result<&str, ServiceError> {
        pick_credential(self.credentials.credentials())
            .map(|c| c.token.as_str())
            .ok_or_else(|| ServiceError::Protocol {
                endpoint: endpoint.to_string(),
                detail: "credential pool is empty".into(),
            })
    }

    async fn submit_url(
        &self,
        url: &str,
        options: &ParseOptions,
    ) -> Result<RemoteJob, ServiceError> {
        let endpoint = self.endpoint("extract/task");
        let body = TaskRequest {
            url,
            model_version: options.model_version.as_str(),
            is_ocr: options.ocr_enabled(),
            enable_formula: options.enable_formula,
            enable_table: options.enable_table,
            language: options.language.as_deref(),
            page_ranges: options.page_ranges.as_deref(),
        };
        debug!("POST {} url={} pages={:?}", endpoint, url, body.page_ranges);

        let request = self
            .api
            .post(&endpoint)
            .bearer_auth(self.bearer(&endpoint)?)
            .json(&body);
        let created: TaskCreated = send_enveloped(request, &endpoint).await?;
        info!("Task {} created for {}", created.task_id, url);
        Ok(RemoteJob::submitted(created.task_id, JobKind::Task))
    }

    async fn submit_upload(
        &self,
        chunk: &ChunkSpec,
        options: &ParseOptions,
    ) -> Result<RemoteJob, ServiceError> {
        let endpoint = self.endpoint("file-urls/batch");
        let source = &chunk.source;
        let body = BatchRequest {
            files: vec![BatchFile {
                name: &source.display_name,
                is_ocr: options.ocr_enabled(),
                page_ranges: options.page_ranges.as_deref(),
            }],
            model_version: options.model_version.as_str(),
            enable_formula: options.enable_formula,
            enable_table: options.enable_table,
            language: options.language.as_deref(),
        };
        debug!(
            "POST {} name={} pages={:?}",
            endpoint, source.display_name, options.page_ranges
        );

        let request = self
            .api
            .post(&endpoint)
            .bearer_auth(self.bearer(&endpoint)?)
            .json(&body);
        let created: BatchCreated = send_enveloped(request, &endpoint).await?;
        let upload_url = created
            .file_urls
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Protocol {
                endpoint: endpoint.clone(),
                detail: "no upload URL returned".into(),
            })?;

        let bytes = tokio::fs::read(&source.location)
            .await
            .map_err(|e| ServiceError::Io {
                path: source.location.clone().into(),
                source: e,
            })?;
        let size = bytes.len();

        // Pre-signed URL: must not carry the bearer header.
        let response = self
            .transfer
            .put(&upload_url)
            .body(bytes)
            .send()
            .await
            .map_err(|e| transport("upload", e))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status {
                endpoint: "upload".into(),
                status,
                body: truncate(&body),
            });
        }

        info!(
            "Batch {} uploaded {} ({} bytes)",
            created.batch_id, source.display_name, size
        );
        Ok(RemoteJob::submitted(created.batch_id, JobKind::Batch))
    }
}

#[async_trait]
impl ParseService for MineruClient {
    async fn submit(
        &self,
        chunk: &ChunkSpec,
        options: &ParseOptions,
    ) -> Result<RemoteJob, ServiceError> {
        if chunk.source.is_remote {
            self.submit_url(&chunk.source.location, options).await
        } else {
            self.submit_upload(chunk, options).await
        }
    }

    async fn poll(&self, job: &RemoteJob) -> Result<RemoteJob, ServiceError> {
        let endpoint = match job.kind {
            JobKind::Task => self.endpoint(&format!("extract/task/{}", job.job_id)),
            JobKind::Batch => self.endpoint(&format!("extract-results/batch/{}", job.job_id)),
        };
        let request = self.api.get(&endpoint).bearer_auth(self.bearer(&endpoint)?);

        let status = match job.kind {
            JobKind::Task => send_enveloped::<ExtractStatus>(request, &endpoint).await?,
            JobKind::Batch => {
                let batch: BatchStatus = send_enveloped(request, &endpoint).await?;
                batch
                    .extract_result
                    .into_iter()
                    .next()
                    .ok_or_else(|| ServiceError::Protocol {
                        endpoint: endpoint.clone(),
                        detail: "batch has no extract_result entry".into(),
                    })?
            }
        };

        let state = parse_state(&status.state);
        debug!("{:?} {} → {:?}", job.kind, job.job_id, state);
        let progress = status.extract_progress.map(|p| JobProgress {
            processed_units: p.extracted_pages,
            total_units: p.total_pages,
        });
        let refreshed = job.with_status(state, progress, status.full_zip_url, status.err_msg);

        if state == JobState::Done && refreshed.result_bundle_url.is_none() {
            return Err(ServiceError::Protocol {
                endpoint,
                detail: "job is done but has no full_zip_url".into(),
            });
        }
        Ok(refreshed)
    }

    async fn download_bundle(&self, url: &str, dest: &Path) -> Result<u64, ServiceError> {
        let response = self
            .transfer
            .get(url)
            .send()
            .await
            .map_err(|e| transport(url, e))?;
        if !response.status().is_success() {
            return Err(ServiceError::Status {
                endpoint: url.to_string(),
                status: response.status().as_u16(),
                body: String::new(),
            });
        }

        let io_err = |source| ServiceError::Io {
            path: dest.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io_err)?;
        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transport(url, e))?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        debug!("Downloaded {} bytes → {}", written, dest.display());
        Ok(written)
    }
}

// ── Wire helpers ─────────────────────────────────────────────────────────

/// Map a wire state onto [`JobState`]. Unknown states count as running so
/// polling continues until the policy's timeout.
pub(crate) fn parse_state(state: &str) -> JobState {
    match state {
        "done" => JobState::Done,
        "failed" => JobState::Failed,
        "running" | "converting" => JobState::Running,
        "pending" | "waiting-file" => JobState::Pending,
        other => {
            warn!("Unknown job state '{}', treating as running", other);
            JobState::Running
        }
    }
}

async fn send_enveloped<T: DeserializeOwned>(
    request: reqwest::RequestBuilder,
    endpoint: &str,
) -> Result<T, ServiceError> {
    let response = request.send().await.map_err(|e| transport(endpoint, e))?;
    let status = response.status();
    let text = response.text().await.map_err(|e| transport(endpoint, e))?;
    if !status.is_success() {
        return Err(ServiceError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: truncate(&text),
        });
    }
    decode_envelope(&text, endpoint)
}

pub(crate) fn decode_envelope<T: DeserializeOwned>(
    text: &str,
    endpoint: &str,
) -> Result<T, ServiceError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| ServiceError::Protocol {
        endpoint: endpoint.to_string(),
        detail: e.to_string(),
    })?;
    let code = envelope_code(&envelope.code);
    if code != 0 {
        return Err(ServiceError::Rejected {
            endpoint: endpoint.to_string(),
            code,
            message: envelope.msg,
        });
    }
    let data = envelope.data.ok_or_else(|| ServiceError::Protocol {
        endpoint: endpoint.to_string(),
        detail: "missing data".into(),
    })?;
    serde_json::from_value(data).map_err(|e| ServiceError::Protocol {
        endpoint: endpoint.to_string(),
        detail: e.to_string(),
    })
}

/// `code` arrives as a number, occasionally as a string; anything else is a rejection.
fn envelope_code(code: &Value) -> i64 {
    match code {
        Value::Number(n) => n.as_i64().unwrap_or(-1),
        Value::String(s) => s.trim().parse().unwrap_or(-1),
        _ => -1,
    }
}

fn transport(endpoint: &str, e: reqwest::Error) -> ServiceError {
    let reason = if e.is_timeout() {
        format!("timed out ({})", e)
    } else {
        e.to_string()
    };
    ServiceError::Transport {
        endpoint: endpoint.to_string(),
        reason,
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 512;
    if body.len() <= LIMIT {
        return body.to_string();
    }
    let mut end = LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Value,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Option<Value>,
}

#[derive(Serialize)]
struct TaskRequest<'a> {
    url: &'a str,
    model_version: &'a str,
    is_ocr: bool,
    enable_formula: bool,
    enable_table: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_ranges: Option<&'a str>,
}

#[derive(Deserialize)]
struct TaskCreated {
    task_id: String,
}

#[derive(Serialize)]
struct BatchRequest<'a> {
    files: Vec<BatchFile<'a>>,
    model_version: &'a str,
    enable_formula: bool,
    enable_table: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

#[derive(Serialize)]
struct BatchFile<'a> {
    name: &'a str,
    is_ocr: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_ranges: Option<&'a str>,
}

#[derive(Deserialize)]
struct BatchCreated {
    batch_id: String,
    #[serde(default)]
    file_urls: Vec<String>,
}

#[derive(Deserialize)]
struct BatchStatus {
    #[serde(default)]
    extract_result: Vec<ExtractStatus>,
}

#[derive(Deserialize)]
struct ExtractStatus {
    state: String,
    #[serde(default)]
    full_zip_url: Option<String>,
    #[serde(default)]
    err_msg: Option<String>,
    #[serde(default)]
    extract_progress: Option<WireProgress>,
}

#[derive(Deserialize)]
struct WireProgress {
    #[serde(default)]
    extracted_pages: u64,
    #[serde(default)]
    total_pages: u64,
}
