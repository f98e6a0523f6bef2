//! Input validation: turn a user-supplied path or URL into a
//! [`DocumentDescriptor`], or reject it before any job is submitted.
//!
//! Local files are checked in this order: existence, regular file, read
//! permission, emptiness, size ceiling, format. URLs get one `HEAD` probe
//! bounded by a short timeout; the probe supplies the size (`Content-Length`)
//! and, when the URL path has no recognised extension, the format
//! (`Content-Type`). Remote documents are never introspected for pages.

use crate::error::ValidationError;
use crate::output::{DocumentDescriptor, DocumentFormat};
use crate::pipeline::inspect;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Limits applied during validation.
#[derive(Debug, Clone, Copy)]
pub struct ValidationLimits {
    pub max_file_bytes: u64,
    pub probe_timeout: Duration,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: crate::config::DEFAULT_MAX_FILE_BYTES,
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Validate a local path or URL.
pub async fn validate(
    location: &str,
    limits: &ValidationLimits,
) -> Result<DocumentDescriptor, ValidationError> {
    if is_url(location) {
        validate_url(location, limits).await
    } else {
        validate_local(Path::new(location), limits).await
    }
}

/// Validate a local file and count its pages where the format allows.
pub async fn validate_local(
    path: &Path,
    limits: &ValidationLimits,
) -> Result<DocumentDescriptor, ValidationError> {
    let (size_bytes, format) = check_local(path, limits.max_file_bytes)?;
    let page_count = inspect::page_count(path, format).await;

    let descriptor = DocumentDescriptor {
        location: path.to_string_lossy().into_owned(),
        display_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string()),
        size_bytes,
        format,
        page_count,
        is_remote: false,
    };
    info!(
        "Validated {} ({}, {} bytes, pages: {})",
        descriptor.display_name,
        format,
        size_bytes,
        page_count.map_or_else(|| "unknown".to_string(), |p| p.to_string())
    );
    Ok(descriptor)
}

/// Filesystem checks shared by [`validate_local`]; returns size and format.
fn check_local(path: &Path, max_file_bytes: u64) -> Result<(u64, DocumentFormat), ValidationError> {
    let owned = || PathBuf::from(path);

    let meta = std::fs::metadata(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ValidationError::PermissionDenied { path: owned() },
        _ => ValidationError::NotFound { path: owned() },
    })?;
    if !meta.is_file() {
        return Err(ValidationError::NotAFile { path: owned() });
    }

    // Opening is the only portable read-permission check.
    if let Err(e) = std::fs::File::open(path) {
        return Err(match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                ValidationError::PermissionDenied { path: owned() }
            }
            _ => ValidationError::NotFound { path: owned() },
        });
    }

    let size = meta.len();
    if size == 0 {
        return Err(ValidationError::Empty { path: owned() });
    }
    if size > max_file_bytes {
        return Err(ValidationError::TooLarge {
            location: path.display().to_string(),
            size_bytes: size,
            limit_bytes: max_file_bytes,
        });
    }

    let format = DocumentFormat::from_path(path).ok_or_else(|| {
        ValidationError::UnsupportedFormat {
            location: path.display().to_string(),
            detail: match path.extension() {
                Some(ext) => format!("extension '.{}'", ext.to_string_lossy()),
                None => "no file extension".to_string(),
            },
        }
    })?;
    Ok((size, format))
}

/// Validate a URL with a single `HEAD` probe.
pub async fn validate_url(
    url: &str,
    limits: &ValidationLimits,
) -> Result<DocumentDescriptor, ValidationError> {
    let probe_failed = |reason: String| ValidationError::ProbeFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(limits.probe_timeout)
        .build()
        .map_err(|e| probe_failed(e.to_string()))?;

    debug!("HEAD {}", url);
    let response = client.head(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ValidationError::ProbeTimeout {
                url: url.to_string(),
                secs: limits.probe_timeout.as_secs(),
            }
        } else {
            probe_failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(probe_failed(format!("HTTP {}", response.status())));
    }

    let headers = response.headers();
    // `Response::content_length` reports the (empty) HEAD body, not the header.
    let size_bytes = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if size_bytes > limits.max_file_bytes {
        return Err(ValidationError::TooLarge {
            location: url.to_string(),
            size_bytes,
            limit_bytes: limits.max_file_bytes,
        });
    }

    let format = resolve_remote_format(url, content_type).ok_or_else(|| {
        ValidationError::UnsupportedFormat {
            location: url.to_string(),
            detail: if content_type.is_empty() {
                "no recognised extension and no content type".to_string()
            } else {
                format!("no recognised extension; content type '{}'", content_type)
            },
        }
    })?;

    let descriptor = DocumentDescriptor {
        location: url.to_string(),
        display_name: url_file_name(url),
        size_bytes,
        format,
        page_count: None,
        is_remote: true,
    };
    info!(
        "Validated {} ({}, {} bytes, remote)",
        descriptor.location, format, size_bytes
    );
    Ok(descriptor)
}

/// Format of a remote resource: the URL path's extension first, then the
/// declared content type.
pub fn resolve_remote_format(url: &str, content_type: &str) -> Option<DocumentFormat> {
    url_path_extension(url)
        .and_then(|ext| DocumentFormat::from_extension(&ext))
        .or_else(|| DocumentFormat::from_content_type(content_type))
}

/// Extension of the last path segment, ignoring query and fragment.
fn url_path_extension(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?.to_string();
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_string())
    }
}

fn url_file_name(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}
