//! Result materialization: download a finished job's bundle, extract it and
//! locate the Markdown output and the `images` directory.
//!
//! Bundle layout as produced by the service:
//!
//! ```text
//! result.zip
//! ├── full.md            ← canonical Markdown
//! ├── images/            ← referenced as images/<name> from full.md
//! ├── *_content_list.json
//! └── layout.json
//! ```
//!
//! The archive is streamed to `<dest>/result.zip`, extracted next to itself
//! and deleted. The Markdown file is the first `*.md` of a name-sorted walk;
//! a bundle with several Markdown files is accepted with a warning.

use crate::client::ParseService;
use crate::error::MaterializeError;
use crate::output::{JobState, MaterializedResult, RemoteJob};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const ARCHIVE_NAME: &str = "result.zip";

/// Download, extract and index the bundle of a `Done` job into `dest`.
pub async fn materialize(
    service: &dyn ParseService,
    job: &RemoteJob,
    dest: &Path,
) -> Result<MaterializedResult, MaterializeError> {
    let url = match (&job.state, &job.result_bundle_url) {
        (JobState::Done, Some(url)) => url.clone(),
        _ => {
            return Err(MaterializeError::NotDone {
                job_id: job.job_id.clone(),
            })
        }
    };

    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|source| MaterializeError::Io {
            path: dest.to_path_buf(),
            source,
        })?;

    let archive = dest.join(ARCHIVE_NAME);
    let bytes = service.download_bundle(&url, &archive).await?;
    debug!("Bundle for {}: {} bytes", job.job_id, bytes);

    let dir = dest.to_path_buf();
    let result = tokio::task::spawn_blocking(move || extract_and_locate(&archive, &dir))
        .await
        .map_err(|e| MaterializeError::Extract {
            path: dest.join(ARCHIVE_NAME),
            detail: format!("extraction task panicked: {}", e),
        })??;

    info!(
        "Materialized {} → {}",
        job.job_id,
        result.markdown_path.display()
    );
    Ok(result)
}

/// Blocking half of [`materialize`]: unzip `archive` into `dir`, delete it,
/// then locate the outputs.
pub fn extract_and_locate(archive: &Path, dir: &Path) -> Result<MaterializedResult, MaterializeError> {
    let extract_err = |detail: String| MaterializeError::Extract {
        path: archive.to_path_buf(),
        detail,
    };
    let file = std::fs::File::open(archive).map_err(|source| MaterializeError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| extract_err(e.to_string()))?;
    zip.extract(dir).map_err(|e| extract_err(e.to_string()))?;
    drop(zip);

    if let Err(e) = std::fs::remove_file(archive) {
        warn!("Could not delete {}: {}", archive.display(), e);
    }

    locate_outputs(dir)
}

/// Find the Markdown file and the `images` directory in an extracted bundle.
pub fn locate_outputs(dir: &Path) -> Result<MaterializedResult, MaterializeError> {
    let markdown: Vec<PathBuf> = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|x| x.to_str())
                .is_some_and(|x| x.eq_ignore_ascii_case("md"))
        })
        .collect();

    let markdown_path = markdown
        .first()
        .cloned()
        .ok_or_else(|| MaterializeError::NoMarkdown {
            dir: dir.to_path_buf(),
        })?;
    if markdown.len() > 1 {
        warn!(
            "{} Markdown files under {}; using {}",
            markdown.len(),
            dir.display(),
            markdown_path.display()
        );
    }

    let beside = markdown_path
        .parent()
        .map(|p| p.join("images"))
        .filter(|p| p.is_dir());
    let images_dir = beside.or_else(|| Some(dir.join("images")).filter(|p| p.is_dir()));

    Ok(MaterializedResult {
        chunk_dir: dir.to_path_buf(),
        markdown_path,
        images_dir,
    })
}
