//! Merging chunk outputs into one Markdown document and one image directory.
//!
//! Each chunk's bundle references its pictures as `images/<name>`. After
//! merging, pictures live in a single `<stem>_images/` directory as
//! `chunk_<i>_<name>`, and every reference in chunk `i`'s Markdown is
//! rewritten to match, so the merged document renders from its own folder.
//!
//! Two chunks producing the same file name after prefixing is not expected
//! (the prefix carries the chunk index); should it happen, the later copy
//! overwrites the earlier one and a warning is logged.

use crate::config::ChunkSeparator;
use crate::output::PageRange;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::io;
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Markdown image target: `![alt](images/name.jpg)`. Only the file name is
/// captured, since [`merge_images`] flattens nested folders.
static MD_IMAGE_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(!\[[^\]]*\]\()(?:\./)?images/(?:[^)\s]*/)?([^)\s/]+)"#).unwrap()
});

/// HTML image source inside tables: `<img src="images/name.jpg">`.
static HTML_IMAGE_SRC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(src=["'])(?:\./)?images/(?:[^"']*/)?([^"'/]+)"#).unwrap());

/// One chunk's Markdown, ready to merge.
#[derive(Debug, Clone)]
pub struct ChunkMarkdown {
    pub sequence_index: usize,
    pub page_range: Option<PageRange>,
    pub markdown: String,
}

/// File-name prefix given to chunk `sequence_index`'s images.
pub fn image_prefix(sequence_index: usize) -> String {
    format!("chunk_{}_", sequence_index)
}

/// Point every `images/<name>` reference at `<image_dir_name>/chunk_<i>_<name>`.
pub fn rewrite_image_links(markdown: &str, sequence_index: usize, image_dir_name: &str) -> String {
    let prefix = image_prefix(sequence_index);
    let replace = |caps: &Captures| format!("{}{}/{}{}", &caps[1], image_dir_name, prefix, &caps[2]);
    let pass = MD_IMAGE_LINK.replace_all(markdown, replace);
    HTML_IMAGE_SRC.replace_all(&pass, replace).into_owned()
}

/// Concatenate chunks in ascending sequence order with `separator` between them.
///
/// Input order does not matter; outputs are sorted by `sequence_index`.
pub fn merge_markdown(chunks: &[ChunkMarkdown], separator: &ChunkSeparator) -> String {
    let mut ordered: Vec<&ChunkMarkdown> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.sequence_index);

    let mut merged = String::with_capacity(chunks.iter().map(|c| c.markdown.len() + 32).sum());
    for (i, chunk) in ordered.iter().enumerate() {
        if i > 0 {
            merged.push_str(&separator.render(chunk.sequence_index, chunk.page_range));
        }
        merged.push_str(chunk.markdown.trim_matches('\n'));
    }
    merged.push('\n');
    merged
}

/// Copy every file of `source` into `target` as `chunk_<i>_<name>`.
///
/// Nested directories are flattened. Returns the number of files copied.
pub fn merge_images(source: &Path, sequence_index: usize, target: &Path) -> io::Result<usize> {
    std::fs::create_dir_all(target)?;
    let prefix = image_prefix(sequence_index);
    let mut copied = 0;

    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let dest = target.join(format!("{}{}", prefix, name));
        if dest.exists() {
            warn!("Overwriting {}: duplicate image name", dest.display());
        }
        std::fs::copy(entry.path(), &dest)?;
        copied += 1;
    }

    debug!(
        "Copied {} image(s) from {} into {}",
        copied,
        source.display(),
        target.display()
    );
    Ok(copied)
}

/// Write `contents` to `path` via a sibling temp file and a rename.
pub async fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await
}
