//! Page-count introspection for local documents.
//!
//! | Format | Source | Exact? |
//! |--------|--------|--------|
//! | PDF    | page tree via `lopdf` | yes |
//! | PPTX   | `<p:sldId>` entries in `ppt/presentation.xml` | yes |
//! | DOCX   | `<w:p>` paragraphs in `word/document.xml`, five per page | estimate |
//!
//! Everything else (legacy `.doc`/`.ppt`, images, HTML) has no page count.
//! A file that cannot be parsed also yields `None`: the document is then
//! submitted whole and the service decides.

use crate::output::DocumentFormat;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Paragraphs assumed per page when estimating DOCX length.
pub const DOCX_PARAGRAPHS_PER_PAGE: usize = 5;

/// Count pages off the async runtime.
pub async fn page_count(path: &Path, format: DocumentFormat) -> Option<usize> {
    let path: PathBuf = path.to_path_buf();
    match tokio::task::spawn_blocking(move || page_count_blocking(&path, format)).await {
        Ok(count) => count,
        Err(e) => {
            warn!("Page-count task panicked: {}", e);
            None
        }
    }
}

/// Blocking implementation of [`page_count`].
pub fn page_count_blocking(path: &Path, format: DocumentFormat) -> Option<usize> {
    let result = match format {
        DocumentFormat::Pdf => pdf_pages(path),
        DocumentFormat::Pptx => pptx_slides(path),
        DocumentFormat::Docx => docx_estimated_pages(path),
        _ => return None,
    };
    match result {
        Ok(count) if count > 0 => {
            debug!("{}: {} page(s)", path.display(), count);
            Some(count)
        }
        Ok(_) => None,
        Err(detail) => {
            warn!("Could not count pages of {}: {}", path.display(), detail);
            None
        }
    }
}

fn pdf_pages(path: &Path) -> Result<usize, String> {
    let doc = lopdf::Document::load(path).map_err(|e| e.to_string())?;
    Ok(doc.get_pages().len())
}

fn pptx_slides(path: &Path) -> Result<usize, String> {
    let xml = read_zip_entry(path, "ppt/presentation.xml")?;
    count_elements(&xml, |name, local| name == b"p:sldId" || local == b"sldId")
}

fn docx_estimated_pages(path: &Path) -> Result<usize, String> {
    let xml = read_zip_entry(path, "word/document.xml")?;
    let paragraphs = count_elements(&xml, |name, _| name == b"w:p")?;
    Ok((paragraphs / DOCX_PARAGRAPHS_PER_PAGE).max(1))
}

fn read_zip_entry(path: &Path, entry: &str) -> Result<String, String> {
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| e.to_string())?;
    let mut part = archive
        .by_name(entry)
        .map_err(|e| format!("{}: {}", entry, e))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml).map_err(|e| e.to_string())?;
    Ok(xml)
}

/// Count start and self-closing elements accepted by `matches(qualified, local)`.
fn count_elements(xml: &str, matches: impl Fn(&[u8], &[u8]) -> bool) -> Result<usize, String> {
    let mut reader = Reader::from_str(xml);
    let mut count = 0usize;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if matches(e.name().as_ref(), e.local_name().as_ref()) {
                    count += 1;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(format!(
                    "XML error at byte {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
        }
    }
    Ok(count)
}
