//! Chunk planning: partition a document into page-range chunks no larger
//! than the service accepts.
//!
//! ## Splitting rule
//!
//! ```text
//! n      = ceil(pages / max_pages)            (page constraint only)
//! n      = max(ceil(pages / max_pages),
//!              ceil(size  / max_bytes))       (with a byte ceiling; ≤ pages)
//! base   = pages / n
//! extra  = pages % n                          → the last `extra` chunks get base + 1
//! ```
//!
//! Chunks are as equal as integers allow and none exceeds `max_pages`:
//! 650 pages at 600 per chunk plan as `1-325, 326-650`, not `1-600, 601-650`.

use crate::output::{ChunkSpec, DocumentDescriptor, PageRange};
use std::sync::Arc;
use tracing::info;

/// Splits descriptors into [`ChunkSpec`]s.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlanner {
    pub max_pages_per_chunk: usize,
    pub max_bytes_per_chunk: Option<u64>,
}

impl Default for ChunkPlanner {
    fn default() -> Self {
        Self {
            max_pages_per_chunk: crate::config::DEFAULT_MAX_PAGES_PER_CHUNK,
            max_bytes_per_chunk: None,
        }
    }
}

impl ChunkPlanner {
    pub fn new(max_pages_per_chunk: usize) -> Self {
        Self {
            max_pages_per_chunk: max_pages_per_chunk.max(1),
            max_bytes_per_chunk: None,
        }
    }

    pub fn with_byte_limit(mut self, max_bytes: u64) -> Self {
        self.max_bytes_per_chunk = Some(max_bytes.max(1));
        self
    }

    /// Plan the chunks of `descriptor`, in ascending page order.
    ///
    /// Documents without a page count (remote, images, HTML, legacy Office)
    /// and documents within the limits yield one whole-document chunk.
    pub fn plan(&self, descriptor: Arc<DocumentDescriptor>) -> Vec<ChunkSpec> {
        let pages = match descriptor.page_count {
            Some(p) if p > 0 => p,
            _ => return vec![whole(descriptor)],
        };

        let n = self.chunk_count(pages, descriptor.size_bytes);
        if n <= 1 {
            return vec![whole(descriptor)];
        }

        let ranges = partition(pages, n);
        info!(
            "Split {} ({} pages) into {} chunks",
            descriptor.display_name, pages, n
        );
        ranges
            .into_iter()
            .enumerate()
            .map(|(i, range)| ChunkSpec {
                source: Arc::clone(&descriptor),
                sequence_index: i + 1,
                page_range: Some(range),
            })
            .collect()
    }

    /// Number of chunks needed for a document of `pages` pages and `size_bytes` bytes.
    pub fn chunk_count(&self, pages: usize, size_bytes: u64) -> usize {
        let max_pages = self.max_pages_per_chunk.max(1);
        let by_pages = pages.div_ceil(max_pages);
        let by_size = match self.max_bytes_per_chunk {
            Some(max_bytes) if size_bytes > 0 => {
                usize::try_from(size_bytes.div_ceil(max_bytes.max(1))).unwrap_or(usize::MAX)
            }
            _ => 0,
        };
        by_pages.max(by_size).min(pages).max(1)
    }
}

fn whole(descriptor: Arc<DocumentDescriptor>) -> ChunkSpec {
    ChunkSpec {
        source: descriptor,
        sequence_index: 1,
        page_range: None,
    }
}

/// Split `[1, pages]` into `n` contiguous ranges of near-equal length.
///
/// The trailing `pages % n` ranges are one page longer than the others.
/// Requires `1 ≤ n ≤ pages`.
pub fn partition(pages: usize, n: usize) -> Vec<PageRange> {
    let n = n.clamp(1, pages.max(1));
    let base = pages / n;
    let extra = pages % n;
    let mut ranges = Vec::with_capacity(n);
    let mut start = 1;
    for i in 0..n {
        let len = if i >= n - extra { base + 1 } else { base };
        let end = start + len - 1;
        ranges.push(PageRange::new(start, end));
        start = end + 1;
    }
    ranges
}
