use crate::types::{sequential_page_order, FullPageId};

/// Pages per leaf chunk for a checkpoint of `total` pages.
///
/// An explicit `max_chunk_pages` wins; otherwise pages are spread evenly
/// across `threads` runners so that each runner gets about one chunk.
/// Never returns zero, even for an empty checkpoint or a zero thread count.
///
/// # Parameters
/// * `total` - Number of pages in the checkpoint.
/// * `threads` - Number of runner threads writing chunks.
/// * `max_chunk_pages` - Optional explicit cap on pages per chunk.
pub fn chunk_size(total: usize, threads: usize, max_chunk_pages: Option<usize>) -> usize {
    match max_chunk_pages {
        Some(max) => max.max(1),
        None => total.div_ceil(threads.max(1)).max(1),
    }
}

/// Outcome of one split step.
#[derive(Debug)]
pub enum Split {
    /// Span small enough to write directly, sorted ascending.
    Leaf(Vec<FullPageId>),
    /// Span partitioned around a pivot; every page on the left orders
    /// before every page on the right.
    Halves(SortingTaskSplitter, SortingTaskSplitter),
}

/// Divides a page array into sorted, write-sized chunks.
///
/// Each step either sorts a span that fits in one chunk, or partitions it
/// around the page whose rank lands on a chunk boundary near the middle, so
/// both halves can be processed independently. Partition points depend only
/// on page ranks, so any permutation of the same pages yields the same
/// leaves, and a span of `n` pages always ends up as `ceil(n / chunk)`
/// leaves with only the last one short.
#[derive(Debug)]
pub struct SortingTaskSplitter {
    pages: Vec<FullPageId>,
    chunk: usize,
}

impl SortingTaskSplitter {
    /// Creates a splitter over `pages` producing chunks of at most `chunk`.
    ///
    /// `pages` may be in any order. A `chunk` of zero is treated as one.
    pub fn new(pages: Vec<FullPageId>, chunk: usize) -> Self {
        Self {
            pages,
            chunk: chunk.max(1),
        }
    }

    /// Number of pages in this span.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether this span holds no pages.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Performs one split step.
    ///
    /// A span of at most `chunk` pages is sorted in place with
    /// [`sequential_page_order`] and returned as a [`Split::Leaf`]. A longer
    /// span is partitioned with a selection pass around the pivot rank from
    /// `split_point`; the upper part is split off into its own vector, so
    /// the two halves own disjoint pages and can move to different runners.
    /// Neither half is sorted yet; each is split again on its own.
    pub fn split(self) -> Split {
        let Self { mut pages, chunk } = self;
        if pages.len() <= chunk {
            pages.sort_unstable_by(sequential_page_order);
            return Split::Leaf(pages);
        }
        let pivot = split_point(pages.len(), chunk);
        pages.select_nth_unstable_by(pivot, sequential_page_order);
        let right = pages.split_off(pivot);
        Split::Halves(Self::new(pages, chunk), Self::new(right, chunk))
    }

    /// Splits all the way down on the current thread, returning leaves in
    /// ascending page order. Empty spans produce no leaf.
    pub fn into_leaves(self) -> Vec<Vec<FullPageId>> {
        let mut leaves = Vec::new();
        let mut stack = vec![self];
        while let Some(span) = stack.pop() {
            if span.is_empty() {
                continue;
            }
            match span.split() {
                Split::Leaf(pages) => leaves.push(pages),
                Split::Halves(left, right) => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        leaves
    }
}

/// Rank of the pivot for a span of `len > chunk` pages: the chunk boundary
/// closest to the middle, with the extra chunk going left.
fn split_point(len: usize, chunk: usize) -> usize {
    let chunks = len.div_ceil(chunk);
    chunks.div_ceil(2) * chunk
}
