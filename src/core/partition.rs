//! Range partitioning into grains

/// Number of chunks planned per thread when the grain is left unspecified.
///
/// Over-partitioning keeps one late thread from stalling the whole batch.
pub const CHUNKS_PER_THREAD: usize = 4;

/// Estimate a grain for `range` indices spread over `threads` threads.
///
/// Returns `max(1, range / (threads * 4))`.
pub fn estimate_grain(range: usize, threads: usize) -> usize {
    let threads = threads.max(1);
    (range / threads.saturating_mul(CHUNKS_PER_THREAD)).max(1)
}

/// Consecutive half-open chunks `[from, from + grain)` tiling `[first, last)`.
///
/// The last chunk is clamped at `last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    first: usize,
    last: usize,
    grain: usize,
}

impl ChunkRange {
    /// Create the tiling of `[first, last)`; a zero grain is treated as 1
    pub fn new(first: usize, last: usize, grain: usize) -> Self {
        Self {
            first,
            last: last.max(first),
            grain: grain.max(1),
        }
    }

    /// Grain used for the tiling
    pub fn grain(&self) -> usize {
        self.grain
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        let n = self.last - self.first;
        n / self.grain + usize::from(n % self.grain != 0)
    }

    /// Returns true if the range is empty
    pub fn is_empty(&self) -> bool {
        self.first == self.last
    }

    /// Bounds of chunk `index`, or `None` past the end
    pub fn chunk(&self, index: usize) -> Option<(usize, usize)> {
        let from = index
            .checked_mul(self.grain)
            .and_then(|offset| self.first.checked_add(offset))?;
        if from >= self.last {
            return None;
        }
        let to = from.saturating_add(self.grain).min(self.last);
        Some((from, to))
    }

    /// Iterate over the chunks in order
    pub fn iter(&self) -> ChunkIter {
        ChunkIter {
            range: *self,
            next: 0,
        }
    }
}

impl IntoIterator for ChunkRange {
    type Item = (usize, usize);
    type IntoIter = ChunkIter;

    fn into_iter(self) -> ChunkIter {
        self.iter()
    }
}

/// Iterator over the chunks of a [`ChunkRange`]
#[derive(Debug, Clone)]
pub struct ChunkIter {
    range: ChunkRange,
    next: usize,
}

impl Iterator for ChunkIter {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        let chunk = self.range.chunk(self.next)?;
        self.next += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.range.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkIter {}
