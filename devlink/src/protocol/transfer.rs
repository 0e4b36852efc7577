//! Chunked transfer planning.
//!
//! A file write is split into fixed-size chunks sent strictly in order, each
//! acknowledged before the next one goes out, framed by a start operation
//! and an end operation carrying the final size.

/// Default chunk size for file writes.
pub const DEFAULT_CHUNK_SIZE: usize = 16_000;

/// Largest chunk size accepted from user configuration.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Highest progress value reported before the end operation is acknowledged.
pub const MAX_PROGRESS_BEFORE_END: u8 = 99;

/// One piece of a chunked transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    /// Offset of the first byte within the source buffer.
    pub offset: usize,
    /// Chunk contents.
    pub bytes: &'a [u8],
    /// Whether this is the final chunk.
    pub last: bool,
}

impl Chunk<'_> {
    /// Offset just past the end of this chunk.
    pub fn end(&self) -> usize {
        self.offset + self.bytes.len()
    }
}

/// Iterator over the chunks of a buffer.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    data: &'a [u8],
    chunk_size: usize,
    offset: usize,
}

/// Split `data` into chunks of at most `chunk_size` bytes.
///
/// An empty buffer yields no chunks. A `chunk_size` of zero is treated as
/// [`DEFAULT_CHUNK_SIZE`].
pub fn chunks(data: &[u8], chunk_size: usize) -> Chunks<'_> {
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    Chunks {
        data,
        chunk_size,
        offset: 0,
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let total = self.data.len();
        if self.offset >= total {
            return None;
        }
        let end = (self.offset + self.chunk_size).min(total);
        let chunk = Chunk {
            offset: self.offset,
            bytes: &self.data[self.offset..end],
            last: end == total,
        };
        self.offset = end;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.data.len().saturating_sub(self.offset);
        let n = remaining.div_ceil(self.chunk_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Progress percentage after `sent` of `total` bytes have been acknowledged.
///
/// Capped at [`MAX_PROGRESS_BEFORE_END`]; 100 is reported only once the end
/// operation succeeds.
#[allow(clippy::cast_possible_truncation)]
pub fn progress_percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (sent.min(total) as u128 * 100 / total as u128) as u8;
    pct.min(MAX_PROGRESS_BEFORE_END)
}
