//! Fixed-size chunk layout and the chunker.

use crate::error::{Error, Result};
use crate::source::ByteSource;
use bytes::Bytes;
use std::fmt;
use std::ops::Range;

/// How a file of `total_size` bytes splits into `chunk_size` pieces.
///
/// Every chunk but the last is exactly `chunk_size` bytes. The last one holds
/// the remainder, between 1 and `chunk_size` bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkLayout {
    total_size: u64,
    chunk_size: u64,
}

impl ChunkLayout {
    /// Create a layout. A zero chunk size is rejected; a zero total size
    /// yields a layout with no chunks.
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidChunkSize {
                size: 0,
                min: 1,
                max: u64::MAX,
            });
        }
        Ok(Self {
            total_size,
            chunk_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// `ceil(total_size / chunk_size)`.
    pub fn total_chunks(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size)
    }

    fn check_index(&self, index: u64) -> Result<()> {
        let total = self.total_chunks();
        if index >= total {
            return Err(Error::ChunkOutOfRange { index, total });
        }
        Ok(())
    }

    /// Exact payload length of chunk `index`.
    pub fn expected_len(&self, index: u64) -> Result<u64> {
        let range = self.byte_range(index)?;
        Ok(range.end - range.start)
    }

    /// Byte offsets covered by chunk `index`.
    pub fn byte_range(&self, index: u64) -> Result<Range<u64>> {
        self.check_index(index)?;
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size);
        Ok(start..end)
    }
}

/// One chunk payload, tagged with its position.
#[derive(Clone, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the file.
    pub index: u64,
    /// The chunk bytes.
    pub data: Bytes,
}

impl Chunk {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("index", &self.index)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Read a single chunk by byte range.
pub fn read_chunk<S>(source: &S, layout: &ChunkLayout, index: u64) -> Result<Chunk>
where
    S: ByteSource + ?Sized,
{
    let range = layout.byte_range(index)?;
    let len = (range.end - range.start) as usize;
    let data = source.read_at(range.start, len)?;
    if data.len() != len {
        return Err(Error::ShortRead {
            expected: range.end,
            actual: range.start + data.len() as u64,
        });
    }
    Ok(Chunk { index, data })
}

/// Lazy, single-pass iterator over the chunks of a source in index order.
///
/// Stops after the first error.
pub struct Chunker<S> {
    source: S,
    layout: ChunkLayout,
    next: u64,
    failed: bool,
}

impl<S: ByteSource> Chunker<S> {
    pub fn new(source: S, layout: ChunkLayout) -> Self {
        Self {
            source,
            layout,
            next: 0,
            failed: false,
        }
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }
}

impl<S: ByteSource> Iterator for Chunker<S> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.layout.total_chunks() {
            return None;
        }
        let result = read_chunk(&self.source, &self.layout, self.next);
        match result {
            Ok(_) => self.next += 1,
            Err(_) => self.failed = true,
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let left = (self.layout.total_chunks() - self.next) as usize;
        (0, Some(left))
    }
}
