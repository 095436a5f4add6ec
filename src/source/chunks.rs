use smallvec::SmallVec;
use std::path::Path;
use std::sync::Arc;

use super::PointRange;
use crate::error::{Result, TileError};
use crate::io::{BufferPool, PooledBuffer, SequentialReader};

/// Forward-only enumerator over whole point records.
///
/// Each chunk holds at most one pool buffer worth of records and never splits
/// a record. [`ChunkReader::progress`] is monotonic.
pub struct ChunkReader {
    reader: SequentialReader,
    data_offset: u64,
    point_size: usize,
    ranges: SmallVec<[PointRange; 4]>,
    range_index: usize,
    range_consumed: u64,
    chunk: PooledBuffer,
    chunk_len: usize,
    total: u64,
    read: u64,
}

impl ChunkReader {
    pub(crate) fn open(
        path: &Path,
        data_offset: u64,
        point_size: usize,
        ranges: &[PointRange],
        pool: &Arc<BufferPool>,
        buffer_size: usize,
        sector_size: usize,
    ) -> Result<Self> {
        if point_size == 0 {
            return Err(TileError::InvalidInput("point size must be positive".to_string()));
        }
        let reader = SequentialReader::open(path, pool, buffer_size, sector_size)?;
        let points_per_chunk = (buffer_size / point_size).max(1);

        Ok(Self {
            reader,
            data_offset,
            point_size,
            ranges: ranges.iter().copied().filter(|r| r.count > 0).collect(),
            range_index: 0,
            range_consumed: 0,
            chunk: pool.acquire_len(points_per_chunk * point_size),
            chunk_len: 0,
            total: ranges.iter().map(|r| r.count).sum(),
            read: 0,
        })
    }

    pub fn point_size(&self) -> usize {
        self.point_size
    }

    pub fn total_points(&self) -> u64 {
        self.total
    }

    pub fn points_read(&self) -> u64 {
        self.read
    }

    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.read as f32 / self.total as f32
        }
    }

    /// The next chunk of raw records, or `None` when exhausted.
    pub fn next_chunk(&mut self) -> Result<Option<&[u8]>> {
        let capacity = self.chunk.len() / self.point_size;
        self.chunk_len = 0;

        while self.chunk_len < capacity * self.point_size {
            let Some(range) = self.ranges.get(self.range_index).copied() else {
                break;
            };
            let remaining = range.count - self.range_consumed;
            if remaining == 0 {
                self.range_index += 1;
                self.range_consumed = 0;
                continue;
            }

            let room = capacity - self.chunk_len / self.point_size;
            let take = remaining.min(room as u64);
            let point = range.start + self.range_consumed;
            let position = self.data_offset + point * self.point_size as u64;
            if self.reader.position() != position {
                self.reader.seek(position)?;
            }

            let bytes = take as usize * self.point_size;
            self.reader
                .read_exact(&mut self.chunk[self.chunk_len..self.chunk_len + bytes])?;
            self.chunk_len += bytes;
            self.range_consumed += take;
            self.read += take;
        }

        if self.chunk_len == 0 {
            Ok(None)
        } else {
            Ok(Some(&self.chunk[..self.chunk_len]))
        }
    }
}
