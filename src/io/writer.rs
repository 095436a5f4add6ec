//! Sector-aligned sequential writer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::pool::{BufferPool, PooledBuffer};
use crate::error::{Result, TileError};

/// Forward-only writer that flushes whole sector-aligned buffers.
///
/// The file is pre-sized to `capacity` bytes when created. Writing starts at
/// an arbitrary `start` position; bytes between the preceding sector boundary
/// and `start` are preserved. A short flush is only produced by
/// [`SequentialWriter::finish`] (or an explicit [`SequentialWriter::flush_partial`]),
/// after which the writer accepts no more data.
pub struct SequentialWriter {
    file: File,
    path: PathBuf,
    capacity: u64,
    sector_size: usize,
    buffer: PooledBuffer,
    buffer_start: u64,
    buffer_index: usize,
    position: u64,
    closed: bool,
}

impl SequentialWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        start: u64,
        capacity: u64,
        pool: &Arc<BufferPool>,
        buffer_size: usize,
        sector_size: usize,
        allow_sparse: bool,
    ) -> Result<Self> {
        if !sector_size.is_power_of_two() {
            return Err(TileError::InvalidInput(format!(
                "sector size {} is not a power of two",
                sector_size
            )));
        }
        if start > capacity {
            return Err(TileError::InvalidInput(format!(
                "start position {} beyond capacity {}",
                start, capacity
            )));
        }

        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        allocate(&mut file, capacity, allow_sparse)?;

        let sector = sector_size as u64;
        let buffer_len = (buffer_size / sector_size).max(1) * sector_size;
        let mut buffer = pool.acquire_len(buffer_len);
        let buffer_start = start / sector * sector;
        let preserved = (start - buffer_start) as usize;

        if preserved > 0 {
            file.seek(SeekFrom::Start(buffer_start))?;
            file.read_exact(&mut buffer[..preserved])?;
        }

        Ok(Self {
            file,
            path,
            capacity,
            sector_size,
            buffer,
            buffer_start,
            buffer_index: preserved,
            position: start,
            closed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn write(&mut self, mut data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TileError::WriterClosed);
        }
        if self.position + data.len() as u64 > self.capacity {
            return Err(TileError::InvalidInput(format!(
                "write of {} bytes at {} exceeds allocated length {} of {}",
                data.len(),
                self.position,
                self.capacity,
                self.path.display()
            )));
        }

        while !data.is_empty() {
            let room = self.buffer.len() - self.buffer_index;
            let count = room.min(data.len());
            self.buffer[self.buffer_index..self.buffer_index + count]
                .copy_from_slice(&data[..count]);
            self.buffer_index += count;
            self.position += count as u64;
            data = &data[count..];

            if self.buffer_index == self.buffer.len() {
                self.flush_full()?;
            }
        }
        Ok(())
    }

    fn flush_full(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.buffer_start))?;
        self.file.write_all(&self.buffer)?;
        self.buffer_start += self.buffer.len() as u64;
        self.buffer_index = 0;
        Ok(())
    }

    /// Write the buffered remainder padded to a sector boundary and close the
    /// writer. Only legal once the writer has reached `capacity`.
    pub fn flush_partial(&mut self) -> Result<()> {
        if self.position != self.capacity {
            return Err(TileError::InvalidInput(format!(
                "partial flush at {} before end {} of {}",
                self.position,
                self.capacity,
                self.path.display()
            )));
        }
        self.flush_tail()
    }

    fn flush_tail(&mut self) -> Result<()> {
        if self.closed {
            return Err(TileError::WriterClosed);
        }
        self.closed = true;

        if self.buffer_index > 0 {
            let sector = self.sector_size;
            let padded = self.buffer_index.div_ceil(sector) * sector;
            self.buffer[self.buffer_index..padded].fill(0);
            self.file.seek(SeekFrom::Start(self.buffer_start))?;
            self.file.write_all(&self.buffer[..padded])?;
        }
        Ok(())
    }

    /// Flush the tail, cut the file at the current position and sync it.
    /// Returns the final length.
    pub fn finish(mut self) -> Result<u64> {
        if !self.closed {
            self.flush_tail()?;
        }
        self.file.set_len(self.position)?;
        self.file.sync_all()?;
        Ok(self.position)
    }
}

/// Pre-size `file` to `length` bytes. Without sparse support the last byte is
/// written so the filesystem commits the blocks.
pub fn allocate(file: &mut File, length: u64, allow_sparse: bool) -> Result<()> {
    if file.metadata()?.len() >= length {
        return Ok(());
    }
    file.set_len(length)?;
    if !allow_sparse && length > 0 {
        file.seek(SeekFrom::Start(length - 1))?;
        file.write_all(&[0])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_preserves_prefix_and_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, b"HEADER").unwrap();

        let pool = BufferPool::new(512);
        let mut writer = SequentialWriter::create(&path, 6, 6 + 1000, &pool, 512, 512, true).unwrap();
        let payload: Vec<u8> = (0..1000).map(|i| (i % 7) as u8).collect();
        writer.write(&payload[..300]).unwrap();
        writer.write(&payload[300..]).unwrap();
        assert_eq!(writer.finish().unwrap(), 1006);

        let data = std::fs::read(&path).unwrap();
        assert_eq!(data.len(), 1006);
        assert_eq!(&data[..6], b"HEADER");
        assert_eq!(&data[6..], &payload[..]);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_rejects_write_after_partial_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let pool = BufferPool::new(512);
        let mut writer = SequentialWriter::create(&path, 0, 10, &pool, 512, 512, false).unwrap();
        writer.write(&[1u8; 10]).unwrap();
        writer.flush_partial().unwrap();
        assert!(writer.is_closed());
        assert!(matches!(writer.write(&[1]), Err(TileError::WriterClosed)));
    }

    #[test]
    fn test_partial_flush_before_end_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let pool = BufferPool::new(512);
        let mut writer = SequentialWriter::create(&path, 0, 100, &pool, 512, 512, true).unwrap();
        writer.write(&[1u8; 10]).unwrap();
        assert!(writer.flush_partial().is_err());
        assert!(!writer.is_closed());
    }

    #[test]
    fn test_write_past_capacity_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let pool = BufferPool::new(512);
        let mut writer = SequentialWriter::create(&path, 0, 8, &pool, 512, 512, true).unwrap();
        assert!(writer.write(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_finish_before_capacity_shrinks_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let pool = BufferPool::new(512);
        let mut writer = SequentialWriter::create(&path, 0, 4096, &pool, 1024, 512, true).unwrap();
        writer.write(&[9u8; 700]).unwrap();
        assert_eq!(writer.finish().unwrap(), 700);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 700);
    }
}
