//! Sector-aligned sequential reader.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::pool::{BufferPool, PooledBuffer};
use crate::error::{Result, TileError};

/// Forward reader that issues device reads on sector boundaries only.
///
/// Reads land in an internal read-ahead buffer checked out of the pool. The
/// final partial sector of a file is fetched through a small `BufReader`.
pub struct SequentialReader {
    file: File,
    path: PathBuf,
    length: u64,
    sector_size: usize,
    buffer: PooledBuffer,
    /// File position of `buffer[0]`
    buffer_start: u64,
    /// Valid bytes in `buffer`
    buffer_len: usize,
    position: u64,
}

impl SequentialReader {
    pub fn open<P: AsRef<Path>>(
        path: P,
        pool: &Arc<BufferPool>,
        buffer_size: usize,
        sector_size: usize,
    ) -> Result<Self> {
        if !sector_size.is_power_of_two() {
            return Err(TileError::InvalidInput(format!(
                "sector size {} is not a power of two",
                sector_size
            )));
        }
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let length = file.metadata()?.len();
        let capacity = (buffer_size / sector_size).max(1) * sector_size;

        Ok(Self {
            file,
            path,
            length,
            sector_size,
            buffer: pool.acquire_len(capacity),
            buffer_start: 0,
            buffer_len: 0,
            position: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move the logical position. Buffered bytes are kept when still in range.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        if position > self.length {
            return Err(TileError::InvalidInput(format!(
                "seek to {} beyond end of {} ({} bytes)",
                position,
                self.path.display(),
                self.length
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Fill `out` completely or fail with `UnexpectedEof`.
    pub fn read_exact(&mut self, out: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < out.len() {
            let read = self.read(&mut out[filled..])?;
            if read == 0 {
                return Err(TileError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("unexpected end of {}", self.path.display()),
                )));
            }
            filled += read;
        }
        Ok(())
    }

    /// Read up to `out.len()` bytes. Returns 0 at end of file.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if out.is_empty() || self.position >= self.length {
            return Ok(0);
        }

        let buffered_end = self.buffer_start + self.buffer_len as u64;
        if self.position < self.buffer_start || self.position >= buffered_end {
            self.fill()?;
        }

        let index = (self.position - self.buffer_start) as usize;
        let available = self.buffer_len - index;
        let count = available.min(out.len());
        out[..count].copy_from_slice(&self.buffer[index..index + count]);
        self.position += count as u64;
        Ok(count)
    }

    fn fill(&mut self) -> Result<()> {
        let sector = self.sector_size as u64;
        let aligned = self.position / sector * sector;
        let whole_sectors_end = self.length / sector * sector;
        let end = (aligned + self.buffer.len() as u64).min(whole_sectors_end);

        if end > aligned {
            let count = (end - aligned) as usize;
            self.file.seek(SeekFrom::Start(aligned))?;
            self.file.read_exact(&mut self.buffer[..count])?;
            self.buffer_len = count;
        } else {
            let count = (self.length - aligned) as usize;
            let mut tail = BufReader::with_capacity(self.sector_size, self.file.try_clone()?);
            tail.seek(SeekFrom::Start(aligned))?;
            tail.read_exact(&mut self.buffer[..count])?;
            self.buffer_len = count;
        }

        self.buffer_start = aligned;
        Ok(())
    }
}

impl Read for SequentialReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        SequentialReader::read(self, buf).map_err(|e| match e {
            TileError::Io(io) => io,
            other => std::io::Error::other(other.to_string()),
        })
    }
}
