//! Read access to a finalized tile container.

use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, TileError};
use crate::geometry::Quantization3D;
use crate::io::BufferPool;
use crate::tiling::{Tile, TileSet, ZStatistics};

use super::compression::{CompressionMethod, Compressor, compressor_for};
use super::format::{HeaderInfo, read_header};

/// A tiled point container opened for random per-tile reads.
///
/// The file handle is opened on first use and shared behind a lock, so a
/// `TileSource` can be handed to several reader threads. Decompression
/// scratch comes from the source's buffer pool.
pub struct TileSource {
    path: PathBuf,
    tile_set: TileSet,
    info: HeaderInfo,
    point_data_offset: u64,
    compressor: Option<Box<dyn Compressor>>,
    file: Mutex<Option<File>>,
    pool: Arc<BufferPool>,
}

impl std::fmt::Debug for TileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSource")
            .field("path", &self.path)
            .field("tiles", &self.tile_set.valid_tile_count())
            .field("points", &self.tile_set.point_count())
            .field("compression", &self.info.compression)
            .finish()
    }
}

impl TileSource {
    const SCRATCH_SIZE: usize = 256 * 1024;

    /// Open and validate a container. Anything that is not a complete,
    /// finalized container of this version is a `Format` error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_pool(path, &BufferPool::new(Self::SCRATCH_SIZE))
    }

    /// [`TileSource::open`], drawing read scratch from `pool`.
    pub fn open_with_pool<P: AsRef<Path>>(path: P, pool: &Arc<BufferPool>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let length = file.metadata()?.len();

        let mut reader = BufReader::new(file);
        let header = read_header(&mut reader)?;

        let mut tile_set = header.tile_set;
        let data_len = tile_set.assign_storage(header.info.point_size);
        let expected = header.point_data_offset + data_len;
        if length < expected {
            return Err(TileError::Format(format!(
                "{} is {} bytes, expected at least {}",
                path.display(),
                length,
                expected
            )));
        }

        let compressor = compressor_for(header.info.compression)?;
        let file = reader.into_inner();
        Ok(Self {
            path,
            tile_set,
            info: header.info,
            point_data_offset: header.point_data_offset,
            compressor,
            file: Mutex::new(Some(file)),
            pool: Arc::clone(pool),
        })
    }

    pub(crate) fn from_parts(
        path: PathBuf,
        tile_set: TileSet,
        info: HeaderInfo,
        point_data_offset: u64,
        pool: Arc<BufferPool>,
    ) -> Self {
        // `compressor_for` only fails for ids a `CompressionMethod` cannot hold
        let compressor = compressor_for(info.compression).ok().flatten();
        Self {
            path,
            tile_set,
            info,
            point_data_offset,
            compressor,
            file: Mutex::new(None),
            pool,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tile_set(&self) -> &TileSet {
        &self.tile_set
    }

    pub fn quantization(&self) -> &Quantization3D {
        &self.info.quantization
    }

    pub fn z_statistics(&self) -> &ZStatistics {
        &self.info.z_statistics
    }

    pub fn point_size_bytes(&self) -> usize {
        self.info.point_size
    }

    pub fn compression(&self) -> CompressionMethod {
        self.info.compression
    }

    pub fn point_data_offset(&self) -> u64 {
        self.point_data_offset
    }

    /// Bytes needed to hold every record of `tile`.
    pub fn tile_size_bytes(&self, tile: &Tile) -> usize {
        tile.point_count as usize * self.info.point_size
    }

    /// High-res records followed by the tile's low-res records.
    pub fn load_tile(&self, tile: &Tile, buf: &mut [u8]) -> Result<usize> {
        let needed = self.tile_size_bytes(tile);
        check_len(needed, buf.len())?;
        let high = self.load_tile_high_res(tile, buf)?;
        let low = self.load_tile_low_res(tile, &mut buf[high..])?;
        Ok(high + low)
    }

    /// The tile's high-res run, decompressed.
    pub fn load_tile_high_res(&self, tile: &Tile, buf: &mut [u8]) -> Result<usize> {
        let needed = tile.high_res_count() as usize * self.info.point_size;
        check_len(needed, buf.len())?;
        if needed == 0 {
            return Ok(0);
        }

        match &self.compressor {
            Some(compressor) => {
                let mut packed = self.pool.acquire_len(tile.storage_size as usize);
                self.read_at(tile.storage_offset, &mut packed)?;
                compressor.decompress(&packed, &mut buf[..needed])?;
            }
            None => {
                if tile.storage_size != needed as u64 {
                    return Err(TileError::Format(format!(
                        "tile ({}, {}) stores {} bytes for {} points",
                        tile.col(),
                        tile.row(),
                        tile.storage_size,
                        tile.high_res_count()
                    )));
                }
                self.read_at(tile.storage_offset, &mut buf[..needed])?;
            }
        }
        Ok(needed)
    }

    pub fn load_tile_low_res(&self, tile: &Tile, buf: &mut [u8]) -> Result<usize> {
        let needed = tile.low_res_count as usize * self.info.point_size;
        check_len(needed, buf.len())?;
        if needed > 0 {
            self.read_at(tile.low_res_offset, &mut buf[..needed])?;
        }
        Ok(needed)
    }

    /// Bytes needed for [`TileSource::load_low_res_layer`].
    pub fn low_res_layer_size(&self) -> usize {
        self.tile_set.low_res_point_count() as usize * self.info.point_size
    }

    /// The whole low-res tail, every tile's representatives in enumeration order.
    pub fn load_low_res_layer(&self, buf: &mut [u8]) -> Result<usize> {
        let needed = self.low_res_layer_size();
        check_len(needed, buf.len())?;
        let start = match self.tile_set.valid_tiles().next() {
            Some(first) if needed > 0 => first.low_res_offset,
            _ => return Ok(0),
        };
        self.read_at(start, &mut buf[..needed])?;
        Ok(needed)
    }

    /// Read at an offset relative to the point-data region.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut guard = self.file.lock();
        let file = match guard.as_mut() {
            Some(file) => file,
            None => guard.insert(File::open(&self.path)?),
        };
        file.seek(SeekFrom::Start(self.point_data_offset + offset))?;
        file.read_exact(buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TileError::Format(format!("{} is truncated", self.path.display()))
            } else {
                TileError::Io(e)
            }
        })
    }
}

fn check_len(needed: usize, available: usize) -> Result<()> {
    if available < needed {
        return Err(TileError::BufferTooSmall { needed, available });
    }
    Ok(())
}
