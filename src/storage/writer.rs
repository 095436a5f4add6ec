//! Single-pass container writer.

use bytes::BytesMut;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::TilingConfig;
use crate::error::{Result, TileError};
use crate::geometry::{QuantizedExtent3D, Quantization3D};
use crate::io::{BufferPool, SequentialWriter};
use crate::tiling::{LowResExtractor, TileKey, TileSet, ZStatistics};

use super::compression::{CompressionMethod, Compressor, compressor_for};
use super::format::{HeaderInfo, encode_header};
use super::tile_source::TileSource;

/// How a container is written.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub compression: CompressionMethod,
    /// Global low-res budget (0 disables extraction)
    pub max_low_res_points: u64,
    pub buffer_size: usize,
    pub sector_size: usize,
    pub allow_sparse_files: bool,
}

impl WriterOptions {
    pub fn from_config(config: &TilingConfig) -> Self {
        Self {
            compression: config.compression,
            max_low_res_points: config.max_low_res_points,
            buffer_size: config.aligned_buffer_size(),
            sector_size: config.sector_size,
            allow_sparse_files: config.allow_sparse_files,
        }
    }

    /// Intermediate segment files: raw, no low-res split.
    pub fn for_segment(config: &TilingConfig) -> Self {
        Self {
            compression: CompressionMethod::None,
            max_low_res_points: 0,
            ..Self::from_config(config)
        }
    }
}

/// Streams tiles into `<path>.tmp` in enumeration order, then commits the
/// header and renames onto `path`.
///
/// Dropping a writer that was not finished deletes the temporary file.
pub struct ContainerWriter {
    path: PathBuf,
    temp_path: PathBuf,
    tile_set: TileSet,
    info: HeaderInfo,
    header_len: u64,
    writer: Option<SequentialWriter>,
    compressor: Option<Box<dyn Compressor>>,
    extractor: Option<LowResExtractor>,
    low_res: BytesMut,
    scratch: Vec<u8>,
    valid_order: Vec<TileKey>,
    next_tile: usize,
    committed: bool,
    pool: Arc<BufferPool>,
}

impl ContainerWriter {
    /// `tile_set` supplies the grid and the final per-tile point counts.
    pub fn create<P: AsRef<Path>>(
        path: P,
        tile_set: &TileSet,
        quantization: Quantization3D,
        z_statistics: ZStatistics,
        point_size: usize,
        options: &WriterOptions,
        pool: &Arc<BufferPool>,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let temp_path = temp_path(&path);

        let mut tile_set = tile_set.clone();
        for key in tile_set.valid_tiles().map(|t| t.key).collect::<Vec<_>>() {
            if let Some(tile) = tile_set.tile_mut(key) {
                tile.low_res_count = 0;
                tile.storage_size = tile.point_count as u64 * point_size as u64;
            }
        }
        tile_set.assign_storage(point_size);

        let info = HeaderInfo {
            dirty: true,
            point_size,
            compression: options.compression,
            quantization,
            z_statistics,
        };
        let (header, header_len) = encode_header(&info, &tile_set)?;

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(&header)?;
        }

        let raw = tile_set.point_count() * point_size as u64;
        let capacity = match options.compression {
            CompressionMethod::None => header_len + raw,
            // zlib can expand incompressible input slightly
            _ => header_len + raw + raw / 64 + tile_set.valid_tile_count() as u64 * 64 + 4096,
        };

        let created = SequentialWriter::create(
            &temp_path,
            header_len,
            capacity,
            pool,
            options.buffer_size,
            options.sector_size,
            options.allow_sparse_files,
        );
        let writer = match created {
            Ok(writer) => writer,
            Err(e) => {
                let _ = std::fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        let valid_order = tile_set.valid_tiles().map(|t| t.key).collect();
        let extractor = LowResExtractor::new(options.max_low_res_points, tile_set.valid_tile_count());

        Ok(Self {
            path,
            temp_path,
            tile_set,
            info,
            header_len,
            writer: Some(writer),
            compressor: compressor_for(options.compression)?,
            extractor,
            low_res: BytesMut::new(),
            scratch: Vec::new(),
            valid_order,
            next_tile: 0,
            committed: false,
            pool: Arc::clone(pool),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tile_set(&self) -> &TileSet {
        &self.tile_set
    }

    /// The next valid tile expected by [`ContainerWriter::write_tile`].
    pub fn next_tile(&self) -> Option<TileKey> {
        self.valid_order.get(self.next_tile).copied()
    }

    /// Write every record of the next tile. `records` may be reordered in place
    /// by low-res extraction. `bounds` is the tile's tight extent if known.
    pub fn write_tile(
        &mut self,
        key: TileKey,
        records: &mut [u8],
        bounds: Option<QuantizedExtent3D>,
    ) -> Result<()> {
        let point_size = self.info.point_size;
        if self.next_tile() != Some(key) {
            return Err(TileError::InvalidInput(format!(
                "tile ({}, {}) written out of enumeration order",
                key.col, key.row
            )));
        }
        let expected = self
            .tile_set
            .tile(key)
            .map(|t| t.point_count as usize * point_size)
            .unwrap_or(0);
        if records.len() != expected {
            return Err(TileError::InvalidInput(format!(
                "tile ({}, {}) has {} bytes, expected {}",
                key.col,
                key.row,
                records.len(),
                expected
            )));
        }

        let low_res_count = match self.extractor.as_mut() {
            Some(extractor) => extractor.extract(
                self.tile_set.layout(),
                key,
                records,
                point_size,
                &mut self.low_res,
            ),
            None => 0,
        };
        let high_res = &records[..records.len() - low_res_count as usize * point_size];

        let writer = self.writer.as_mut().ok_or(TileError::WriterClosed)?;
        let storage_size = match &self.compressor {
            Some(compressor) if !high_res.is_empty() => {
                self.scratch.clear();
                compressor.compress(high_res, &mut self.scratch)?;
                writer.write(&self.scratch)?;
                self.scratch.len() as u64
            }
            _ => {
                writer.write(high_res)?;
                high_res.len() as u64
            }
        };

        if let Some(tile) = self.tile_set.tile_mut(key) {
            tile.low_res_count = low_res_count;
            tile.storage_size = storage_size;
            if let Some(bounds) = bounds {
                tile.quantized_extent = bounds;
            }
        }
        self.next_tile += 1;
        Ok(())
    }

    /// Append the low-res tail, commit the clean header and move the file
    /// into place.
    pub fn finish(mut self) -> Result<TileSource> {
        if self.next_tile != self.valid_order.len() {
            return Err(TileError::InvalidInput(format!(
                "{} of {} tiles written",
                self.next_tile,
                self.valid_order.len()
            )));
        }

        let mut writer = self.writer.take().ok_or(TileError::WriterClosed)?;
        writer.write(&self.low_res)?;
        writer.finish()?;

        self.tile_set.assign_storage(self.info.point_size);
        self.info.dirty = false;
        let (header, header_len) = encode_header(&self.info, &self.tile_set)?;
        if header_len != self.header_len {
            return Err(TileError::InvalidInput(
                "header length changed while writing".to_string(),
            ));
        }

        {
            let mut file = OpenOptions::new().write(true).open(&self.temp_path)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header)?;
            file.sync_all()?;
        }

        std::fs::rename(&self.temp_path, &self.path)?;
        sync_parent_dir(&self.path)?;
        self.committed = true;

        log::debug!(
            "wrote {} ({} tiles, {} low-res points)",
            self.path.display(),
            self.tile_set.valid_tile_count(),
            self.tile_set.low_res_point_count()
        );

        Ok(TileSource::from_parts(
            self.path.clone(),
            self.tile_set.clone(),
            self.info,
            self.header_len,
            Arc::clone(&self.pool),
        ))
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if !self.committed {
            self.writer.take();
            if let Err(e) = std::fs::remove_file(&self.temp_path)
                && e.kind() != std::io::ErrorKind::NotFound
            {
                log::warn!(
                    "failed to remove partial container {}: {}",
                    self.temp_path.display(),
                    e
                );
            }
        }
    }
}

pub(crate) fn temp_path(path: &Path) -> PathBuf {
    let mut temp = path.to_path_buf();
    if let Some(name) = temp.file_name() {
        let mut new_name = name.to_string_lossy().into_owned();
        new_name.push_str(".tmp");
        temp.set_file_name(new_name);
    }
    temp
}

fn sync_parent_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        let dir = File::open(parent)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
