use smallvec::SmallVec;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{ChunkReader, PointRange, PointSource};
use crate::config::TilingConfig;
use crate::error::{Result, TileError};
use crate::geometry::{Extent3D, Point3D, QUANTIZED_POINT_SIZE, Quantization3D};
use crate::io::BufferPool;

/// Raw binary point records stored back to back after a header of
/// `data_offset` bytes.
///
/// A `PointFile` may expose only some of the file's records: segments and
/// sparse regions keep the same file and restrict the visible ranges.
#[derive(Debug, Clone)]
pub struct PointFile {
    path: PathBuf,
    extent: Extent3D,
    quantization: Quantization3D,
    data_offset: u64,
    point_size: usize,
    /// Visible ranges in absolute file record indices
    ranges: SmallVec<[PointRange; 4]>,
    count: u64,
}

impl PointFile {
    /// Describe an existing record file. The record count is derived from the
    /// file length.
    pub fn open<P: AsRef<Path>>(
        path: P,
        extent: Extent3D,
        quantization: Quantization3D,
        data_offset: u64,
        point_size: usize,
    ) -> Result<Self> {
        if point_size < QUANTIZED_POINT_SIZE {
            return Err(TileError::InvalidInput(format!(
                "point size {} is smaller than the {} byte quantized prefix",
                point_size, QUANTIZED_POINT_SIZE
            )));
        }

        let path = path.as_ref().to_path_buf();
        let length = std::fs::metadata(&path)?.len();
        if length < data_offset {
            return Err(TileError::InvalidInput(format!(
                "{} is shorter than its data offset {}",
                path.display(),
                data_offset
            )));
        }
        let count = (length - data_offset) / point_size as u64;

        let mut ranges = SmallVec::new();
        ranges.push(PointRange::new(0, count));

        Ok(Self {
            path,
            extent,
            quantization,
            data_offset,
            point_size,
            ranges,
            count,
        })
    }

    /// Write `points` as 12-byte quantized records and describe the result.
    ///
    /// The extent is computed from the input; when `quantization` is `None` one
    /// is derived from that extent.
    pub fn create<P: AsRef<Path>>(
        path: P,
        points: &[Point3D],
        quantization: Option<Quantization3D>,
    ) -> Result<Self> {
        let extent = Extent3D::from_points(points)
            .ok_or_else(|| TileError::InvalidInput("no points to write".to_string()))?;
        let quantization = quantization.unwrap_or_else(|| Quantization3D::from_extent(&extent));

        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        let mut record = [0u8; QUANTIZED_POINT_SIZE];
        for p in points {
            quantization.quantize(p).write_to(&mut record);
            writer.write_all(&record)?;
        }
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;

        Self::open(path, extent, quantization, 0, QUANTIZED_POINT_SIZE)
    }

    pub fn ranges(&self) -> &[PointRange] {
        &self.ranges
    }

    /// Translate ranges in this view's index space to absolute file indices.
    fn resolve(&self, requested: &[PointRange]) -> Result<SmallVec<[PointRange; 4]>> {
        let mut resolved = SmallVec::new();
        for range in requested {
            if range.end() > self.count {
                return Err(TileError::InvalidInput(format!(
                    "range {}..{} outside source of {} points",
                    range.start,
                    range.end(),
                    self.count
                )));
            }

            let mut skip = range.start;
            let mut wanted = range.count;
            for visible in &self.ranges {
                if wanted == 0 {
                    break;
                }
                if skip >= visible.count {
                    skip -= visible.count;
                    continue;
                }
                let take = (visible.count - skip).min(wanted);
                resolved.push(PointRange::new(visible.start + skip, take));
                wanted -= take;
                skip = 0;
            }
        }
        Ok(resolved)
    }

    fn restricted(&self, ranges: SmallVec<[PointRange; 4]>) -> PointFile {
        let count = ranges.iter().map(|r| r.count).sum();
        PointFile {
            path: self.path.clone(),
            extent: self.extent,
            quantization: self.quantization,
            data_offset: self.data_offset,
            point_size: self.point_size,
            ranges,
            count,
        }
    }
}

impl PointSource for PointFile {
    fn path(&self) -> &Path {
        &self.path
    }

    fn count(&self) -> u64 {
        self.count
    }

    fn extent(&self) -> &Extent3D {
        &self.extent
    }

    fn quantization(&self) -> &Quantization3D {
        &self.quantization
    }

    fn point_data_offset(&self) -> u64 {
        self.data_offset
    }

    fn point_size_bytes(&self) -> usize {
        self.point_size
    }

    fn chunks(&self, pool: &Arc<BufferPool>, config: &TilingConfig) -> Result<ChunkReader> {
        ChunkReader::open(
            &self.path,
            self.data_offset,
            self.point_size,
            &self.ranges,
            pool,
            config.aligned_buffer_size(),
            config.sector_size,
        )
    }

    fn segment(&self, start: u64, count: u64) -> Result<Box<dyn PointSource>> {
        let ranges = self.resolve(&[PointRange::new(start, count)])?;
        Ok(Box::new(self.restricted(ranges)))
    }

    fn sparse_segment(&self, ranges: &[PointRange]) -> Result<Box<dyn PointSource>> {
        let ranges = self.resolve(ranges)?;
        Ok(Box::new(self.restricted(ranges)))
    }
}
