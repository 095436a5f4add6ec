//! Point sources: the input side of the tiling pipeline.
//!
//! Format-specific readers live outside this crate; the tiler only needs a
//! fixed-size binary record stream plus the metadata exposed by
//! [`PointSource`].

pub mod chunks;
pub mod file;

use std::path::Path;
use std::sync::Arc;

use crate::config::TilingConfig;
use crate::error::Result;
use crate::geometry::{Extent3D, Quantization3D};
use crate::io::BufferPool;

pub use chunks::ChunkReader;
pub use file::PointFile;

/// A run of consecutive point indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointRange {
    pub start: u64,
    pub count: u64,
}

impl PointRange {
    pub const fn new(start: u64, count: u64) -> Self {
        Self { start, count }
    }

    pub const fn end(&self) -> u64 {
        self.start + self.count
    }
}

pub trait PointSource: Send + Sync {
    /// File backing the records.
    fn path(&self) -> &Path;

    /// Number of points visible through this source.
    fn count(&self) -> u64;

    fn extent(&self) -> &Extent3D;

    fn quantization(&self) -> &Quantization3D;

    /// Byte offset of point 0 in [`PointSource::path`].
    fn point_data_offset(&self) -> u64;

    fn point_size_bytes(&self) -> usize;

    /// Forward-only chunked enumeration of the raw records.
    fn chunks(&self, pool: &Arc<BufferPool>, config: &TilingConfig) -> Result<ChunkReader>;

    /// Contiguous sub-range `[start, start + count)` in this source's index space.
    fn segment(&self, start: u64, count: u64) -> Result<Box<dyn PointSource>>;

    /// Scattered sub-ranges in this source's index space, enumerated in order.
    fn sparse_segment(&self, ranges: &[PointRange]) -> Result<Box<dyn PointSource>>;

    /// Size of the point-data region in bytes.
    fn data_size(&self) -> u64 {
        self.count() * self.point_size_bytes() as u64
    }
}
