use serde::{Deserialize, Serialize};

use crate::geometry::QuantizedExtent3D;

use super::order::TileKey;

/// One cell of the tile grid.
///
/// Offsets are filled in stages: `point_offset` when the grid is built from
/// counts, the storage fields once the tile's bytes have been written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub key: TileKey,
    /// Rank among tiles with points, `None` for empty tiles
    pub valid_index: Option<u32>,
    /// Index of the tile's first point in the tile-ordered point sequence
    pub point_offset: u64,
    pub point_count: u32,
    /// Points of this tile stored in the low-res tail instead of its high-res run
    pub low_res_count: u32,
    /// Byte offset of the high-res run relative to the point-data region
    pub storage_offset: u64,
    /// Stored size of the high-res run (compressed size when compressed)
    pub storage_size: u64,
    /// Byte offset of the tile's low-res run relative to the point-data region
    pub low_res_offset: u64,
    /// Tight bounds after tiling; the grid cell bounds for opened containers
    pub quantized_extent: QuantizedExtent3D,
}

impl Tile {
    pub fn new(key: TileKey) -> Self {
        Self {
            key,
            valid_index: None,
            point_offset: 0,
            point_count: 0,
            low_res_count: 0,
            storage_offset: 0,
            storage_size: 0,
            low_res_offset: 0,
            quantized_extent: QuantizedExtent3D::empty(),
        }
    }

    pub fn col(&self) -> u16 {
        self.key.col
    }

    pub fn row(&self) -> u16 {
        self.key.row
    }

    pub fn is_valid(&self) -> bool {
        self.point_count > 0
    }

    pub fn high_res_count(&self) -> u32 {
        self.point_count - self.low_res_count
    }
}
