//! Mapping from quantized coordinates to grid cells.

use crate::geometry::{Extent3D, Quantization3D, QuantizedExtent3D, QuantizedPoint3D};

use super::order::TileKey;

/// A `cols × rows` partition of a quantized extent.
///
/// Cell membership uses integer arithmetic only: a point belongs to column
/// `floor((x - min_x) * cols / range_x)`. Points on the max edge compute to
/// column `cols`; [`GridLayout::tile_of`] folds them into the last column
/// while [`GridLayout::slot_of`] keeps them in the overflow slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    cols: u16,
    rows: u16,
    extent: Extent3D,
    quantized_extent: QuantizedExtent3D,
}

impl GridLayout {
    pub fn new(cols: u16, rows: u16, extent: Extent3D, quantization: &Quantization3D) -> Self {
        Self {
            cols: cols.max(1),
            rows: rows.max(1),
            extent,
            quantized_extent: quantization.quantize_extent(&extent),
        }
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn tile_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }

    pub fn extent(&self) -> &Extent3D {
        &self.extent
    }

    pub fn quantized_extent(&self) -> &QuantizedExtent3D {
        &self.quantized_extent
    }

    /// Same partition as `other` (dimensions and extent).
    pub fn same_grid(&self, other: &GridLayout) -> bool {
        self.cols == other.cols
            && self.rows == other.rows
            && self.extent == other.extent
            && self.quantized_extent == other.quantized_extent
    }

    #[inline]
    fn axis_cell(value: u32, min: u32, range: u64, cells: u16) -> u32 {
        let offset = (value as u64).saturating_sub(min as u64);
        ((offset * cells as u64) / range).min(cells as u64) as u32
    }

    /// Unclamped cell coordinate in `[0, cols] × [0, rows]`.
    #[inline]
    pub fn cell_of(&self, p: &QuantizedPoint3D) -> (u32, u32) {
        let e = &self.quantized_extent;
        (
            Self::axis_cell(p.x, e.min.x, e.range_x(), self.cols),
            Self::axis_cell(p.y, e.min.y, e.range_y(), self.rows),
        )
    }

    /// Tile holding `p`, with the max edge folded into the last row/column.
    #[inline]
    pub fn tile_of(&self, p: &QuantizedPoint3D) -> TileKey {
        let (col, row) = self.cell_of(p);
        TileKey::new(
            col.min(self.cols as u32 - 1) as u16,
            row.min(self.rows as u32 - 1) as u16,
        )
    }

    /// Row-major index into a `cols × rows` array.
    #[inline]
    pub fn index_of(&self, key: TileKey) -> usize {
        key.row as usize * self.cols as usize + key.col as usize
    }

    #[inline]
    pub fn tile_index_of(&self, p: &QuantizedPoint3D) -> usize {
        self.index_of(self.tile_of(p))
    }

    /// Row-major index into the `(cols + 1) × (rows + 1)` slot table.
    #[inline]
    pub fn slot_of(&self, p: &QuantizedPoint3D) -> usize {
        let (col, row) = self.cell_of(p);
        row as usize * (self.cols as usize + 1) + col as usize
    }

    pub fn slot_count(&self) -> usize {
        (self.cols as usize + 1) * (self.rows as usize + 1)
    }

    /// Half-open quantized interval `[lo, hi)` of X values mapping to `col`.
    pub fn col_bounds(&self, col: u16) -> (u64, u64) {
        let e = &self.quantized_extent;
        axis_bounds(e.min.x, e.range_x(), self.cols, col)
    }

    pub fn row_bounds(&self, row: u16) -> (u64, u64) {
        let e = &self.quantized_extent;
        axis_bounds(e.min.y, e.range_y(), self.rows, row)
    }

    /// Quantized bounds of a tile's grid cell (inclusive max).
    pub fn tile_quantized_extent(&self, key: TileKey) -> QuantizedExtent3D {
        let (x0, x1) = self.col_bounds(key.col);
        let (y0, y1) = self.row_bounds(key.row);
        let e = &self.quantized_extent;
        let last_x = if key.col + 1 == self.cols { e.max.x as u64 } else { x1.saturating_sub(1) };
        let last_y = if key.row + 1 == self.rows { e.max.y as u64 } else { y1.saturating_sub(1) };
        QuantizedExtent3D::new(
            QuantizedPoint3D::new(clamp_u32(x0), clamp_u32(y0), e.min.z),
            QuantizedPoint3D::new(clamp_u32(last_x.max(x0)), clamp_u32(last_y.max(y0)), e.max.z),
        )
    }

    /// World bounds of a tile's grid cell.
    pub fn tile_extent(&self, key: TileKey) -> Extent3D {
        let width = self.extent.range_x() / self.cols as f64;
        let height = self.extent.range_y() / self.rows as f64;
        let min_x = self.extent.min_x + key.col as f64 * width;
        let min_y = self.extent.min_y + key.row as f64 * height;
        Extent3D::new(
            min_x,
            min_y,
            self.extent.min_z,
            min_x + width,
            min_y + height,
            self.extent.max_z,
        )
    }
}

fn axis_bounds(min: u32, range: u64, cells: u16, cell: u16) -> (u64, u64) {
    let cells = cells as u64;
    let lo = (cell as u64 * range).div_ceil(cells);
    let hi = ((cell as u64 + 1) * range).div_ceil(cells);
    (min as u64 + lo, min as u64 + hi)
}

fn clamp_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}
