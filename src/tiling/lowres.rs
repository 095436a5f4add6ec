//! Low-res layer extraction.
//!
//! Each tile is overlaid with a small square sub-grid. The lowest point of a
//! sub-cell (first seen on ties) becomes its representative and is moved from
//! the tile's high-res run into the shared low-res tail.

use bytes::BytesMut;

use crate::geometry::QuantizedPoint3D;

use super::grid::GridLayout;
use super::order::TileKey;

pub struct LowResExtractor {
    sub_grid: u16,
    /// Representative per sub-cell: (record index, z)
    cells: Vec<Option<(usize, u32)>>,
    picks: Vec<usize>,
}

impl LowResExtractor {
    /// `None` when the budget disables extraction.
    pub fn new(budget: u64, valid_tiles: usize) -> Option<Self> {
        if budget == 0 || valid_tiles == 0 {
            return None;
        }
        let per_tile = budget / valid_tiles as u64;
        let sub_grid = ((per_tile as f64).sqrt().floor() as u64).clamp(1, u16::MAX as u64) as u16;
        Some(Self {
            sub_grid,
            cells: vec![None; sub_grid as usize * sub_grid as usize],
            picks: Vec::new(),
        })
    }

    pub fn sub_grid(&self) -> u16 {
        self.sub_grid
    }

    /// Move the representatives of `records` (all belonging to `key`) into
    /// `low_res`, compacting the remaining records to the front.
    ///
    /// Returns the number of representatives; the high-res run is the first
    /// `records.len() / point_size - returned` records.
    pub fn extract(
        &mut self,
        layout: &GridLayout,
        key: TileKey,
        records: &mut [u8],
        point_size: usize,
        low_res: &mut BytesMut,
    ) -> u32 {
        let count = records.len() / point_size;
        if count == 0 {
            return 0;
        }

        let (x0, x1) = layout.col_bounds(key.col);
        let (y0, y1) = layout.row_bounds(key.row);
        let width = x1.saturating_sub(x0).max(1);
        let height = y1.saturating_sub(y0).max(1);
        let n = self.sub_grid as u64;

        self.cells.fill(None);
        for (index, record) in records.chunks_exact(point_size).enumerate() {
            let p = QuantizedPoint3D::read_from(record);
            let sx = (((p.x as u64).saturating_sub(x0) * n) / width).min(n - 1);
            let sy = (((p.y as u64).saturating_sub(y0) * n) / height).min(n - 1);
            let cell = &mut self.cells[(sy * n + sx) as usize];
            match *cell {
                Some((_, z)) if p.z >= z => {}
                _ => *cell = Some((index, p.z)),
            }
        }

        self.picks.clear();
        self.picks
            .extend(self.cells.iter().flatten().map(|(index, _)| *index));
        self.picks.sort_unstable();

        let mut write = 0;
        let mut next_pick = 0;
        for read in 0..count {
            let start = read * point_size;
            if self.picks.get(next_pick) == Some(&read) {
                low_res.extend_from_slice(&records[start..start + point_size]);
                next_pick += 1;
            } else {
                if write != read {
                    records.copy_within(start..start + point_size, write * point_size);
                }
                write += 1;
            }
        }

        self.picks.len() as u32
    }
}
