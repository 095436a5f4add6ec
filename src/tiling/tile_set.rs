//! The tile grid index.

use std::collections::VecDeque;

use crate::error::{Result, TileError};
use crate::geometry::Extent3D;

use super::density::TileDensity;
use super::grid::GridLayout;
use super::order::{TileKey, TileOrder};
use super::tile::Tile;

/// Per-tile fields persisted in a container header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRecord {
    pub key: TileKey,
    pub point_count: u32,
    pub low_res_count: u32,
    pub storage_size: u64,
}

/// A sized grid of tiles plus its enumeration order.
///
/// Built once. Tiles are updated in place while tiling but the grid is never
/// resized or reordered.
#[derive(Debug, Clone)]
pub struct TileSet {
    layout: GridLayout,
    order: TileOrder,
    /// Row-major
    tiles: Vec<Tile>,
    /// Row-major indices of every tile in enumeration order
    enumeration: Vec<u32>,
    /// Row-major indices of valid tiles in enumeration order
    valid: Vec<u32>,
    density: TileDensity,
    point_count: u64,
}

impl TileSet {
    /// Assign point offsets from a row-major counts grid.
    pub fn from_counts(layout: GridLayout, order: TileOrder, counts: &[u32]) -> Result<Self> {
        if counts.len() != layout.tile_count() {
            return Err(TileError::InvalidInput(format!(
                "counts grid has {} cells, expected {}",
                counts.len(),
                layout.tile_count()
            )));
        }

        let mut set = Self::empty(layout, order);
        for (tile, count) in set.tiles.iter_mut().zip(counts) {
            tile.point_count = *count;
        }
        set.assign_offsets();
        Ok(set)
    }

    /// Rebuild from persisted records listed in enumeration order.
    pub fn from_records(layout: GridLayout, order: TileOrder, records: &[TileRecord]) -> Result<Self> {
        let mut set = Self::empty(layout, order);

        let mut rank = vec![u32::MAX; set.tiles.len()];
        for (position, index) in set.enumeration.iter().enumerate() {
            rank[*index as usize] = position as u32;
        }

        let mut last_rank = None;
        for record in records {
            if record.key.col >= layout.cols() || record.key.row >= layout.rows() {
                return Err(TileError::Format(format!(
                    "tile ({}, {}) outside {}x{} grid",
                    record.key.col,
                    record.key.row,
                    layout.cols(),
                    layout.rows()
                )));
            }
            if record.point_count == 0 || record.low_res_count > record.point_count {
                return Err(TileError::Format(format!(
                    "tile ({}, {}) has invalid counts",
                    record.key.col, record.key.row
                )));
            }
            let index = layout.index_of(record.key);
            if last_rank.is_some_and(|last| rank[index] <= last) {
                return Err(TileError::Format(
                    "tile records are not in enumeration order".to_string(),
                ));
            }
            last_rank = Some(rank[index]);

            let tile = &mut set.tiles[index];
            tile.point_count = record.point_count;
            tile.low_res_count = record.low_res_count;
            tile.storage_size = record.storage_size;
            tile.quantized_extent = layout.tile_quantized_extent(record.key);
        }

        set.assign_offsets();
        Ok(set)
    }

    /// Sum the counts of structurally identical tile sets.
    pub fn merge(sets: &[&TileSet]) -> Result<Self> {
        let first = sets
            .first()
            .ok_or_else(|| TileError::InvalidInput("no tile sets to merge".to_string()))?;

        if sets
            .iter()
            .any(|s| !s.layout.same_grid(&first.layout) || s.order != first.order)
        {
            return Err(TileError::FatalConfiguration(
                "tile sets do not share the same grid".to_string(),
            ));
        }

        let mut merged = Self::empty(first.layout, first.order);
        for set in sets {
            for (target, tile) in merged.tiles.iter_mut().zip(&set.tiles) {
                target.point_count = target
                    .point_count
                    .checked_add(tile.point_count)
                    .ok_or_else(|| {
                        TileError::FatalConfiguration(format!(
                            "tile ({}, {}) exceeds the per-tile point limit",
                            tile.key.col, tile.key.row
                        ))
                    })?;
                if tile.is_valid() {
                    target.quantized_extent = target.quantized_extent.union(&tile.quantized_extent);
                }
            }
        }
        merged.assign_offsets();
        Ok(merged)
    }

    fn empty(layout: GridLayout, order: TileOrder) -> Self {
        let tiles = (0..layout.rows())
            .flat_map(|row| (0..layout.cols()).map(move |col| Tile::new(TileKey::new(col, row))))
            .collect();
        let enumeration = order
            .enumerate(layout.cols(), layout.rows())
            .into_iter()
            .map(|key| layout.index_of(key) as u32)
            .collect();

        Self {
            layout,
            order,
            tiles,
            enumeration,
            valid: Vec::new(),
            density: TileDensity::default(),
            point_count: 0,
        }
    }

    /// Prefix sums over enumeration order, valid ranks and density.
    fn assign_offsets(&mut self) {
        let mut offset = 0u64;
        let mut valid = Vec::new();
        for index in &self.enumeration {
            let tile = &mut self.tiles[*index as usize];
            tile.point_offset = offset;
            if tile.is_valid() {
                tile.valid_index = Some(valid.len() as u32);
                valid.push(*index);
                offset += tile.point_count as u64;
            } else {
                tile.valid_index = None;
            }
        }
        self.valid = valid;
        self.point_count = offset;
        self.density = TileDensity::from_counts(
            self.tiles.iter().map(|t| t.point_count),
            self.tiles.len() as u32,
            self.layout.extent().area(),
        );
    }

    /// Lay out storage: high-res runs back to back in enumeration order, then
    /// every tile's low-res run in the same order.
    pub fn assign_storage(&mut self, point_size: usize) -> u64 {
        let mut offset = 0u64;
        for index in &self.valid {
            let tile = &mut self.tiles[*index as usize];
            tile.storage_offset = offset;
            offset += tile.storage_size;
        }
        for index in &self.valid {
            let tile = &mut self.tiles[*index as usize];
            tile.low_res_offset = offset;
            offset += tile.low_res_count as u64 * point_size as u64;
        }
        offset
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn order(&self) -> TileOrder {
        self.order
    }

    pub fn cols(&self) -> u16 {
        self.layout.cols()
    }

    pub fn rows(&self) -> u16 {
        self.layout.rows()
    }

    pub fn extent(&self) -> &Extent3D {
        self.layout.extent()
    }

    pub fn density(&self) -> &TileDensity {
        &self.density
    }

    pub fn point_count(&self) -> u64 {
        self.point_count
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn valid_tile_count(&self) -> usize {
        self.valid.len()
    }

    pub fn low_res_point_count(&self) -> u64 {
        self.valid_tiles().map(|t| t.low_res_count as u64).sum()
    }

    pub fn tile(&self, key: TileKey) -> Option<&Tile> {
        if key.col >= self.cols() || key.row >= self.rows() {
            return None;
        }
        self.tiles.get(self.layout.index_of(key))
    }

    pub(crate) fn tile_mut(&mut self, key: TileKey) -> Option<&mut Tile> {
        if key.col >= self.cols() || key.row >= self.rows() {
            return None;
        }
        let index = self.layout.index_of(key);
        self.tiles.get_mut(index)
    }

    /// The tile at fractional grid position `(x_ratio, y_ratio)`, clamped.
    pub fn tile_by_ratio(&self, x_ratio: f64, y_ratio: f64) -> &Tile {
        let col = ((x_ratio.clamp(0.0, 1.0) * self.cols() as f64) as u16).min(self.cols() - 1);
        let row = ((y_ratio.clamp(0.0, 1.0) * self.rows() as f64) as u16).min(self.rows() - 1);
        &self.tiles[self.layout.index_of(TileKey::new(col, row))]
    }

    /// Tiles with points, in enumeration order.
    pub fn valid_tiles(&self) -> impl Iterator<Item = &Tile> + '_ {
        self.valid.iter().map(move |i| &self.tiles[*i as usize])
    }

    /// Every tile, in enumeration order.
    pub fn tiles(&self) -> impl Iterator<Item = &Tile> + '_ {
        self.enumeration.iter().map(move |i| &self.tiles[*i as usize])
    }

    pub fn records(&self) -> Vec<TileRecord> {
        self.valid_tiles()
            .map(|t| TileRecord {
                key: t.key,
                point_count: t.point_count,
                low_res_count: t.low_res_count,
                storage_size: t.storage_size,
            })
            .collect()
    }

    /// Valid rank for every slot of the `(cols + 1) × (rows + 1)` slot table.
    ///
    /// Overflow slots alias the last column/row and empty tiles alias the
    /// nearest valid tile, so a lookup never needs a bounds or validity check.
    pub fn slot_table(&self) -> Vec<u32> {
        let cols = self.cols() as usize;
        let rows = self.rows() as usize;
        let width = cols + 1;
        let mut slots: Vec<Option<u32>> = vec![None; width * (rows + 1)];

        for row in 0..=rows {
            for col in 0..=cols {
                let key = TileKey::new(col.min(cols - 1) as u16, row.min(rows - 1) as u16);
                slots[row * width + col] = self.tiles[self.layout.index_of(key)].valid_index;
            }
        }

        let mut queue: VecDeque<usize> = (0..slots.len()).filter(|i| slots[*i].is_some()).collect();
        while let Some(slot) = queue.pop_front() {
            let value = slots[slot];
            let (row, col) = (slot / width, slot % width);
            let mut neighbours = [None; 4];
            if col > 0 {
                neighbours[0] = Some(slot - 1);
            }
            if col < cols {
                neighbours[1] = Some(slot + 1);
            }
            if row > 0 {
                neighbours[2] = Some(slot - width);
            }
            if row < rows {
                neighbours[3] = Some(slot + width);
            }
            for next in neighbours.into_iter().flatten() {
                if slots[next].is_none() {
                    slots[next] = value;
                    queue.push_back(next);
                }
            }
        }

        slots.into_iter().map(|s| s.unwrap_or(0)).collect()
    }
}

impl PartialEq for TileSet {
    fn eq(&self, other: &Self) -> bool {
        self.layout.same_grid(&other.layout)
            && self.order == other.order
            && self.density == other.density
            && self.records() == other.records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Quantization3D;

    fn layout(cols: u16, rows: u16) -> GridLayout {
        let q = Quantization3D::new([1.0; 3], [0.0; 3]).unwrap();
        GridLayout::new(cols, rows, Extent3D::new(0.0, 0.0, 0.0, 30.0, 30.0, 1.0), &q)
    }

    #[test]
    fn test_offsets_are_prefix_sums() {
        let set = TileSet::from_counts(layout(3, 2), TileOrder::RowMajor, &[5, 0, 3, 0, 7, 1]).unwrap();
        let offsets: Vec<_> = set.valid_tiles().map(|t| (t.key, t.point_offset)).collect();
        assert_eq!(
            offsets,
            vec![
                (TileKey::new(0, 0), 0),
                (TileKey::new(2, 0), 5),
                (TileKey::new(1, 1), 8),
                (TileKey::new(2, 1), 15),
            ]
        );
        assert_eq!(set.point_count(), 16);
        assert_eq!(set.valid_tile_count(), 4);
        assert_eq!(set.tile(TileKey::new(1, 0)).unwrap().valid_index, None);
        assert_eq!(set.tile(TileKey::new(1, 1)).unwrap().valid_index, Some(2));
    }

    #[test]
    fn test_single_shared_cell() {
        let mut counts = vec![0; 9];
        counts[4] = 2;
        let set = TileSet::from_counts(layout(3, 3), TileOrder::RowMajor, &counts).unwrap();
        assert_eq!(set.valid_tile_count(), 1);
        let only: Vec<_> = set.valid_tiles().collect();
        assert_eq!(only[0].point_count, 2);
        assert_eq!(only[0].key, TileKey::new(1, 1));
        assert_eq!(set.tiles().filter(|t| t.point_count == 0).count(), 8);
    }

    #[test]
    fn test_identical_counts_identical_offsets() {
        let counts = [3, 1, 4, 1, 5, 9, 2, 6, 5, 3, 5, 8];
        for order in [TileOrder::RowMajor, TileOrder::Tree] {
            let a = TileSet::from_counts(layout(4, 3), order, &counts).unwrap();
            let b = TileSet::from_counts(layout(4, 3), order, &counts).unwrap();
            let offsets = |s: &TileSet| s.tiles().map(|t| t.point_offset).collect::<Vec<_>>();
            assert_eq!(offsets(&a), offsets(&b));
            assert_eq!(a.point_count(), counts.iter().map(|c| *c as u64).sum::<u64>());
        }
    }

    #[test]
    fn test_merge_sums_counts() {
        let a = TileSet::from_counts(layout(2, 2), TileOrder::RowMajor, &[1, 0, 2, 0]).unwrap();
        let b = TileSet::from_counts(layout(2, 2), TileOrder::RowMajor, &[0, 0, 3, 4]).unwrap();
        let merged = TileSet::merge(&[&a, &b]).unwrap();
        let counts: Vec<_> = merged.tiles().map(|t| t.point_count).collect();
        assert_eq!(counts, vec![1, 0, 5, 4]);
        assert_eq!(merged.point_count(), 10);
    }

    #[test]
    fn test_merge_rejects_different_grids() {
        let a = TileSet::from_counts(layout(2, 2), TileOrder::RowMajor, &[1, 0, 0, 0]).unwrap();
        let b = TileSet::from_counts(layout(1, 4), TileOrder::RowMajor, &[1, 0, 0, 0]).unwrap();
        assert!(matches!(
            TileSet::merge(&[&a, &b]),
            Err(TileError::FatalConfiguration(_))
        ));
    }

    #[test]
    fn test_records_round_trip() {
        let mut set = TileSet::from_counts(layout(3, 2), TileOrder::Tree, &[5, 0, 3, 0, 7, 1]).unwrap();
        set.tile_mut(TileKey::new(1, 1)).unwrap().low_res_count = 2;
        for key in [TileKey::new(0, 0), TileKey::new(2, 0), TileKey::new(1, 1), TileKey::new(2, 1)] {
            let tile = set.tile_mut(key).unwrap();
            tile.storage_size = (tile.point_count - tile.low_res_count) as u64 * 12;
        }
        let end = set.assign_storage(12);
        assert_eq!(end, 16 * 12);

        let rebuilt = TileSet::from_records(*set.layout(), TileOrder::Tree, &set.records()).unwrap();
        assert_eq!(rebuilt, set);
    }

    #[test]
    fn test_records_out_of_order_rejected() {
        let set = TileSet::from_counts(layout(3, 2), TileOrder::RowMajor, &[5, 0, 3, 0, 7, 1]).unwrap();
        let mut records = set.records();
        records.swap(0, 1);
        assert!(matches!(
            TileSet::from_records(*set.layout(), TileOrder::RowMajor, &records),
            Err(TileError::Format(_))
        ));
    }

    #[test]
    fn test_slot_table_aliases() {
        let set = TileSet::from_counts(layout(3, 2), TileOrder::RowMajor, &[5, 0, 3, 0, 0, 1]).unwrap();
        let slots = set.slot_table();
        assert_eq!(slots.len(), 4 * 3);
        // overflow column aliases the last column
        assert_eq!(slots[3], slots[2]);
        // overflow corner aliases the last tile
        assert_eq!(slots[2 * 4 + 3], set.tile(TileKey::new(2, 1)).unwrap().valid_index.unwrap());
        // empty tile picks up a neighbour
        assert!(slots[1] == 0 || slots[1] == 1);
    }

    #[test]
    fn test_tile_by_ratio_clamps() {
        let set = TileSet::from_counts(layout(3, 2), TileOrder::RowMajor, &[1; 6]).unwrap();
        assert_eq!(set.tile_by_ratio(-1.0, 0.0).key, TileKey::new(0, 0));
        assert_eq!(set.tile_by_ratio(1.0, 1.0).key, TileKey::new(2, 1));
        assert_eq!(set.tile_by_ratio(0.5, 0.49).key, TileKey::new(1, 0));
    }
}
