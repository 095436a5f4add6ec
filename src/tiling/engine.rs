//! In-place bucket sort of one segment into tile-contiguous order.

use std::sync::Arc;

use crate::config::TilingConfig;
use crate::error::{Result, TileError};
use crate::geometry::{QUANTIZED_POINT_SIZE, QuantizedExtent3D, QuantizedPoint3D};
use crate::io::{BufferPool, PooledBuffer, ProgressReporter, ScopedProgress, report};
use crate::source::PointSource;
use crate::storage::ContainerWriter;

use super::grid::GridLayout;
use super::order::{TileKey, TileOrder};
use super::tile_set::TileSet;

/// A segment's records, grouped by tile in enumeration order.
pub struct SortedSegment {
    tile_set: TileSet,
    buffer: PooledBuffer,
    point_size: usize,
}

impl SortedSegment {
    pub fn tile_set(&self) -> &TileSet {
        &self.tile_set
    }

    pub fn point_size(&self) -> usize {
        self.point_size
    }

    /// All records, tile after tile.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Records of one tile. Empty for tiles without points.
    pub fn tile_bytes(&self, key: TileKey) -> &[u8] {
        match self.tile_set.tile(key) {
            Some(tile) if tile.is_valid() => {
                let start = tile.point_offset as usize * self.point_size;
                &self.buffer[start..start + tile.point_count as usize * self.point_size]
            }
            _ => &[],
        }
    }

    /// Hand every valid tile to `writer` in enumeration order.
    pub fn write_to(&mut self, writer: &mut ContainerWriter) -> Result<()> {
        for tile in self.tile_set.valid_tiles() {
            let start = tile.point_offset as usize * self.point_size;
            let end = start + tile.point_count as usize * self.point_size;
            writer.write_tile(tile.key, &mut self.buffer[start..end], Some(tile.quantized_extent))?;
        }
        Ok(())
    }
}

/// Sorts bounded point sets into tile order on a fixed grid.
pub struct TilingEngine<'a> {
    layout: GridLayout,
    order: TileOrder,
    config: &'a TilingConfig,
    pool: &'a Arc<BufferPool>,
}

impl<'a> TilingEngine<'a> {
    pub fn new(
        layout: GridLayout,
        order: TileOrder,
        config: &'a TilingConfig,
        pool: &'a Arc<BufferPool>,
    ) -> Self {
        Self {
            layout,
            order,
            config,
            pool,
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Load every record of `source` into one buffer and sort it by tile.
    ///
    /// Progress covers the counting pass for the first half and the
    /// permutation for the second.
    pub fn tile_segment(
        &self,
        source: &dyn PointSource,
        progress: &dyn ProgressReporter,
    ) -> Result<SortedSegment> {
        let point_size = source.point_size_bytes();
        if point_size < QUANTIZED_POINT_SIZE {
            return Err(TileError::InvalidInput(format!(
                "point size {} is smaller than {}",
                point_size, QUANTIZED_POINT_SIZE
            )));
        }
        let data_size = usize::try_from(source.data_size()).map_err(|_| {
            TileError::FatalConfiguration(format!(
                "segment of {} bytes does not fit in memory",
                source.data_size()
            ))
        })?;

        let counting = ScopedProgress::new(progress, 0.0, 0.5);
        let (buffer, counts, bounds) = self.count_and_load(source, data_size, &counting)?;

        let mut tile_set = TileSet::from_counts(self.layout, self.order, &counts)?;
        for row in 0..self.layout.rows() {
            for col in 0..self.layout.cols() {
                let key = TileKey::new(col, row);
                if let Some(tile) = tile_set.tile_mut(key) {
                    tile.quantized_extent = bounds[self.layout.index_of(key)];
                }
            }
        }

        let mut segment = SortedSegment {
            tile_set,
            buffer,
            point_size,
        };
        let permuting = ScopedProgress::new(progress, 0.5, 0.5);
        permute(&mut segment, &permuting)?;

        log::debug!(
            "sorted {} points into {} tiles",
            segment.tile_set.point_count(),
            segment.tile_set.valid_tile_count()
        );
        Ok(segment)
    }

    fn count_and_load(
        &self,
        source: &dyn PointSource,
        data_size: usize,
        progress: &dyn ProgressReporter,
    ) -> Result<(PooledBuffer, Vec<u32>, Vec<QuantizedExtent3D>)> {
        let point_size = source.point_size_bytes();
        let mut buffer = self.pool.acquire_len(data_size);
        let mut counts = vec![0u32; self.layout.tile_count()];
        let mut bounds = vec![QuantizedExtent3D::empty(); self.layout.tile_count()];

        let mut chunks = source.chunks(self.pool, self.config)?;
        let mut filled = 0usize;
        while let Some(chunk) = chunks.next_chunk()? {
            let end = filled + chunk.len();
            if end > data_size {
                return Err(TileError::InvalidInput(
                    "source yielded more records than it reported".to_string(),
                ));
            }
            buffer[filled..end].copy_from_slice(chunk);
            filled = end;

            for record in chunk.chunks_exact(point_size) {
                let p = QuantizedPoint3D::read_from(record);
                let index = self.layout.tile_index_of(&p);
                counts[index] = counts[index].checked_add(1).ok_or_else(|| {
                    TileError::FatalConfiguration(
                        "a tile exceeds the per-tile point limit".to_string(),
                    )
                })?;
                bounds[index].include(&p);
            }
            report(progress, chunks.progress())?;
        }

        if filled != data_size {
            return Err(TileError::InvalidInput(format!(
                "source yielded {} of {} bytes",
                filled, data_size
            )));
        }
        Ok((buffer, counts, bounds))
    }
}

/// Cycle records into their tiles. Each tile has a cursor starting at its
/// first record; a misplaced record is swapped with the record under its
/// target tile's cursor, and that cursor advances.
fn permute(segment: &mut SortedSegment, progress: &dyn ProgressReporter) -> Result<()> {
    let point_size = segment.point_size;
    let layout = *segment.tile_set.layout();
    let slots = segment.tile_set.slot_table();

    let mut cursors = Vec::with_capacity(segment.tile_set.valid_tile_count());
    let mut ends = Vec::with_capacity(segment.tile_set.valid_tile_count());
    for tile in segment.tile_set.valid_tiles() {
        let start = tile.point_offset as usize * point_size;
        cursors.push(start);
        ends.push(start + tile.point_count as usize * point_size);
    }

    let buffer: &mut [u8] = &mut segment.buffer;
    let valid = cursors.len();
    for rank in 0..valid {
        while cursors[rank] < ends[rank] {
            let position = cursors[rank];
            let p = QuantizedPoint3D::read_from(&buffer[position..position + point_size]);
            let target = slots[layout.slot_of(&p)] as usize;

            if target == rank {
                cursors[rank] += point_size;
                continue;
            }
            let destination = cursors[target];
            if target < rank || destination >= ends[target] {
                return Err(TileError::InvalidInput(format!(
                    "record at byte {} maps to a tile that is already full",
                    position
                )));
            }
            swap_records(buffer, position, destination, point_size)?;
            cursors[target] += point_size;
        }
        report(progress, (rank + 1) as f32 / valid as f32)?;
    }
    Ok(())
}

/// Exchange the `size`-byte records at `a` and `b`.
pub(crate) fn swap_records(buffer: &mut [u8], a: usize, b: usize, size: usize) -> Result<()> {
    if a == b {
        return Ok(());
    }
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    if high - low < size || high + size > buffer.len() {
        return Err(TileError::InvalidInput(format!(
            "cannot swap {} byte records at {} and {} in a {} byte buffer",
            size,
            low,
            high,
            buffer.len()
        )));
    }
    let (head, tail) = buffer.split_at_mut(high);
    head[low..low + size].swap_with_slice(&mut tail[..size]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point3D, Quantization3D};
    use crate::io::NullProgress;
    use crate::source::PointFile;
    use tempfile::tempdir;

    fn config() -> TilingConfig {
        TilingConfig::default()
            .with_sector_size(512)
            .with_buffer_size(4096)
    }

    fn scattered(n: usize) -> Vec<Point3D> {
        (0..n)
            .map(|i| {
                let x = ((i * 7919) % 1000) as f64 / 10.0;
                let y = ((i * 104_729) % 1000) as f64 / 10.0;
                Point3D::new(x, y, (i % 13) as f64)
            })
            .collect()
    }

    #[test]
    fn test_swap_records_bounds() {
        let mut buf: Vec<u8> = (0..12).collect();
        swap_records(&mut buf, 0, 8, 4).unwrap();
        assert_eq!(buf, vec![8, 9, 10, 11, 4, 5, 6, 7, 0, 1, 2, 3]);
        swap_records(&mut buf, 4, 4, 4).unwrap();

        assert!(swap_records(&mut buf, 0, 2, 4).is_err());
        assert!(swap_records(&mut buf, 0, 10, 4).is_err());
    }

    #[test]
    fn test_every_record_lands_in_its_tile() {
        let dir = tempdir().unwrap();
        let q = Quantization3D::new([0.01; 3], [0.0; 3]).unwrap();
        let source = PointFile::create(dir.path().join("p.bin"), &scattered(5000), Some(q)).unwrap();
        let cfg = config();
        let pool = BufferPool::new(cfg.buffer_size);

        for order in [TileOrder::RowMajor, TileOrder::Tree] {
            let layout = GridLayout::new(7, 5, *source.extent(), source.quantization());
            let engine = TilingEngine::new(layout, order, &cfg, &pool);
            let segment = engine.tile_segment(&source, &NullProgress).unwrap();

            assert_eq!(segment.tile_set().point_count(), 5000);
            for tile in segment.tile_set().valid_tiles() {
                let bytes = segment.tile_bytes(tile.key);
                assert_eq!(bytes.len(), tile.point_count as usize * 12);
                for record in bytes.chunks_exact(12) {
                    let p = QuantizedPoint3D::read_from(record);
                    assert_eq!(layout.tile_of(&p), tile.key);
                    assert!(tile.quantized_extent.contains(&p));
                }
            }
        }
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_conserves_records() {
        let dir = tempdir().unwrap();
        let source = PointFile::create(dir.path().join("p.bin"), &scattered(3000), None).unwrap();
        let original = std::fs::read(source.path()).unwrap();

        let cfg = config();
        let pool = BufferPool::new(cfg.buffer_size);
        let layout = GridLayout::new(4, 4, *source.extent(), source.quantization());
        let segment = TilingEngine::new(layout, TileOrder::Tree, &cfg, &pool)
            .tile_segment(&source, &NullProgress)
            .unwrap();

        let mut before: Vec<_> = original.chunks_exact(12).collect();
        let mut after: Vec<_> = segment.data().chunks_exact(12).collect();
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);
    }

    #[test]
    fn test_max_edge_points_go_to_last_tile() {
        let dir = tempdir().unwrap();
        let points = vec![
            Point3D::new(0.0, 0.0, 0.0),
            Point3D::new(10.0, 10.0, 1.0),
            Point3D::new(10.0, 0.0, 2.0),
            Point3D::new(0.0, 10.0, 3.0),
        ];
        let q = Quantization3D::new([0.01; 3], [0.0; 3]).unwrap();
        let source = PointFile::create(dir.path().join("p.bin"), &points, Some(q)).unwrap();
        let cfg = config();
        let pool = BufferPool::new(cfg.buffer_size);
        let layout = GridLayout::new(2, 2, *source.extent(), source.quantization());
        let segment = TilingEngine::new(layout, TileOrder::RowMajor, &cfg, &pool)
            .tile_segment(&source, &NullProgress)
            .unwrap();

        for key in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let tile = segment.tile_set().tile(TileKey::new(key.0, key.1)).unwrap();
            assert_eq!(tile.point_count, 1, "tile {:?}", key);
        }
    }

    #[test]
    fn test_cancellation_releases_buffers() {
        struct StopAt(std::sync::atomic::AtomicUsize);
        impl ProgressReporter for StopAt {
            fn update(&self, _ratio: f32) -> bool {
                self.0.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) > 1
            }
        }

        let dir = tempdir().unwrap();
        let source = PointFile::create(dir.path().join("p.bin"), &scattered(2000), None).unwrap();
        let cfg = config();
        let pool = BufferPool::new(cfg.buffer_size);
        let layout = GridLayout::new(3, 3, *source.extent(), source.quantization());
        let engine = TilingEngine::new(layout, TileOrder::RowMajor, &cfg, &pool);

        let result = engine.tile_segment(&source, &StopAt(3.into()));
        assert!(matches!(result, Err(TileError::Cancelled)));
        assert_eq!(pool.outstanding(), 0);
    }
}
