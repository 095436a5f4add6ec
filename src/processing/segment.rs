//! Out-of-core tiling: split, tile each part, merge.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::config::TilingConfig;
use crate::error::{Result, TileError};
use crate::io::{BufferPool, PhaseTimer, ProgressReporter, ScopedProgress, WeightedProgress, report};
use crate::source::{PointRange, PointSource};
use crate::storage::{ContainerWriter, TileSource, WriterOptions};
use crate::tiling::{DensityEstimate, TileSet, TilingEngine};

/// Share of the progress range spent tiling segments; the rest is the merge.
const TILING_SHARE: f32 = 0.8;

/// Split `count` points into the fewest contiguous ranges whose data fits
/// `budget` bytes. The first `count % n` ranges take one extra point.
pub fn segment_ranges(count: u64, point_size: usize, budget: u64) -> Result<Vec<PointRange>> {
    let data_size = count * point_size as u64;
    let segments = data_size.div_ceil(budget.max(1)).max(1);
    if segments > count.max(1) {
        return Err(TileError::FatalConfiguration(format!(
            "segment budget of {} bytes cannot hold a single {} byte point",
            budget, point_size
        )));
    }

    let base = count / segments;
    let extra = count % segments;
    let mut ranges = Vec::with_capacity(segments as usize);
    let mut start = 0;
    for index in 0..segments {
        let len = base + u64::from(index < extra);
        ranges.push(PointRange::new(start, len));
        start += len;
    }
    Ok(ranges)
}

/// Removes the listed files when dropped.
struct TempFiles(Vec<PathBuf>);

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("failed to remove segment {}: {}", path.display(), e),
            }
        }
    }
}

/// Tiles a source that does not fit one buffer.
///
/// Every segment is sorted on the same grid into its own temporary container,
/// then tiles are concatenated segment by segment into the output.
pub struct SegmentCoordinator<'a> {
    source: &'a dyn PointSource,
    output: &'a Path,
    config: &'a TilingConfig,
    pool: &'a Arc<BufferPool>,
}

impl<'a> SegmentCoordinator<'a> {
    pub fn new(
        source: &'a dyn PointSource,
        output: &'a Path,
        config: &'a TilingConfig,
        pool: &'a Arc<BufferPool>,
    ) -> Self {
        Self {
            source,
            output,
            config,
            pool,
        }
    }

    pub fn ranges(&self) -> Result<Vec<PointRange>> {
        segment_ranges(
            self.source.count(),
            self.source.point_size_bytes(),
            self.config.max_segment_bytes,
        )
    }

    fn temp_path(&self, index: usize) -> PathBuf {
        let name = self
            .output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tiles".to_string());
        self.output
            .with_file_name(format!("{}.seg{}-{}", name, index, Uuid::new_v4().simple()))
    }

    pub fn run(&self, estimate: &DensityEstimate, progress: &dyn ProgressReporter) -> Result<TileSource> {
        let ranges = self.ranges()?;
        let temps = TempFiles((0..ranges.len()).map(|i| self.temp_path(i)).collect());
        log::info!(
            "Tiling {} points in {} segments{}",
            self.source.count(),
            ranges.len(),
            if self.config.parallel_segments { " in parallel" } else { "" }
        );

        let tiling = ScopedProgress::new(progress, 0.0, TILING_SHARE);
        let weights: Vec<u64> = ranges.iter().map(|r| r.count).collect();
        let weighted = WeightedProgress::new(&tiling, &weights);

        let timer = PhaseTimer::start();
        let parts: Vec<TileSource> = if self.config.parallel_segments {
            ranges
                .par_iter()
                .zip(temps.0.par_iter())
                .enumerate()
                .map(|(index, (range, path))| {
                    self.tile_range(estimate, *range, path, &weighted.part(index))
                })
                .collect::<Result<_>>()?
        } else {
            ranges
                .iter()
                .zip(&temps.0)
                .enumerate()
                .map(|(index, (range, path))| {
                    self.tile_range(estimate, *range, path, &weighted.part(index))
                })
                .collect::<Result<_>>()?
        };
        timer.finish(progress, &format!("Tiled {} segments", parts.len()));

        let timer = PhaseTimer::start();
        let merging = ScopedProgress::new(progress, TILING_SHARE, 1.0 - TILING_SHARE);
        let merged = self.merge(estimate, &parts, &merging)?;
        timer.finish(progress, "Merged segments");

        drop(parts);
        drop(temps);
        Ok(merged)
    }

    fn tile_range(
        &self,
        estimate: &DensityEstimate,
        range: PointRange,
        path: &Path,
        progress: &dyn ProgressReporter,
    ) -> Result<TileSource> {
        let part = self.source.segment(range.start, range.count)?;
        let engine = TilingEngine::new(estimate.layout, self.config.tile_order, self.config, self.pool);
        let mut sorted = engine.tile_segment(part.as_ref(), progress)?;

        let mut writer = ContainerWriter::create(
            path,
            sorted.tile_set(),
            *self.source.quantization(),
            estimate.z_statistics,
            sorted.point_size(),
            &WriterOptions::for_segment(self.config),
            self.pool,
        )?;
        sorted.write_to(&mut writer)?;
        let written = writer.finish()?;

        log::debug!(
            "segment [{}, {}) -> {} ({} tiles)",
            range.start,
            range.end(),
            path.display(),
            written.tile_set().valid_tile_count()
        );
        Ok(written)
    }

    /// Concatenate each tile's records across segments, in segment order.
    fn merge(
        &self,
        estimate: &DensityEstimate,
        parts: &[TileSource],
        progress: &dyn ProgressReporter,
    ) -> Result<TileSource> {
        let quantization = *self.source.quantization();
        let point_size = self.source.point_size_bytes();
        for part in parts {
            if !part.quantization().is_compatible(&quantization) {
                return Err(TileError::IncompatibleQuantization);
            }
            if part.point_size_bytes() != point_size {
                return Err(TileError::FatalConfiguration(
                    "segments disagree on the point size".to_string(),
                ));
            }
        }

        let sets: Vec<&TileSet> = parts.iter().map(|p| p.tile_set()).collect();
        let merged = TileSet::merge(&sets)?;

        let mut writer = ContainerWriter::create(
            self.output,
            &merged,
            quantization,
            estimate.z_statistics,
            point_size,
            &WriterOptions::from_config(self.config),
            self.pool,
        )?;

        let total = merged.valid_tile_count().max(1);
        for (index, tile) in merged.valid_tiles().enumerate() {
            let len = tile.point_count as usize * point_size;
            if len as u64 > self.config.max_segment_bytes {
                return Err(TileError::FatalConfiguration(format!(
                    "tile ({}, {}) holds {} bytes, above the {} byte buffer budget",
                    tile.col(),
                    tile.row(),
                    len,
                    self.config.max_segment_bytes
                )));
            }

            let mut buffer = self.pool.acquire_len(len);
            let mut filled = 0;
            for part in parts {
                if let Some(piece) = part.tile_set().tile(tile.key)
                    && piece.is_valid()
                {
                    filled += part.load_tile(piece, &mut buffer[filled..])?;
                }
            }
            if filled != len {
                return Err(TileError::Format(format!(
                    "segments hold {} bytes for tile ({}, {}), expected {}",
                    filled,
                    tile.col(),
                    tile.row(),
                    len
                )));
            }

            writer.write_tile(tile.key, &mut buffer[..len], Some(tile.quantized_extent))?;
            report(progress, (index + 1) as f32 / total as f32)?;
        }

        writer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranges_are_balanced() {
        let ranges = segment_ranges(10, 12, 48).unwrap();
        assert_eq!(
            ranges,
            vec![PointRange::new(0, 4), PointRange::new(4, 3), PointRange::new(7, 3)]
        );

        let single = segment_ranges(10, 12, 1 << 20).unwrap();
        assert_eq!(single, vec![PointRange::new(0, 10)]);
    }

    #[test]
    fn test_ranges_cover_everything() {
        for (count, budget) in [(1000u64, 1200u64), (7, 12), (12345, 4096)] {
            let ranges = segment_ranges(count, 12, budget).unwrap();
            assert_eq!(ranges.iter().map(|r| r.count).sum::<u64>(), count);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end(), pair[1].start);
                assert!(pair[0].count >= pair[1].count);
                assert!(pair[0].count - pair[1].count <= 1);
            }
            assert!(ranges.iter().all(|r| r.count * 12 <= budget));
        }
    }

    #[test]
    fn test_budget_below_one_point() {
        assert!(matches!(
            segment_ranges(10, 12, 11),
            Err(TileError::FatalConfiguration(_))
        ));
    }
}
