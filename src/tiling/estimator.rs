//! Streaming density estimation and final grid sizing.

use std::sync::Arc;

use crate::config::TilingConfig;
use crate::error::{Result, TileError};
use crate::geometry::{Extent3D, QuantizedPoint3D};
use crate::io::{BufferPool, PhaseTimer, ProgressReporter, report};
use crate::source::PointSource;

use super::density::TileDensity;
use super::grid::GridLayout;
use super::stats::{ZHistogram, ZStatistics};

/// Result of one pass over a point source.
#[derive(Debug, Clone)]
pub struct DensityEstimate {
    pub point_count: u64,
    /// The fine grid the points were counted on
    pub estimation_layout: GridLayout,
    /// Row-major counts on `estimation_layout`
    pub counts: Vec<u32>,
    /// Occupancy of the estimation grid
    pub density: TileDensity,
    pub z_statistics: ZStatistics,
    /// The grid the data will be tiled on
    pub layout: GridLayout,
    /// Estimated row-major counts on `layout`
    pub projected_counts: Vec<u32>,
}

impl DensityEstimate {
    /// Count every point of `source` on a grid finer than the final one and
    /// derive the final grid from the median cell density.
    pub fn estimate(
        source: &dyn PointSource,
        config: &TilingConfig,
        pool: &Arc<BufferPool>,
        progress: &dyn ProgressReporter,
    ) -> Result<Self> {
        let timer = PhaseTimer::start();
        let point_size = source.point_size_bytes();
        let extent = *source.extent();
        let quantization = *source.quantization();
        let count = source.count();

        let (est_cols, est_rows) = estimation_dimensions(&extent, count, config);
        let estimation_layout = GridLayout::new(est_cols, est_rows, extent, &quantization);
        let mut counts = vec![0u32; estimation_layout.tile_count()];

        let qz = estimation_layout.quantized_extent();
        let mut histogram = ZHistogram::new(qz.min.z, qz.max.z, config.z_histogram_bins);

        let mut chunks = source.chunks(pool, config)?;
        let mut seen = 0u64;
        while let Some(chunk) = chunks.next_chunk()? {
            for record in chunk.chunks_exact(point_size) {
                let p = QuantizedPoint3D::read_from(record);
                let cell = &mut counts[estimation_layout.tile_index_of(&p)];
                *cell = cell.saturating_add(1);
                histogram.add(p.z);
                seen += 1;
            }
            report(progress, chunks.progress())?;
        }

        if seen != count {
            return Err(TileError::InvalidInput(format!(
                "source reported {} points but yielded {}",
                count, seen
            )));
        }

        let density = TileDensity::from_counts(
            counts.iter().copied(),
            counts.len() as u32,
            extent.area(),
        );
        let z_statistics =
            histogram.statistics(quantization.scale[2], quantization.offset[2]);

        let (cols, rows) = final_dimensions(&extent, &density, est_cols, est_rows, config);
        let layout = GridLayout::new(cols, rows, extent, &quantization);
        let projected_counts = project(&estimation_layout, &counts, &layout);

        timer.finish(
            progress,
            &format!(
                "Estimated density ({}x{} -> {}x{} tiles, median {} per cell)",
                est_cols, est_rows, cols, rows, density.median_tile_count
            ),
        );

        Ok(Self {
            point_count: count,
            estimation_layout,
            counts,
            density,
            z_statistics,
            layout,
            projected_counts,
        })
    }

    /// Fail when the largest projected tile cannot be held in one buffer.
    pub fn check_budget(&self, point_size: usize, budget: u64) -> Result<()> {
        let largest = self.projected_counts.iter().copied().max().unwrap_or(0) as u64;
        let bytes = largest * point_size as u64;
        if bytes > budget {
            return Err(TileError::FatalConfiguration(format!(
                "largest tile needs about {} bytes, above the {} byte buffer budget",
                bytes, budget
            )));
        }
        Ok(())
    }
}

fn clamp_cells(value: f64) -> u16 {
    if value.is_finite() {
        value.ceil().clamp(1.0, u16::MAX as f64) as u16
    } else {
        1
    }
}

/// Grid dimensions for `cells` square-ish cells over `extent`.
fn dimensions_for_side(extent: &Extent3D, side: f64) -> (u16, u16) {
    let cols = if extent.range_x() > 0.0 { clamp_cells(extent.range_x() / side) } else { 1 };
    let rows = if extent.range_y() > 0.0 { clamp_cells(extent.range_y() / side) } else { 1 };
    (cols, rows)
}

fn dimensions_for_cells(extent: &Extent3D, cells: u64) -> (u16, u16) {
    let cells = cells.max(1);
    match (extent.range_x() > 0.0, extent.range_y() > 0.0) {
        (false, false) => (1, 1),
        (true, false) => (clamp_cells(cells as f64), 1),
        (false, true) => (1, clamp_cells(cells as f64)),
        (true, true) => dimensions_for_side(extent, (extent.area() / cells as f64).sqrt()),
    }
}

/// Expected final tile count, refined `refinement²` times.
pub fn estimation_dimensions(extent: &Extent3D, count: u64, config: &TilingConfig) -> (u16, u16) {
    let desired = config.desired_points_per_tile.max(1) as u64;
    let tiles = count.div_ceil(desired).clamp(1, config.max_tiles_for_estimation.max(1) as u64);
    let refinement = config.estimation_refinement.max(1) as u64;
    dimensions_for_cells(extent, tiles * refinement * refinement)
}

/// Final grid from the median estimation-cell density, capped by the tile
/// limit and never finer than the estimation grid.
pub fn final_dimensions(
    extent: &Extent3D,
    density: &TileDensity,
    est_cols: u16,
    est_rows: u16,
    config: &TilingConfig,
) -> (u16, u16) {
    let max_tiles = config.max_tiles_for_estimation.max(1) as u64;
    let desired = config.desired_points_per_tile.max(1) as f64;

    let (mut cols, mut rows) = if density.median_tile_density > 0.0 && extent.area() > 0.0 {
        let mut side = (desired / density.median_tile_density).sqrt();
        let (mut cols, mut rows) = dimensions_for_side(extent, side);
        while cols as u64 * rows as u64 > max_tiles {
            let excess = (cols as u64 * rows as u64) as f64 / max_tiles as f64;
            side *= excess.sqrt() * 1.001;
            (cols, rows) = dimensions_for_side(extent, side);
        }
        (cols, rows)
    } else {
        let tiles = density.point_count.div_ceil(desired as u64).clamp(1, max_tiles);
        dimensions_for_cells(extent, tiles)
    };

    cols = cols.min(est_cols).max(1);
    rows = rows.min(est_rows).max(1);
    (cols, rows)
}

/// Redistribute estimation counts onto `target` by cell center.
fn project(source: &GridLayout, counts: &[u32], target: &GridLayout) -> Vec<u32> {
    let mut projected = vec![0u32; target.tile_count()];
    for row in 0..source.rows() {
        let (y0, y1) = source.row_bounds(row);
        for col in 0..source.cols() {
            let count = counts[row as usize * source.cols() as usize + col as usize];
            if count == 0 {
                continue;
            }
            let (x0, x1) = source.col_bounds(col);
            let center = QuantizedPoint3D::new(
                ((x0 + x1) / 2).min(u32::MAX as u64) as u32,
                ((y0 + y1) / 2).min(u32::MAX as u64) as u32,
                0,
            );
            let cell = &mut projected[target.tile_index_of(&center)];
            *cell = cell.saturating_add(count);
        }
    }
    projected
}
