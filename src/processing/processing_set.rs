//! End-to-end orchestration: cache check, estimation, tiling, persistence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::TilingConfig;
use crate::error::{Result, TileError};
use crate::io::{BufferPool, PhaseTimer, ProgressReporter, ScopedProgress, report};
use crate::source::PointSource;
use crate::storage::{ContainerWriter, TileSource, WriterOptions};
use crate::tiling::{DensityEstimate, TilingEngine};

use super::segment::SegmentCoordinator;

/// Share of the progress range spent on density estimation.
const ESTIMATION_SHARE: f32 = 0.2;

/// A point source bound to the container it is tiled into.
pub struct ProcessingSet {
    source: Arc<dyn PointSource>,
    output: PathBuf,
    config: TilingConfig,
    pool: Arc<BufferPool>,
}

impl std::fmt::Debug for ProcessingSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingSet")
            .field("source", &self.source.path())
            .field("output", &self.output)
            .field("config", &self.config)
            .finish()
    }
}

impl ProcessingSet {
    pub fn new<P: Into<PathBuf>>(
        source: Arc<dyn PointSource>,
        output: P,
        config: TilingConfig,
        pool: Arc<BufferPool>,
    ) -> Result<Self> {
        config.validate().map_err(TileError::Config)?;
        Ok(Self {
            source,
            output: output.into(),
            config,
            pool,
        })
    }

    pub fn source(&self) -> &dyn PointSource {
        self.source.as_ref()
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn config(&self) -> &TilingConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Produce the tiled container, reusing a valid cached one.
    ///
    /// Returns `Ok(None)` when cancelled; no output file is left behind.
    pub fn process(&self, progress: &dyn ProgressReporter) -> Result<Option<TileSource>> {
        if let Some(cached) = self.open_cached()? {
            progress.log(&format!("Reusing {}", self.output.display()));
            return Ok(Some(cached));
        }

        let timer = PhaseTimer::start();
        match self.generate(progress) {
            Ok(tiles) => {
                timer.finish(progress, "Processing completed");
                Ok(Some(tiles))
            }
            Err(TileError::Cancelled) => {
                progress.log("Processing cancelled");
                self.remove_output();
                Ok(None)
            }
            Err(e) => {
                self.remove_output();
                Err(e)
            }
        }
    }

    /// [`ProcessingSet::process`] for interactive callers: failures are
    /// logged and reported as `None`.
    pub fn process_or_log(&self, progress: &dyn ProgressReporter) -> Option<TileSource> {
        match self.process(progress) {
            Ok(tiles) => tiles,
            Err(e) => {
                log::error!("Tiling {} failed: {}", self.source.path().display(), e);
                None
            }
        }
    }

    fn open_cached(&self) -> Result<Option<TileSource>> {
        if !self.config.reuse_cache || !self.output.exists() {
            return Ok(None);
        }

        let reason = match TileSource::open_with_pool(&self.output, &self.pool) {
            Ok(cached) => {
                if cached.tile_set().point_count() == self.source.count()
                    && cached.point_size_bytes() == self.source.point_size_bytes()
                    && cached.quantization().is_compatible(self.source.quantization())
                {
                    return Ok(Some(cached));
                }
                "it does not match the source".to_string()
            }
            Err(e @ (TileError::Format(_) | TileError::CompressionUnavailable(_))) => e.to_string(),
            Err(e) => return Err(e),
        };

        log::warn!(
            "Cache invalid; regenerating {} ({})",
            self.output.display(),
            reason
        );
        std::fs::remove_file(&self.output)?;
        Ok(None)
    }

    fn generate(&self, progress: &dyn ProgressReporter) -> Result<TileSource> {
        let source = self.source.as_ref();
        let point_size = source.point_size_bytes();

        let estimating = ScopedProgress::new(progress, 0.0, ESTIMATION_SHARE);
        let estimate = DensityEstimate::estimate(source, &self.config, &self.pool, &estimating)?;
        estimate.check_budget(point_size, self.config.max_segment_bytes)?;

        let tiling = ScopedProgress::new(progress, ESTIMATION_SHARE, 1.0 - ESTIMATION_SHARE);
        let data_size = source.data_size();
        let tiles = if data_size <= self.config.max_segment_bytes {
            self.tile_direct(&estimate, &tiling)?
        } else if self.config.allow_segmentation {
            SegmentCoordinator::new(source, &self.output, &self.config, &self.pool)
                .run(&estimate, &tiling)?
        } else {
            return Err(TileError::FatalConfiguration(format!(
                "{} bytes of points exceed the {} byte buffer budget and segmentation is disabled",
                data_size, self.config.max_segment_bytes
            )));
        };

        report(progress, 1.0)?;
        Ok(tiles)
    }

    fn tile_direct(&self, estimate: &DensityEstimate, progress: &dyn ProgressReporter) -> Result<TileSource> {
        let timer = PhaseTimer::start();
        let engine = TilingEngine::new(estimate.layout, self.config.tile_order, &self.config, &self.pool);
        let mut sorted = engine.tile_segment(self.source.as_ref(), progress)?;

        let mut writer = ContainerWriter::create(
            &self.output,
            sorted.tile_set(),
            *self.source.quantization(),
            estimate.z_statistics,
            sorted.point_size(),
            &WriterOptions::from_config(&self.config),
            &self.pool,
        )?;
        sorted.write_to(&mut writer)?;
        drop(sorted);
        let tiles = writer.finish()?;

        timer.finish(
            progress,
            &format!(
                "Tiled {} points into {} tiles",
                tiles.tile_set().point_count(),
                tiles.tile_set().valid_tile_count()
            ),
        );
        Ok(tiles)
    }

    fn remove_output(&self) {
        match std::fs::remove_file(&self.output) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove {}: {}", self.output.display(), e),
        }
    }
}
