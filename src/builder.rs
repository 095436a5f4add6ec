//! Builder for processing sets
//!
//! Collects the source, output path, configuration and buffer pool for a
//! tiling run and validates them together.

use crate::config::TilingConfig;
use crate::error::{Result, TileError};
use crate::io::BufferPool;
use crate::processing::ProcessingSet;
use crate::source::PointSource;
use std::path::PathBuf;
use std::sync::Arc;

/// Builder for [`ProcessingSet`].
#[derive(Default)]
pub struct TilingBuilder {
    source: Option<Arc<dyn PointSource>>,
    output: Option<PathBuf>,
    config: TilingConfig,
    pool: Option<Arc<BufferPool>>,
}

impl TilingBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Points to tile.
    pub fn source(mut self, source: Arc<dyn PointSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Container to produce (and to reuse when caching is enabled).
    pub fn output<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output = Some(path.into());
        self
    }

    /// Set the tiling configuration.
    pub fn config(mut self, config: TilingConfig) -> Self {
        self.config = config;
        self
    }

    /// Share an existing buffer pool. A fresh pool sized from the
    /// configuration is created otherwise.
    pub fn pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> Result<ProcessingSet> {
        let source = self
            .source
            .ok_or_else(|| TileError::InvalidInput("no point source set".to_string()))?;
        let output = self
            .output
            .ok_or_else(|| TileError::InvalidInput("no output path set".to_string()))?;
        self.config.validate().map_err(TileError::Config)?;

        let pool = self
            .pool
            .unwrap_or_else(|| BufferPool::new(self.config.aligned_buffer_size()));
        ProcessingSet::new(source, output, self.config, pool)
    }
}

impl std::fmt::Debug for TilingBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TilingBuilder")
            .field("source", &self.source.as_ref().map(|s| s.path().to_path_buf()))
            .field("output", &self.output)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point3D;
    use crate::source::PointFile;
    use tempfile::tempdir;

    fn source(dir: &std::path::Path) -> Arc<dyn PointSource> {
        let points: Vec<_> = (0..10).map(|i| Point3D::new(i as f64, i as f64, 0.0)).collect();
        Arc::new(PointFile::create(dir.join("points.bin"), &points, None).unwrap())
    }

    #[test]
    fn test_builder_requires_source_and_output() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            TilingBuilder::new().output(dir.path().join("out.tiles")).build(),
            Err(TileError::InvalidInput(_))
        ));
        assert!(matches!(
            TilingBuilder::new().source(source(dir.path())).build(),
            Err(TileError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let dir = tempdir().unwrap();
        let mut config = TilingConfig::default();
        config.sector_size = 1000;
        let result = TilingBuilder::new()
            .source(source(dir.path()))
            .output(dir.path().join("out.tiles"))
            .config(config)
            .build();
        assert!(matches!(result, Err(TileError::Config(_))));
    }

    #[test]
    fn test_builder_shares_pool() {
        let dir = tempdir().unwrap();
        let pool = BufferPool::new(8192);
        let set = TilingBuilder::new()
            .source(source(dir.path()))
            .output(dir.path().join("out.tiles"))
            .pool(pool.clone())
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(set.pool(), &pool));
        assert_eq!(set.output(), dir.path().join("out.tiles"));
    }
}
