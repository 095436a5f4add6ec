//! Tiling configuration
//!
//! Plain key/value settings for a tiling run. Loadable from JSON (and TOML with
//! the `toml` feature); every field has a default so partial documents work.
use serde::de::Error;

use crate::storage::{CompressionMethod, MAX_GRID_TILES};
use crate::tiling::TileOrder;

/// Settings that drive grid sizing, memory budgets and output layout.
///
/// # Example
///
/// ```rust
/// use cloudtile::TilingConfig;
///
/// let config = TilingConfig::from_json(r#"{ "desired_points_per_tile": 1000 }"#).unwrap();
/// assert_eq!(config.desired_points_per_tile, 1000);
/// assert!(config.reuse_cache);
/// ```
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TilingConfig {
    /// Target number of points in a single tile
    #[serde(default = "TilingConfig::default_desired_points_per_tile")]
    pub desired_points_per_tile: u32,

    /// Upper bound on the final tile count
    #[serde(default = "TilingConfig::default_max_tiles_for_estimation")]
    pub max_tiles_for_estimation: u32,

    /// Global budget for the low-res layer (0 disables extraction)
    #[serde(default = "TilingConfig::default_max_low_res_points")]
    pub max_low_res_points: u64,

    /// Largest point-data region tiled in one buffer
    #[serde(default = "TilingConfig::default_max_segment_bytes")]
    pub max_segment_bytes: u64,

    /// Size of pooled stream buffers
    #[serde(default = "TilingConfig::default_buffer_size")]
    pub buffer_size: usize,

    /// Reopen an existing container at the output path instead of rebuilding
    #[serde(default = "TilingConfig::default_reuse_cache")]
    pub reuse_cache: bool,

    #[serde(default = "TilingConfig::default_sector_size")]
    pub sector_size: usize,

    /// Estimation cells per final tile along each axis
    #[serde(default = "TilingConfig::default_estimation_refinement")]
    pub estimation_refinement: u32,

    #[serde(default = "TilingConfig::default_z_histogram_bins")]
    pub z_histogram_bins: usize,

    #[serde(default = "TilingConfig::default_allow_segmentation")]
    pub allow_segmentation: bool,

    /// Tile segments on the rayon pool instead of one after another
    #[serde(default)]
    pub parallel_segments: bool,

    /// Pre-size output files without writing their last byte
    #[serde(default = "TilingConfig::default_allow_sparse_files")]
    pub allow_sparse_files: bool,

    #[serde(default)]
    pub tile_order: TileOrder,

    #[serde(default)]
    pub compression: CompressionMethod,
}

impl TilingConfig {
    const fn default_desired_points_per_tile() -> u32 {
        40_000
    }

    const fn default_max_tiles_for_estimation() -> u32 {
        10_000
    }

    const fn default_max_low_res_points() -> u64 {
        100_000
    }

    const fn default_max_segment_bytes() -> u64 {
        2 * 1024 * 1024 * 1024
    }

    const fn default_buffer_size() -> usize {
        1024 * 1024
    }

    const fn default_reuse_cache() -> bool {
        true
    }

    const fn default_sector_size() -> usize {
        4096
    }

    const fn default_estimation_refinement() -> u32 {
        4
    }

    const fn default_z_histogram_bins() -> usize {
        1024
    }

    const fn default_allow_segmentation() -> bool {
        true
    }

    const fn default_allow_sparse_files() -> bool {
        true
    }

    pub fn with_desired_points_per_tile(mut self, points: u32) -> Self {
        assert!(points > 0, "Desired points per tile must be greater than zero");
        self.desired_points_per_tile = points;
        self
    }

    pub fn with_max_tiles_for_estimation(mut self, tiles: u32) -> Self {
        assert!(tiles > 0, "Maximum tile count must be greater than zero");
        self.max_tiles_for_estimation = tiles;
        self
    }

    pub fn with_max_low_res_points(mut self, points: u64) -> Self {
        self.max_low_res_points = points;
        self
    }

    pub fn with_max_segment_bytes(mut self, bytes: u64) -> Self {
        assert!(bytes > 0, "Segment budget must be greater than zero");

        if bytes > 16 * 1024 * 1024 * 1024 {
            log::warn!(
                "Segment budget of {} bytes is very large; a segment is held in memory \
                for the whole tiling pass.",
                bytes
            );
        }

        self.max_segment_bytes = bytes;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        assert!(size > 0, "Buffer size must be greater than zero");
        self.buffer_size = size;
        self
    }

    pub fn with_reuse_cache(mut self, reuse: bool) -> Self {
        self.reuse_cache = reuse;
        self
    }

    pub fn with_sector_size(mut self, size: usize) -> Self {
        assert!(
            size.is_power_of_two(),
            "Sector size must be a power of two"
        );
        self.sector_size = size;
        self
    }

    pub fn with_estimation_refinement(mut self, refinement: u32) -> Self {
        assert!(refinement > 0, "Estimation refinement must be greater than zero");
        self.estimation_refinement = refinement;
        self
    }

    pub fn with_allow_segmentation(mut self, allow: bool) -> Self {
        self.allow_segmentation = allow;
        self
    }

    pub fn with_parallel_segments(mut self, parallel: bool) -> Self {
        self.parallel_segments = parallel;
        self
    }

    pub fn with_allow_sparse_files(mut self, allow: bool) -> Self {
        self.allow_sparse_files = allow;
        self
    }

    pub fn with_tile_order(mut self, order: TileOrder) -> Self {
        self.tile_order = order;
        self
    }

    pub fn with_compression(mut self, compression: CompressionMethod) -> Self {
        self.compression = compression;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.desired_points_per_tile == 0 {
            return Err("Desired points per tile must be greater than zero".to_string());
        }

        if self.max_tiles_for_estimation == 0 {
            return Err("Maximum tile count must be greater than zero".to_string());
        }

        if self.max_tiles_for_estimation as u64 > MAX_GRID_TILES / 4 {
            return Err(format!(
                "Maximum tile count must not exceed {}",
                MAX_GRID_TILES / 4
            ));
        }

        if self.max_segment_bytes == 0 {
            return Err("Segment budget must be greater than zero".to_string());
        }

        if self.buffer_size == 0 {
            return Err("Buffer size must be greater than zero".to_string());
        }

        if !self.sector_size.is_power_of_two() {
            return Err("Sector size must be a power of two".to_string());
        }

        if self.buffer_size < self.sector_size {
            return Err("Buffer size must hold at least one sector".to_string());
        }

        if self.estimation_refinement == 0 {
            return Err("Estimation refinement must be greater than zero".to_string());
        }

        if self.z_histogram_bins == 0 {
            return Err("Histogram bin count must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Stream buffer length rounded down to a whole number of sectors.
    pub fn aligned_buffer_size(&self) -> usize {
        (self.buffer_size / self.sector_size).max(1) * self.sector_size
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: TilingConfig = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: TilingConfig = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            desired_points_per_tile: Self::default_desired_points_per_tile(),
            max_tiles_for_estimation: Self::default_max_tiles_for_estimation(),
            max_low_res_points: Self::default_max_low_res_points(),
            max_segment_bytes: Self::default_max_segment_bytes(),
            buffer_size: Self::default_buffer_size(),
            reuse_cache: Self::default_reuse_cache(),
            sector_size: Self::default_sector_size(),
            estimation_refinement: Self::default_estimation_refinement(),
            z_histogram_bins: Self::default_z_histogram_bins(),
            allow_segmentation: Self::default_allow_segmentation(),
            parallel_segments: false,
            allow_sparse_files: Self::default_allow_sparse_files(),
            tile_order: TileOrder::default(),
            compression: CompressionMethod::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TilingConfig::default();
        assert_eq!(config.desired_points_per_tile, 40_000);
        assert_eq!(config.max_tiles_for_estimation, 10_000);
        assert_eq!(config.max_segment_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.buffer_size, 1024 * 1024);
        assert!(config.reuse_cache);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = TilingConfig::default()
            .with_desired_points_per_tile(500)
            .with_tile_order(TileOrder::Tree)
            .with_compression(CompressionMethod::Basic);

        let json = config.to_json().unwrap();
        let parsed = TilingConfig::from_json(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "max_segment_bytes": 4096, "tile_order": "tree" }"#;
        let config = TilingConfig::from_json(json).unwrap();
        assert_eq!(config.max_segment_bytes, 4096);
        assert_eq!(config.tile_order, TileOrder::Tree);
        assert_eq!(config.desired_points_per_tile, 40_000);
    }

    #[test]
    fn test_rejects_unknown_fields() {
        assert!(TilingConfig::from_json(r#"{ "bogus": 1 }"#).is_err());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(TilingConfig::from_json(r#"{ "buffer_size": 0 }"#).is_err());
        assert!(TilingConfig::from_json(r#"{ "sector_size": 1000 }"#).is_err());
        assert!(TilingConfig::from_json(r#"{ "max_tiles_for_estimation": 4000000 }"#).is_err());
    }

    #[test]
    fn test_aligned_buffer_size() {
        let config = TilingConfig::default()
            .with_sector_size(512)
            .with_buffer_size(1300);
        assert_eq!(config.aligned_buffer_size(), 1024);
    }

    #[test]
    #[should_panic(expected = "Desired points per tile must be greater than zero")]
    fn test_zero_points_per_tile_panics() {
        let _ = TilingConfig::default().with_desired_points_per_tile(0);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_toml_roundtrip() {
        let config = TilingConfig::default().with_max_low_res_points(0);
        let text = config.to_toml().unwrap();
        assert_eq!(TilingConfig::from_toml(&text).unwrap(), config);
    }
}
