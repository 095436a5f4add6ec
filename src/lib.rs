//! Out-of-core tiling of massive LIDAR point clouds.
//!
//! Points are bucket-sorted in place into a density-sized grid of tiles and
//! persisted as one container: tile-contiguous high-res runs followed by a
//! low-res layer. Sources larger than the memory budget are tiled in segments
//! and merged.
//!
//! ```no_run
//! use std::sync::Arc;
//! use cloudtile::{LogProgress, PointFile, TilingBuilder, TilingConfig};
//!
//! let source = PointFile::create("points.bin", &[], None)?;
//! let set = TilingBuilder::new()
//!     .source(Arc::new(source))
//!     .output("points.tiles")
//!     .config(TilingConfig::default().with_desired_points_per_tile(10_000))
//!     .build()?;
//!
//! if let Some(tiles) = set.process(&LogProgress::default())? {
//!     println!("{} tiles", tiles.tile_set().valid_tile_count());
//! }
//! # Ok::<(), cloudtile::TileError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod processing;
pub mod source;
pub mod storage;
pub mod tiling;

pub use builder::TilingBuilder;
pub use config::TilingConfig;
pub use error::{Result, TileError};

pub use geometry::{Extent3D, Point3D, Quantization3D, QuantizedExtent3D, QuantizedPoint3D};

pub use io::{
    BufferPool, CancellationToken, ChannelProgress, LogProgress, NullProgress, ProgressEvent,
    ProgressReporter,
};

pub use processing::ProcessingSet;

pub use source::{PointFile, PointRange, PointSource};

pub use storage::{CompressionMethod, TileSource};

pub use tiling::{Tile, TileKey, TileOrder, TileSet, ZStatistics};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{Result, TileError, TilingBuilder, TilingConfig};

    pub use crate::{Extent3D, Point3D, Quantization3D};

    pub use crate::{CancellationToken, LogProgress, NullProgress, ProgressReporter};

    pub use crate::{PointFile, PointSource, ProcessingSet, TileSource};

    pub use crate::{CompressionMethod, TileKey, TileOrder};
}
