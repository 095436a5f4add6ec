//! Density estimation, the tile grid index and the bucket-sort engine.

pub mod density;
pub mod engine;
pub mod estimator;
pub mod grid;
pub mod lowres;
pub mod order;
pub mod stats;
pub mod tile;
pub mod tile_set;

pub use density::TileDensity;
pub use engine::{SortedSegment, TilingEngine};
pub use estimator::{DensityEstimate, estimation_dimensions, final_dimensions};
pub use grid::GridLayout;
pub use lowres::LowResExtractor;
pub use order::{TileKey, TileOrder};
pub use stats::{ZHistogram, ZStatistics};
pub use tile::Tile;
pub use tile_set::{TileRecord, TileSet};
