//! Persisted tile containers: header format, compression, writer and reader.

pub mod compression;
pub mod format;
pub mod tile_source;
pub mod writer;

pub use compression::{BasicCompressor, CompressionMethod, Compressor, compressor_for};
pub use format::{ContainerHeader, HeaderInfo, MAX_GRID_TILES, SIGNATURE, VERSION_MAJOR, VERSION_MINOR};
pub use tile_source::TileSource;
pub use writer::{ContainerWriter, WriterOptions};
