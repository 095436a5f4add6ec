//! Orchestration of a full tiling run.

pub mod processing_set;
pub mod segment;

pub use processing_set::ProcessingSet;
pub use segment::{SegmentCoordinator, segment_ranges};
