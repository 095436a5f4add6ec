//! Buffer and stream infrastructure shared by every pipeline stage.

pub mod pool;
pub mod progress;
pub mod reader;
pub mod writer;

pub use pool::{BufferPool, PoolStats, PooledBuffer};
pub use progress::{
    CancellationToken, ChannelProgress, LogProgress, NullProgress, PhaseTimer, ProgressEvent,
    ProgressReporter, ScopedProgress, WeightedProgress, report,
};
pub use reader::SequentialReader;
pub use writer::SequentialWriter;
