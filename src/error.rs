//! Error types for the tiling pipeline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TileError {
    /// Settings that make the run impossible, detected before or at the
    /// offending step. No partial output is retained.
    #[error("Fatal configuration: {0}")]
    FatalConfiguration(String),

    /// Signature, version or header damage in a persisted container.
    #[error("Invalid container format: {0}")]
    Format(String),

    /// Cooperative cancellation. Not a fault.
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Quantizations are not compatible")]
    IncompatibleQuantization,

    #[error("Compression method {0} is unavailable")]
    CompressionUnavailable(i32),

    #[error("Writer is closed after a partial flush")]
    WriterClosed,

    #[error("Buffer too small: needed {needed} bytes, available {available}")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl TileError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TileError::Cancelled)
    }

    /// Maps an unexpected EOF while decoding a header to a format error.
    pub(crate) fn from_header_io(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            TileError::Format("truncated header".to_string())
        } else {
            TileError::Io(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, TileError>;
