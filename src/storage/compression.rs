//! Pluggable per-tile compression.
//!
//! Containers record a method id; readers look the codec up with
//! [`compressor_for`]. Only high-res tile runs are compressed.

use flate2::Compression as FlateCompression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::{Result, TileError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMethod {
    #[default]
    None,
    /// zlib stream per tile
    Basic,
}

impl CompressionMethod {
    pub fn id(&self) -> i32 {
        match self {
            CompressionMethod::None => 0,
            CompressionMethod::Basic => 1,
        }
    }

    pub fn from_id(id: i32) -> Result<Self> {
        match id {
            0 => Ok(CompressionMethod::None),
            1 => Ok(CompressionMethod::Basic),
            other => Err(TileError::CompressionUnavailable(other)),
        }
    }
}

pub trait Compressor: Send + Sync {
    fn method(&self) -> CompressionMethod;

    /// Append the compressed form of `input` to `output`.
    fn compress(&self, input: &[u8], output: &mut Vec<u8>) -> Result<()>;

    /// Fill `output` from `input`. Fails unless exactly `output.len()` bytes
    /// are produced.
    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<()>;
}

/// Codec for `method`, or `None` when data is stored raw.
pub fn compressor_for(method: CompressionMethod) -> Result<Option<Box<dyn Compressor>>> {
    match method {
        CompressionMethod::None => Ok(None),
        CompressionMethod::Basic => Ok(Some(Box::new(BasicCompressor::default()))),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BasicCompressor {
    level: FlateCompression,
}

impl Default for BasicCompressor {
    fn default() -> Self {
        Self {
            level: FlateCompression::fast(),
        }
    }
}

impl Compressor for BasicCompressor {
    fn method(&self) -> CompressionMethod {
        CompressionMethod::Basic
    }

    fn compress(&self, input: &[u8], output: &mut Vec<u8>) -> Result<()> {
        let mut encoder = ZlibEncoder::new(output, self.level);
        encoder.write_all(input)?;
        encoder.finish()?;
        Ok(())
    }

    fn decompress(&self, input: &[u8], output: &mut [u8]) -> Result<()> {
        let mut decoder = ZlibDecoder::new(input);
        decoder.read_exact(output).map_err(|e| {
            TileError::Format(format!("corrupt compressed tile: {}", e))
        })?;
        let mut probe = [0u8; 1];
        if decoder.read(&mut probe)? != 0 {
            return Err(TileError::Format(
                "compressed tile is longer than expected".to_string(),
            ));
        }
        Ok(())
    }
}
