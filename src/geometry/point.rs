use serde::{Deserialize, Serialize};

/// Bytes occupied by the quantized X, Y, Z at the start of every point record.
pub const QUANTIZED_POINT_SIZE: usize = 12;

/// A point in floating-point world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A point in quantized integer space.
///
/// Point records start with this triple encoded as three little-endian `u32`.
/// Any trailing attribute bytes of a record are opaque to the tiler.
///
/// ```
/// use cloudtile::QuantizedPoint3D;
///
/// let mut record = [0u8; 16];
/// QuantizedPoint3D::new(7, 8, 9).write_to(&mut record);
/// assert_eq!(QuantizedPoint3D::read_from(&record), QuantizedPoint3D::new(7, 8, 9));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantizedPoint3D {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl QuantizedPoint3D {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Decode the leading quantized coordinates of a record.
    ///
    /// # Panics
    ///
    /// Panics if `record` is shorter than [`QUANTIZED_POINT_SIZE`]. Callers
    /// slice records out of buffers whose stride is validated up front.
    #[inline]
    pub fn read_from(record: &[u8]) -> Self {
        Self {
            x: u32::from_le_bytes([record[0], record[1], record[2], record[3]]),
            y: u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
            z: u32::from_le_bytes([record[8], record[9], record[10], record[11]]),
        }
    }

    #[inline]
    pub fn write_to(&self, record: &mut [u8]) {
        record[0..4].copy_from_slice(&self.x.to_le_bytes());
        record[4..8].copy_from_slice(&self.y.to_le_bytes());
        record[8..12].copy_from_slice(&self.z.to_le_bytes());
    }
}
