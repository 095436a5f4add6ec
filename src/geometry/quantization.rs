use serde::{Deserialize, Serialize};

use super::extent::{Extent3D, QuantizedExtent3D};
use super::point::{Point3D, QuantizedPoint3D};
use crate::error::{Result, TileError};

/// Scale + offset mapping between world coordinates and `u32` quantized space.
///
/// `point = scale * quantized + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantization3D {
    pub scale: [f64; 3],
    pub offset: [f64; 3],
}

impl Quantization3D {
    pub fn new(scale: [f64; 3], offset: [f64; 3]) -> Result<Self> {
        if scale.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(TileError::InvalidInput(format!(
                "quantization scale must be positive, got {:?}",
                scale
            )));
        }
        if offset.iter().any(|o| !o.is_finite()) {
            return Err(TileError::InvalidInput(format!(
                "quantization offset must be finite, got {:?}",
                offset
            )));
        }
        Ok(Self { scale, offset })
    }

    /// Unsigned quantization anchored at the extent minimum, using the
    /// largest power-of-ten resolution that keeps every axis within `u32`.
    pub fn from_extent(extent: &Extent3D) -> Self {
        let ranges = [extent.range_x(), extent.range_y(), extent.range_z()];
        let scale = ranges.map(|range| {
            let range = if range > 0.0 && range.is_finite() { range } else { 1.0 };
            let digits = ((u32::MAX as f64 + 1.0) / range).log10().floor();
            10f64.powf(-digits)
        });
        Self {
            scale,
            offset: [extent.min_x, extent.min_y, extent.min_z],
        }
    }

    /// Two quantizations are compatible only when scale and offset match exactly.
    pub fn is_compatible(&self, other: &Quantization3D) -> bool {
        self.scale == other.scale && self.offset == other.offset
    }

    #[inline]
    pub fn quantize(&self, p: &Point3D) -> QuantizedPoint3D {
        QuantizedPoint3D::new(
            quantize_axis(p.x, self.scale[0], self.offset[0]),
            quantize_axis(p.y, self.scale[1], self.offset[1]),
            quantize_axis(p.z, self.scale[2], self.offset[2]),
        )
    }

    #[inline]
    pub fn unquantize(&self, q: &QuantizedPoint3D) -> Point3D {
        Point3D::new(
            self.scale[0] * q.x as f64 + self.offset[0],
            self.scale[1] * q.y as f64 + self.offset[1],
            self.scale[2] * q.z as f64 + self.offset[2],
        )
    }

    pub fn quantize_extent(&self, extent: &Extent3D) -> QuantizedExtent3D {
        QuantizedExtent3D::new(
            self.quantize(&Point3D::new(extent.min_x, extent.min_y, extent.min_z)),
            self.quantize(&Point3D::new(extent.max_x, extent.max_y, extent.max_z)),
        )
    }

    pub fn unquantize_extent(&self, extent: &QuantizedExtent3D) -> Extent3D {
        let min = self.unquantize(&extent.min);
        let max = self.unquantize(&extent.max);
        Extent3D::new(min.x, min.y, min.z, max.x, max.y, max.z)
    }
}

#[inline]
fn quantize_axis(value: f64, scale: f64, offset: f64) -> u32 {
    // float to int casts saturate, so out-of-range input clamps to the u32 domain
    ((value - offset) / scale).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_scale() {
        assert!(Quantization3D::new([0.0, 1.0, 1.0], [0.0; 3]).is_err());
        assert!(Quantization3D::new([1.0, -1.0, 1.0], [0.0; 3]).is_err());
        assert!(Quantization3D::new([0.01; 3], [f64::NAN, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_from_extent_scale() {
        let extent = Extent3D::new(100.0, 200.0, 0.0, 1100.0, 1200.0, 50.0);
        let q = Quantization3D::from_extent(&extent);
        assert_eq!(q.offset, [100.0, 200.0, 0.0]);
        assert!((q.scale[0] - 1e-6).abs() < 1e-18);
        assert!((q.scale[2] - 1e-7).abs() < 1e-19);

        let max = q.quantize(&Point3D::new(1100.0, 1200.0, 50.0));
        assert!(max.x > 0 && max.x < u32::MAX);
        assert!(max.z > 0 && max.z < u32::MAX);
    }

    #[test]
    fn test_round_trip_within_one_unit() {
        let extent = Extent3D::new(-500.0, -500.0, -20.0, 500.0, 500.0, 80.0);
        let q = Quantization3D::new([0.001, 0.001, 0.01], [-500.0, -500.0, -20.0]).unwrap();

        let mut value = 0.123_456_789_f64;
        for _ in 0..1000 {
            value = (value * 9301.0 + 49297.0) % 233280.0;
            let t = value / 233280.0;
            let p = Point3D::new(
                extent.min_x + t * extent.range_x(),
                extent.min_y + (1.0 - t) * extent.range_y(),
                extent.min_z + t * extent.range_z(),
            );
            let back = q.unquantize(&q.quantize(&p));
            assert!((back.x - p.x).abs() < q.scale[0]);
            assert!((back.y - p.y).abs() < q.scale[1]);
            assert!((back.z - p.z).abs() < q.scale[2]);
        }
    }

    #[test]
    fn test_quantize_clamps_below_offset() {
        let q = Quantization3D::new([1.0; 3], [10.0; 3]).unwrap();
        assert_eq!(q.quantize(&Point3D::new(5.0, 10.0, 12.4)), QuantizedPoint3D::new(0, 0, 2));
    }

    #[test]
    fn test_compatibility() {
        let a = Quantization3D::new([0.01; 3], [1.0, 2.0, 3.0]).unwrap();
        let b = Quantization3D::new([0.01; 3], [1.0, 2.0, 3.0]).unwrap();
        let c = Quantization3D::new([0.01; 3], [1.0, 2.0, 3.5]).unwrap();
        assert!(a.is_compatible(&b));
        assert!(!a.is_compatible(&c));
    }

    #[test]
    fn test_extent_round_trip() {
        let q = Quantization3D::new([0.5; 3], [0.0; 3]).unwrap();
        let extent = Extent3D::new(1.0, 2.0, 3.0, 10.0, 20.0, 30.0);
        let qe = q.quantize_extent(&extent);
        assert_eq!(qe.min, QuantizedPoint3D::new(2, 4, 6));
        assert_eq!(q.unquantize_extent(&qe), extent);
    }
}
