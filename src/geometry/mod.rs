//! Coordinates, bounds and the quantizer.

pub mod extent;
pub mod point;
pub mod quantization;

pub use extent::{Extent3D, QuantizedExtent3D};
pub use point::{Point3D, QUANTIZED_POINT_SIZE, QuantizedPoint3D};
pub use quantization::Quantization3D;
