use serde::{Deserialize, Serialize};

use super::point::{Point3D, QuantizedPoint3D};

/// Axis-aligned bounds in world coordinates. Invariant: `min <= max` per axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent3D {
    pub min_x: f64,
    pub min_y: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub max_z: f64,
}

impl Extent3D {
    pub fn new(min_x: f64, min_y: f64, min_z: f64, max_x: f64, max_y: f64, max_z: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            min_z: min_z.min(max_z),
            max_x: max_x.max(min_x),
            max_y: max_y.max(min_y),
            max_z: max_z.max(min_z),
        }
    }

    /// Tight bounds of `points`, or `None` for an empty input.
    pub fn from_points<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Point3D>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut extent = Self::new(first.x, first.y, first.z, first.x, first.y, first.z);
        for p in iter {
            extent.include(p);
        }
        Some(extent)
    }

    pub fn include(&mut self, p: &Point3D) {
        self.min_x = self.min_x.min(p.x);
        self.min_y = self.min_y.min(p.y);
        self.min_z = self.min_z.min(p.z);
        self.max_x = self.max_x.max(p.x);
        self.max_y = self.max_y.max(p.y);
        self.max_z = self.max_z.max(p.z);
    }

    pub fn union(&self, other: &Extent3D) -> Extent3D {
        Extent3D {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            min_z: self.min_z.min(other.min_z),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
            max_z: self.max_z.max(other.max_z),
        }
    }

    pub fn range_x(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn range_y(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn range_z(&self) -> f64 {
        self.max_z - self.min_z
    }

    /// Planar (X/Y) area.
    pub fn area(&self) -> f64 {
        self.range_x() * self.range_y()
    }

    pub fn contains(&self, p: &Point3D) -> bool {
        p.x >= self.min_x
            && p.x <= self.max_x
            && p.y >= self.min_y
            && p.y <= self.max_y
            && p.z >= self.min_z
            && p.z <= self.max_z
    }
}

/// Axis-aligned bounds in quantized space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuantizedExtent3D {
    pub min: QuantizedPoint3D,
    pub max: QuantizedPoint3D,
}

impl QuantizedExtent3D {
    pub fn new(min: QuantizedPoint3D, max: QuantizedPoint3D) -> Self {
        Self {
            min: QuantizedPoint3D::new(min.x.min(max.x), min.y.min(max.y), min.z.min(max.z)),
            max: QuantizedPoint3D::new(min.x.max(max.x), min.y.max(max.y), min.z.max(max.z)),
        }
    }

    /// An inverted extent that becomes tight after the first `include`.
    pub const fn empty() -> Self {
        Self {
            min: QuantizedPoint3D::new(u32::MAX, u32::MAX, u32::MAX),
            max: QuantizedPoint3D::new(0, 0, 0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    #[inline]
    pub fn include(&mut self, p: &QuantizedPoint3D) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn union(&self, other: &QuantizedExtent3D) -> QuantizedExtent3D {
        let mut merged = *self;
        if !other.is_empty() {
            merged.include(&other.min);
            merged.include(&other.max);
        }
        merged
    }

    /// Number of quantized units spanned on X, never less than one.
    pub fn range_x(&self) -> u64 {
        (self.max.x as u64).saturating_sub(self.min.x as u64).max(1)
    }

    pub fn range_y(&self) -> u64 {
        (self.max.y as u64).saturating_sub(self.min.y as u64).max(1)
    }

    pub fn range_z(&self) -> u64 {
        (self.max.z as u64).saturating_sub(self.min.z as u64).max(1)
    }

    pub fn contains(&self, p: &QuantizedPoint3D) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}
