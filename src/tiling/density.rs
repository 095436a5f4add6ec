use serde::{Deserialize, Serialize};

/// Aggregated tile occupancy.
///
/// Built from the non-zero tile counts of a grid: the median is element
/// `valid / 2` of the ascending counts and the mean is the integer quotient
/// `point_count / valid`. Densities are counts divided by the area of one
/// tile.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TileDensity {
    pub point_count: u64,
    pub tile_count: u32,
    pub valid_tile_count: u32,

    pub min_tile_count: u32,
    pub max_tile_count: u32,
    pub median_tile_count: u32,
    pub mean_tile_count: u32,

    pub min_tile_density: f64,
    pub max_tile_density: f64,
    pub median_tile_density: f64,
    pub mean_tile_density: f64,
}

impl TileDensity {
    /// `area` is the planar area of the whole grid.
    pub fn from_counts<I>(counts: I, tile_count: u32, area: f64) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut valid: Vec<u32> = counts.into_iter().filter(|c| *c > 0).collect();
        if valid.is_empty() {
            return Self {
                tile_count,
                ..Self::default()
            };
        }
        valid.sort_unstable();

        let point_count: u64 = valid.iter().map(|c| *c as u64).sum();
        let valid_tile_count = valid.len() as u32;
        let min_tile_count = valid[0];
        let max_tile_count = valid[valid.len() - 1];
        let median_tile_count = valid[valid.len() / 2];
        let mean_tile_count = (point_count / valid_tile_count as u64) as u32;

        let tile_area = if area > 0.0 && tile_count > 0 {
            area / tile_count as f64
        } else {
            1.0
        };

        Self {
            point_count,
            tile_count,
            valid_tile_count,
            min_tile_count,
            max_tile_count,
            median_tile_count,
            mean_tile_count,
            min_tile_density: min_tile_count as f64 / tile_area,
            max_tile_density: max_tile_count as f64 / tile_area,
            median_tile_density: median_tile_count as f64 / tile_area,
            mean_tile_density: mean_tile_count as f64 / tile_area,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_counts() {
        let density = TileDensity::from_counts([0, 4, 10, 0, 6, 2], 6, 600.0);
        assert_eq!(density.point_count, 22);
        assert_eq!(density.valid_tile_count, 4);
        assert_eq!(density.min_tile_count, 2);
        assert_eq!(density.max_tile_count, 10);
        assert_eq!(density.median_tile_count, 6);
        assert_eq!(density.mean_tile_count, 5);
        assert!((density.max_tile_density - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_all_empty() {
        let density = TileDensity::from_counts([0, 0], 2, 10.0);
        assert_eq!(density.valid_tile_count, 0);
        assert_eq!(density.point_count, 0);
        assert_eq!(density.tile_count, 2);
    }
}
