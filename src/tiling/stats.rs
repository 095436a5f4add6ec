//! Bounded Z histogram and the statistics derived from it.

use serde::{Deserialize, Serialize};

/// Z-axis summary in world units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZStatistics {
    pub mean: f64,
    /// Sample variance
    pub variance: f64,
    /// Center of the most populated histogram bin
    pub mode_approximate: f64,
}

/// Fixed-size histogram over the quantized Z range.
///
/// Values beyond the range clamp into the first or last bin, so memory stays
/// bounded regardless of input size.
#[derive(Debug, Clone)]
pub struct ZHistogram {
    min: u32,
    range: u64,
    bins: Vec<u64>,
}

impl ZHistogram {
    pub fn new(min: u32, max: u32, bins: usize) -> Self {
        let range = (max as u64).saturating_sub(min as u64).max(1);
        Self {
            min,
            range,
            bins: vec![0; bins.max(1)],
        }
    }

    #[inline]
    pub fn add(&mut self, z: u32) {
        let n = self.bins.len() as u64;
        let offset = (z as u64).saturating_sub(self.min as u64);
        let bin = ((offset * n) / self.range).min(n - 1);
        self.bins[bin as usize] += 1;
    }

    pub fn count(&self) -> u64 {
        self.bins.iter().sum()
    }

    pub fn bins(&self) -> &[u64] {
        &self.bins
    }

    /// Quantized Z at the center of bin `index`.
    fn bin_center(&self, index: usize) -> f64 {
        self.min as f64 + (index as f64 + 0.5) / self.bins.len() as f64 * self.range as f64
    }

    /// Statistics in world units, given the Z scale and offset.
    pub fn statistics(&self, scale: f64, offset: f64) -> ZStatistics {
        let count = self.count();
        if count == 0 {
            return ZStatistics::default();
        }

        let mut sum = 0.0;
        let mut mode_bin = 0;
        for (i, n) in self.bins.iter().enumerate() {
            sum += self.bin_center(i) * *n as f64;
            if *n > self.bins[mode_bin] {
                mode_bin = i;
            }
        }
        let mean = sum / count as f64;

        let variance = if count > 1 {
            let squares: f64 = self
                .bins
                .iter()
                .enumerate()
                .map(|(i, n)| {
                    let d = self.bin_center(i) - mean;
                    d * d * *n as f64
                })
                .sum();
            squares / (count - 1) as f64
        } else {
            0.0
        };

        ZStatistics {
            mean: mean * scale + offset,
            variance: variance * scale * scale,
            mode_approximate: self.bin_center(mode_bin) * scale + offset,
        }
    }
}
