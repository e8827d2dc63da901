//! Concentric annular pupil pattern
use super::{Distribution, PupilSample};
use crate::utils::usize_to_f64;

/// One center sample plus `R` concentric rings at radii `i/R`.
///
/// The samples per ring are allocated greedily proportional to the ring radius so that the total number of samples
/// equals the requested ray count. Every second ring is rotated by half an angular step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Annular {
    ray_count: usize,
    rings: Option<usize>,
}
impl Annular {
    /// Creates a new [`Annular`] pattern with an automatic ring count.
    #[must_use]
    pub const fn new(ray_count: usize) -> Self {
        Self {
            ray_count,
            rings: None,
        }
    }
    /// Overrides the automatic ring count.
    #[must_use]
    pub const fn with_rings(mut self, rings: usize) -> Self {
        self.rings = Some(rings);
        self
    }
    /// Number of rings used for the pattern.
    ///
    /// Without override the ring count of the hexapolar pattern with the closest number of samples
    /// (`1 + 3R(R+1)`) is used. The ring count never exceeds the number of off-axis samples.
    #[must_use]
    pub fn ring_count(&self) -> usize {
        if self.ray_count <= 1 {
            return 0;
        }
        let outer = self.ray_count - 1;
        let rings = self.rings.unwrap_or_else(|| {
            let n = usize_to_f64(outer);
            let r = (-3.0 + 12.0f64.mul_add(n, 9.0).sqrt()) / 6.0;
            crate::utils::f64_to_usize(r.round()).max(1)
        });
        rings.clamp(1, outer)
    }
    /// Number of samples on every ring (innermost first).
    #[must_use]
    pub fn samples_per_ring(&self) -> Vec<usize> {
        let rings = self.ring_count();
        if rings == 0 {
            return Vec::new();
        }
        let outer = self.ray_count - 1;
        let weight_sum = usize_to_f64(rings * (rings + 1) / 2);
        let ideal: Vec<f64> = (1..=rings)
            .map(|i| usize_to_f64(outer) * usize_to_f64(i) / weight_sum)
            .collect();
        let mut counts = vec![1_usize; rings];
        for _ in rings..outer {
            let (best, _) = ideal
                .iter()
                .zip(&counts)
                .map(|(ideal, count)| ideal - usize_to_f64(*count))
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |acc, (i, deficit)| {
                    if deficit >= acc.1 {
                        (i, deficit)
                    } else {
                        acc
                    }
                });
            counts[best] += 1;
        }
        counts
    }
}
impl Distribution for Annular {
    fn generate(&self) -> Vec<PupilSample> {
        let mut points = Vec::with_capacity(self.ray_count);
        if self.ray_count == 0 {
            return points;
        }
        points.push(PupilSample::new(0.0, 0.0));
        let counts = self.samples_per_ring();
        let rings = usize_to_f64(counts.len());
        for (ring, count) in counts.into_iter().enumerate() {
            let radius = usize_to_f64(ring + 1) / rings;
            let angle_step = 2.0 * std::f64::consts::PI / usize_to_f64(count);
            let offset = if ring % 2 == 1 { 0.5 } else { 0.0 };
            for point_nr in 0..count {
                let (sin, cos) = ((usize_to_f64(point_nr) + offset) * angle_step).sin_cos();
                points.push(PupilSample::new(radius * sin, radius * cos));
            }
        }
        points
    }
}
