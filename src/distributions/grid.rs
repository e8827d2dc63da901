//! Centered square grid pupil pattern
use itertools::Itertools;

use super::{Distribution, PupilSample};
use crate::utils::{isize_to_f64, usize_to_f64};

/// The `N` innermost points of the smallest odd `G×G` grid with `G² ≥ N`.
///
/// Points are selected layer by layer in the ℓ∞ norm. Within a layer, point symmetric pairs are taken together so
/// that the selection stays centrally symmetric whenever `N` is odd. The grid spans `[-1, 1]` in both directions;
/// points outside the unit circle are marked vignetted. The output is in raster order (rows of constant `v`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CenteredGrid {
    ray_count: usize,
}
impl CenteredGrid {
    /// Creates a new [`CenteredGrid`].
    #[must_use]
    pub const fn new(ray_count: usize) -> Self {
        Self { ray_count }
    }
    /// Grid dimension `G`.
    #[must_use]
    pub fn grid_size(&self) -> usize {
        if self.ray_count == 0 {
            return 0;
        }
        let mut g = 1;
        while g * g < self.ray_count {
            g += 1;
        }
        if g % 2 == 0 {
            g + 1
        } else {
            g
        }
    }
    /// Selected cells as `(column, row)` offsets from the center in selection order.
    fn selection(&self) -> Vec<(isize, isize)> {
        let g = self.grid_size();
        if g == 0 {
            return Vec::new();
        }
        let half = isize::try_from(g / 2).unwrap_or(isize::MAX);
        let mut ordered = vec![(0, 0)];
        for layer in 1..=half {
            let representatives = (-layer..=layer)
                .cartesian_product(-layer..=layer)
                .filter(|(di, dj)| di.abs().max(dj.abs()) == layer)
                .filter(|(di, dj)| *dj > 0 || (*dj == 0 && *di > 0))
                .sorted_by_key(|(di, dj)| (di * di + dj * dj, -dj, *di));
            for (di, dj) in representatives {
                ordered.push((di, dj));
                ordered.push((-di, -dj));
            }
        }
        ordered.truncate(self.ray_count);
        ordered
    }
}
impl Distribution for CenteredGrid {
    fn generate(&self) -> Vec<PupilSample> {
        let g = self.grid_size();
        let spacing = if g > 1 { 2.0 / usize_to_f64(g - 1) } else { 0.0 };
        self.selection()
            .into_iter()
            .sorted_by_key(|(di, dj)| (*dj, *di))
            .map(|(di, dj)| {
                let mut sample = PupilSample::new(isize_to_f64(di) * spacing, isize_to_f64(dj) * spacing);
                sample.is_vignetted = sample.radius() > 1.0 + 1e-12;
                sample
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn grid_size() {
        assert_eq!(CenteredGrid::new(0).grid_size(), 0);
        assert_eq!(CenteredGrid::new(1).grid_size(), 1);
        assert_eq!(CenteredGrid::new(2).grid_size(), 3);
        assert_eq!(CenteredGrid::new(9).grid_size(), 3);
        assert_eq!(CenteredGrid::new(16).grid_size(), 5);
        assert_eq!(CenteredGrid::new(21).grid_size(), 5);
        assert_eq!(CenteredGrid::new(26).grid_size(), 7);
    }
    #[test]
    fn count() {
        for n in [0, 1, 2, 5, 9, 21, 25, 51] {
            assert_eq!(CenteredGrid::new(n).generate().len(), n);
        }
    }
    #[test]
    fn single() {
        let points = CenteredGrid::new(1).generate();
        assert_eq!(points, vec![PupilSample::new(0.0, 0.0)]);
    }
    #[test]
    fn central_symmetry() {
        for n in [5, 13, 21, 33] {
            let points = CenteredGrid::new(n).generate();
            for p in &points {
                assert!(
                    points.iter().any(|q| (q.u + p.u).abs() < 1e-12 && (q.v + p.v).abs() < 1e-12),
                    "n = {n}"
                );
            }
        }
    }
    #[test]
    fn inner_layer_first() {
        let points = CenteredGrid::new(9).generate();
        assert!(points.iter().all(|p| p.u.abs() <= 1.0 && p.v.abs() <= 1.0));
        let points = CenteredGrid::new(21).generate();
        // the inner 3×3 block is complete
        let inner = points
            .iter()
            .filter(|p| p.u.abs() <= 0.5 + 1e-12 && p.v.abs() <= 0.5 + 1e-12)
            .count();
        assert_eq!(inner, 9);
    }
    #[test]
    fn raster_order_and_vignetting() {
        let points = CenteredGrid::new(25).generate();
        assert!(points
            .windows(2)
            .all(|w| w[1].v > w[0].v || (w[1].v == w[0].v && w[1].u > w[0].u)));
        assert_eq!(points.iter().filter(|p| p.is_vignetted).count(), 12);
        assert!(points[0].is_vignetted);
        assert!(!points[12].is_vignetted);
    }
}
