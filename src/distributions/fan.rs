//! Meridional and sagittal ray fans
use super::{Distribution, FanType, PupilSample};
use crate::utils::usize_to_f64;

/// `N` equidistant samples on a pupil diameter, from `-1` to `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fan {
    fan_type: FanType,
    ray_count: usize,
}
impl Fan {
    /// Creates a new [`Fan`].
    #[must_use]
    pub const fn new(fan_type: FanType, ray_count: usize) -> Self {
        Self {
            fan_type,
            ray_count,
        }
    }
    /// Orientation of the fan.
    #[must_use]
    pub const fn fan_type(&self) -> FanType {
        self.fan_type
    }
}
impl Distribution for Fan {
    fn generate(&self) -> Vec<PupilSample> {
        (0..self.ray_count)
            .map(|i| {
                let p = if self.ray_count > 1 {
                    2.0f64.mul_add(usize_to_f64(i) / usize_to_f64(self.ray_count - 1), -1.0)
                } else {
                    0.0
                };
                match self.fan_type {
                    FanType::Meridional => PupilSample::new(0.0, p),
                    FanType::Sagittal => PupilSample::new(p, 0.0),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn meridional() {
        let fan = Fan::new(FanType::Meridional, 5);
        assert_eq!(fan.fan_type(), FanType::Meridional);
        let points = fan.generate();
        let v: Vec<f64> = points.iter().map(|p| p.v).collect();
        assert_eq!(v, vec![-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert!(points.iter().all(|p| p.u == 0.0));
    }
    #[test]
    fn sagittal() {
        let points = Fan::new(FanType::Sagittal, 3).generate();
        assert_eq!(points[0].u, -1.0);
        assert_eq!(points[2].u, 1.0);
        assert!(points.iter().all(|p| p.v == 0.0));
    }
    #[test]
    fn degenerate() {
        assert!(Fan::new(FanType::Sagittal, 0).generate().is_empty());
        assert_eq!(Fan::new(FanType::Sagittal, 1).generate(), vec![PupilSample::new(0.0, 0.0)]);
    }
}
