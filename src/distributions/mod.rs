#![warn(missing_docs)]
//! Pupil sampling patterns.
//!
//! A [`Distribution`] generates normalized pupil coordinates `(u, v)` on the unit disc. The coordinates are scaled by
//! the stop radius and aimed through the stop by a [`PupilSampler`].
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum::EnumIter;

pub mod annular;
pub mod fan;
pub mod grid;
pub mod sampler;

pub use annular::Annular;
pub use fan::Fan;
pub use grid::CenteredGrid;
pub use sampler::{PupilSampler, SampledRay};

/// A normalized pupil coordinate with sampling metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilSample {
    /// normalized coordinate along the local x axis of the stop
    pub u: f64,
    /// normalized coordinate along the local y axis of the stop
    pub v: f64,
    /// the sample is blocked (pupil mask, physical aperture or failed aiming)
    pub is_vignetted: bool,
    /// the aimer fell back to the geometric construction for this sample
    pub is_partial: bool,
}
impl PupilSample {
    /// Creates an unblocked sample.
    #[must_use]
    pub const fn new(u: f64, v: f64) -> Self {
        Self {
            u,
            v,
            is_vignetted: false,
            is_partial: false,
        }
    }
    /// Normalized radial coordinate.
    #[must_use]
    pub fn radius(&self) -> f64 {
        self.u.hypot(self.v)
    }
}

/// Generator of pupil samples.
pub trait Distribution {
    /// Generates the samples in their canonical order.
    fn generate(&self) -> Vec<PupilSample>;
}

/// Sampling pattern of the full pupil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, Default)]
#[serde(rename_all = "lowercase")]
pub enum PupilPattern {
    /// center ray plus concentric rings
    #[default]
    Annular,
    /// centered square grid
    Grid,
}
impl Display for PupilPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Annular => write!(f, "annular"),
            Self::Grid => write!(f, "grid"),
        }
    }
}
impl PupilPattern {
    /// Generates `ray_count` samples of this pattern. `rings` overrides the automatic ring count of the annular
    /// pattern.
    #[must_use]
    pub fn generate(self, ray_count: usize, rings: Option<usize>) -> Vec<PupilSample> {
        match self {
            Self::Annular => {
                let mut pattern = Annular::new(ray_count);
                if let Some(rings) = rings {
                    pattern = pattern.with_rings(rings);
                }
                pattern.generate()
            }
            Self::Grid => CenteredGrid::new(ray_count).generate(),
        }
    }
}

/// Transmission mask of the pupil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, Default)]
#[serde(rename_all = "lowercase")]
pub enum PupilMask {
    /// clear circular pupil
    #[default]
    Circular,
    /// circular pupil with a central obscuration
    Annular,
}
impl PupilMask {
    /// Returns true if the normalized pupil point `(u, v)` is transmitted.
    #[must_use]
    pub fn transmits(self, u: f64, v: f64, obscuration_ratio: f64) -> bool {
        let r = u.hypot(v);
        match self {
            Self::Circular => r <= 1.0 + 1e-12,
            Self::Annular => r <= 1.0 + 1e-12 && r >= obscuration_ratio,
        }
    }
}

/// Orientation of a ray fan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter)]
pub enum FanType {
    /// fan along the local y axis of the stop
    Meridional,
    /// fan along the local x axis of the stop
    Sagittal,
}
impl Display for FanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Meridional => write!(f, "meridional"),
            Self::Sagittal => write!(f, "sagittal"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    #[test]
    fn pupil_sample() {
        let s = PupilSample::new(0.6, 0.8);
        assert_eq!(s.radius(), 1.0);
        assert!(!s.is_vignetted);
        assert!(!s.is_partial);
    }
    #[test]
    fn pattern() {
        assert_eq!(PupilPattern::default(), PupilPattern::Annular);
        assert_eq!(format!("{}", PupilPattern::Grid), "grid");
        assert_eq!(PupilPattern::Annular.generate(19, None).len(), 19);
        assert_eq!(PupilPattern::Annular.generate(19, Some(1)).len(), 19);
        assert_eq!(PupilPattern::Grid.generate(21, None).len(), 21);
        let p: PupilPattern = serde_yaml::from_str("grid").unwrap();
        assert_eq!(p, PupilPattern::Grid);
    }
    #[test]
    fn mask() {
        assert!(PupilMask::Circular.transmits(0.0, 0.0, 0.3));
        assert!(!PupilMask::Circular.transmits(1.0, 0.5, 0.3));
        assert!(!PupilMask::Annular.transmits(0.1, 0.0, 0.3));
        assert!(PupilMask::Annular.transmits(0.5, 0.0, 0.3));
    }
    #[test]
    fn fan_display() {
        assert_eq!(format!("{}", FanType::Sagittal), "sagittal");
    }
}
