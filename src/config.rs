#![warn(missing_docs)]
//! Engine wide configuration.
//!
//! An [`EngineConfig`] is passed explicitly with every [`OpticalSystem`](crate::system::OpticalSystem). It carries the
//! primary wavelength default and the numerical tolerances of the tracer and the pupil aimer.
use serde::{Deserialize, Serialize};

use crate::{
    error::{TraceError, TraceResult},
    surface::IntersectionTolerance,
};

/// Tolerances of the pupil aimer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AimerConfig {
    /// finite difference step of the Jacobian (rad or mm)
    pub jacobian_step: f64,
    /// maximum stop miss (mm) for a solution to count as converged
    pub accept_tolerance: f64,
    /// stop miss (mm) at which the iteration terminates early
    pub fine_tolerance: f64,
    /// maximum number of Newton iterations
    pub max_iterations: usize,
    /// step clamp for direction slopes (rad)
    pub max_slope_step: f64,
    /// step clamp for origin offsets (mm)
    pub max_origin_step: f64,
    /// distance of the launch plane in front of the first surface for objects at infinity (mm)
    pub afocal_launch_distance: f64,
}
impl Default for AimerConfig {
    fn default() -> Self {
        Self {
            jacobian_step: 1e-4,
            accept_tolerance: 1e-3,
            fine_tolerance: 1e-9,
            max_iterations: 18,
            max_slope_step: 0.5,
            max_origin_step: 5.0,
            afocal_launch_distance: 20.0,
        }
    }
}

/// Configuration of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// primary wavelength (µm) used if the source table is empty
    pub primary_wavelength_um: f64,
    /// relative tolerance of the aperture check
    pub aperture_epsilon: f64,
    /// convergence threshold of the aspheric intersection solver (mm)
    pub intersection_tolerance: f64,
    /// iteration cap of the aspheric intersection solver
    pub intersection_max_iterations: usize,
    /// pupil aimer settings
    pub aimer: AimerConfig,
}
impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            primary_wavelength_um: 0.5876,
            aperture_epsilon: 1e-6,
            intersection_tolerance: 1e-12,
            intersection_max_iterations: 30,
            aimer: AimerConfig::default(),
        }
    }
}
impl EngineConfig {
    /// Checks the configuration for consistency.
    ///
    /// # Errors
    ///
    /// This function returns an error if a wavelength or tolerance is not positive and finite.
    pub fn validate(&self) -> TraceResult<()> {
        let positive = [
            ("primary wavelength", self.primary_wavelength_um),
            ("intersection tolerance", self.intersection_tolerance),
            ("jacobian step", self.aimer.jacobian_step),
            ("accept tolerance", self.aimer.accept_tolerance),
            ("fine tolerance", self.aimer.fine_tolerance),
            ("slope step clamp", self.aimer.max_slope_step),
            ("origin step clamp", self.aimer.max_origin_step),
            ("afocal launch distance", self.aimer.afocal_launch_distance),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(TraceError::InvalidSystem(format!(
                    "{name} must be positive and finite"
                )));
            }
        }
        if !self.aperture_epsilon.is_finite() || self.aperture_epsilon < 0.0 {
            return Err(TraceError::InvalidSystem(
                "aperture epsilon must not be negative".into(),
            ));
        }
        if self.aimer.max_iterations == 0 || self.intersection_max_iterations == 0 {
            return Err(TraceError::InvalidSystem(
                "iteration caps must be at least 1".into(),
            ));
        }
        Ok(())
    }
    /// Settings of the aspheric intersection solver.
    #[must_use]
    pub const fn intersection(&self) -> IntersectionTolerance {
        IntersectionTolerance {
            tolerance: self.intersection_tolerance,
            max_iterations: self.intersection_max_iterations,
        }
    }
}
