#![warn(missing_docs)]
//! Sequential ray tracer.
//!
//! A [`SequentialTracer`] propagates a [`Ray`] given in global coordinates surface by surface through an
//! [`OpticalSystem`]. Expected optical failures (aperture clipping, total internal reflection, missed surfaces) are
//! reported in the [`TraceStatus`] of the returned [`TracedRay`] together with the partial path. The tracer never
//! returns an error for them.
use std::fmt::Display;

use log::debug;
use nalgebra::{Point3, Vector3};
use uom::si::f64::Length;

use crate::{
    error::TraceResult,
    ray::Ray,
    surface::{IntersectionTolerance, SurfaceType},
    system::OpticalSystem,
};

/// Reason for a ray to be stopped before reaching its target surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VignetteReason {
    /// the intersection point lies outside the clear aperture
    Aperture,
    /// total internal reflection at a refracting surface
    TotalInternalReflection,
    /// the ray does not intersect the surface
    MissedSurface,
    /// `NaN` or infinite values occured
    NumericalFailure,
}
impl Display for VignetteReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::Aperture => "clipped by aperture",
            Self::TotalInternalReflection => "total internal reflection",
            Self::MissedSurface => "missed surface",
            Self::NumericalFailure => "numerical failure",
        };
        write!(f, "{msg}")
    }
}

/// Outcome of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    /// the ray reached the target surface
    Complete,
    /// the ray was stopped at the given surface
    Vignetted {
        /// index of the surface that stopped the ray
        surface: usize,
        /// reason for stopping
        reason: VignetteReason,
    },
}

/// Ray / surface interaction record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// index of the surface
    pub surface_index: usize,
    /// intersection point in the local frame of the surface (mm)
    pub local: Point3<f64>,
    /// intersection point in global coordinates (mm)
    pub global: Point3<f64>,
    /// global ray direction after the interaction
    pub direction: Vector3<f64>,
    /// ray direction after the interaction in the local frame of the surface
    pub local_direction: Vector3<f64>,
    /// optical path length accumulated up to this point (mm)
    pub optical_path: f64,
}

/// A ray after tracing, including its ordered list of surface hits.
#[derive(Debug, Clone, PartialEq)]
pub struct TracedRay {
    ray: Ray,
    hits: Vec<SurfaceHit>,
    status: TraceStatus,
}
impl TracedRay {
    /// The ray in its final state.
    #[must_use]
    pub const fn ray(&self) -> &Ray {
        &self.ray
    }
    /// All surface hits in trace order. The surface that stopped a vignetted ray is not included.
    #[must_use]
    pub fn hits(&self) -> &[SurfaceHit] {
        &self.hits
    }
    /// Outcome of the trace.
    #[must_use]
    pub const fn status(&self) -> TraceStatus {
        self.status
    }
    /// Returns true if the target surface was reached.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self.status, TraceStatus::Complete)
    }
    /// Hit on the surface with the given index, if the ray got there.
    #[must_use]
    pub fn hit(&self, surface_index: usize) -> Option<&SurfaceHit> {
        self.hits.iter().find(|h| h.surface_index == surface_index)
    }
    /// The last recorded hit.
    #[must_use]
    pub fn last_hit(&self) -> Option<&SurfaceHit> {
        self.hits.last()
    }
}

/// Options of a single trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOptions {
    /// stop rays outside the clear aperture of physical surfaces
    pub check_apertures: bool,
}
impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            check_apertures: true,
        }
    }
}
impl TraceOptions {
    /// Options for unclipped traces as used by the pupil aimer.
    #[must_use]
    pub const fn unclipped() -> Self {
        Self {
            check_apertures: false,
        }
    }
}

/// Sequential tracer for one system at one wavelength.
#[derive(Debug, Clone)]
pub struct SequentialTracer<'a> {
    system: &'a OpticalSystem,
    wavelength: Length,
    indices: Vec<f64>,
    tolerance: IntersectionTolerance,
    aperture_epsilon: f64,
}
impl<'a> SequentialTracer<'a> {
    /// Creates a new [`SequentialTracer`].
    ///
    /// # Errors
    ///
    /// This function returns an error if a refractive index cannot be evaluated at the wavelength.
    pub fn new(system: &'a OpticalSystem, wavelength: Length) -> TraceResult<Self> {
        let indices = system.medium_indices(wavelength)?;
        Ok(Self {
            system,
            wavelength,
            indices,
            tolerance: system.config().intersection(),
            aperture_epsilon: system.config().aperture_epsilon,
        })
    }
    /// The traced system.
    #[must_use]
    pub const fn system(&self) -> &'a OpticalSystem {
        self.system
    }
    /// Wavelength of this tracer.
    #[must_use]
    pub const fn wavelength(&self) -> Length {
        self.wavelength
    }
    /// Refractive index of the medium behind every surface.
    #[must_use]
    pub fn indices(&self) -> &[f64] {
        &self.indices
    }
    /// Refractive index of the medium in front of the surface with the given index.
    #[must_use]
    pub fn index_before(&self, surface_index: usize) -> f64 {
        surface_index
            .checked_sub(1)
            .and_then(|i| self.indices.get(i))
            .copied()
            .unwrap_or(1.0)
    }
    /// Traces a ray from the medium in front of `start` up to and including surface `target`.
    ///
    /// The ray is given in global coordinates. Its refractive index is set to the medium in front of `start`.
    #[must_use]
    pub fn trace(&self, mut ray: Ray, start: usize, target: usize, options: TraceOptions) -> TracedRay {
        let mut hits = Vec::with_capacity(target.saturating_sub(start) + 1);
        let n_start = self.index_before(start);
        if ray.set_refractive_index(n_start).is_err() {
            return self.stop(ray, hits, start, VignetteReason::NumericalFailure);
        }
        let surfaces = self.system.surfaces();
        for index in start..=target.min(surfaces.len().saturating_sub(1)) {
            let surface = &surfaces[index];
            if surface.surface_type() == SurfaceType::CoordBreak {
                continue;
            }
            let Some(frame) = self.system.frames().frame(index) else {
                return self.stop(ray, hits, index, VignetteReason::MissedSurface);
            };
            let local_ray = ray.inverse_transformed_ray(frame);
            let sd = surface.semi_diameter_mm();
            let Some(intersection) = surface.profile().intersect(
                &local_ray.position_mm(),
                &local_ray.direction(),
                sd,
                &self.tolerance,
            ) else {
                return self.stop(ray, hits, index, VignetteReason::MissedSurface);
            };
            if ray.propagate(intersection.t).is_err() {
                return self.stop(ray, hits, index, VignetteReason::NumericalFailure);
            }
            if options.check_apertures && surface.is_physical() {
                if let Some(sd) = sd {
                    let r = intersection.point.x.hypot(intersection.point.y);
                    if r > sd * (1.0 + self.aperture_epsilon) {
                        return self.stop(ray, hits, index, VignetteReason::Aperture);
                    }
                }
            }
            let normal = frame.transform_vector_f64(&intersection.normal);
            match surface.surface_type() {
                SurfaceType::Lens => match ray.refract_on_normal(&normal, self.indices[index]) {
                    Ok(true) => {}
                    Ok(false) => {
                        return self.stop(ray, hits, index, VignetteReason::TotalInternalReflection)
                    }
                    Err(_) => return self.stop(ray, hits, index, VignetteReason::NumericalFailure),
                },
                SurfaceType::Mirror => ray.reflect_on_normal(&normal),
                _ => {}
            }
            let position = ray.position_mm();
            let direction = ray.direction();
            if position.iter().chain(direction.iter()).any(|c| !c.is_finite()) {
                return self.stop(ray, hits, index, VignetteReason::NumericalFailure);
            }
            hits.push(SurfaceHit {
                surface_index: index,
                local: intersection.point,
                global: position,
                direction,
                local_direction: frame.inverse_transform_vector_f64(&direction),
                optical_path: ray.path_length_mm(),
            });
        }
        TracedRay {
            ray,
            hits,
            status: TraceStatus::Complete,
        }
    }
    /// Traces a ray starting in front of surface 1 up to the image surface.
    #[must_use]
    pub fn trace_to_image(&self, ray: Ray, options: TraceOptions) -> TracedRay {
        self.trace(ray, 1, self.system.image_index(), options)
    }
    fn stop(&self, mut ray: Ray, hits: Vec<SurfaceHit>, surface: usize, reason: VignetteReason) -> TracedRay {
        debug!(
            "ray at {:.4} µm stopped at surface {surface}: {reason}",
            ray.wavelength_um()
        );
        ray.set_invalid();
        TracedRay {
            ray,
            hits,
            status: TraceStatus::Vignetted { surface, reason },
        }
    }
}
