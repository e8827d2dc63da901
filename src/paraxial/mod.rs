#![warn(missing_docs)]
//! Paraxial optics.
//!
//! The paraxial model traces rays in the `y–α` form, where `y` is the ray height at a surface and `α = −n·u` the
//! reduced angle of a ray with slope `u`. Between surfaces a ray is transferred by `y' = y − (d/n)·α`, at a surface
//! of curvature `c` it is refracted by `α' = α + φ·y` with the surface power `φ = c·(n' − n)`.
//!
//! Mirrors are handled by the usual sign convention: the index behind a mirror is the negated index in front of it,
//! such that negative thicknesses after a fold yield positive reduced distances `d/n`.
use uom::si::{angle::radian, f64::Length, length::millimeter};

pub mod afocal;
pub mod seidel;

pub use afocal::{afocal_rays, AfocalData};
pub use seidel::{seidel, SeidelReport, SeidelTerms, SurfaceContribution};

use crate::{
    error::{TraceError, TraceResult},
    surface::{Surface, SurfaceType},
    system::{Field, FieldSpec, OpticalSystem},
};

/// Total power (1/mm) below which a system is treated as afocal.
pub const AFOCAL_POWER_LIMIT: f64 = 1e-9;
/// Smallest stop height coefficient that still allows scaling a ray onto the stop.
const STOP_COEFFICIENT_LIMIT: f64 = 1e-14;
/// Smallest reduced chief ray angle for a pupil at finite distance.
const PUPIL_ANGLE_LIMIT: f64 = 1e-12;

/// State of a paraxial ray at a single surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParaxialSurface {
    /// index of the surface within the system
    pub surface_index: usize,
    /// vertex curvature (1/mm)
    pub curvature: f64,
    /// signed paraxial index in front of the surface
    pub n_before: f64,
    /// signed paraxial index behind the surface
    pub n_after: f64,
    /// ray height (mm)
    pub y: f64,
    /// reduced angle in front of the surface
    pub alpha_before: f64,
    /// reduced angle behind the surface
    pub alpha_after: f64,
}
impl ParaxialSurface {
    /// Power `φ = c·(n' − n)` of the surface (1/mm).
    #[must_use]
    pub fn power(&self) -> f64 {
        self.curvature * (self.n_after - self.n_before)
    }
}

/// A paraxial ray traced through all surfaces (coordinate breaks excluded) from surface 1 to the image.
#[derive(Debug, Clone, PartialEq)]
pub struct ParaxialTrace {
    surfaces: Vec<ParaxialSurface>,
}
impl ParaxialTrace {
    /// Surface records in trace order.
    #[must_use]
    pub fn surfaces(&self) -> &[ParaxialSurface] {
        &self.surfaces
    }
    /// Record of the surface with the given index.
    #[must_use]
    pub fn at(&self, surface_index: usize) -> Option<&ParaxialSurface> {
        self.surfaces
            .iter()
            .find(|s| s.surface_index == surface_index)
    }
    /// First record (surface 1).
    #[must_use]
    pub fn first(&self) -> Option<&ParaxialSurface> {
        self.surfaces.first()
    }
    /// Last record (image surface).
    #[must_use]
    pub fn last(&self) -> Option<&ParaxialSurface> {
        self.surfaces.last()
    }
    /// Reduced angle in image space.
    #[must_use]
    pub fn final_alpha(&self) -> f64 {
        self.last().map_or(f64::NAN, |s| s.alpha_after)
    }
}

/// Entrance or exit pupil.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pupil {
    /// axial position (mm). The entrance pupil is measured from the vertex of surface 1, the exit pupil from the
    /// image surface, both along the local z axis.
    pub position_mm: f64,
    /// radius (mm)
    pub radius_mm: f64,
}
impl Pupil {
    const fn at_infinity() -> Self {
        Self {
            position_mm: f64::INFINITY,
            radius_mm: f64::INFINITY,
        }
    }
    /// Returns true if the pupil lies at infinity (telecentric space).
    #[must_use]
    pub fn is_at_infinity(&self) -> bool {
        !self.position_mm.is_finite()
    }
}

/// First-order properties of a system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardinalData {
    /// effective focal length `1/Φ` (mm), infinite for afocal systems
    pub effective_focal_length_mm: f64,
    /// distance from the last refracting or reflecting surface to the focus of a collimated beam (mm)
    pub back_focal_distance_mm: f64,
    /// distance from the last refracting or reflecting surface to the paraxial image of the object (mm)
    pub image_distance_mm: f64,
    /// position of the paraxial image relative to the image surface (mm, local z)
    pub image_offset_mm: f64,
    /// entrance pupil
    pub entrance_pupil: Pupil,
    /// exit pupil
    pub exit_pupil: Pupil,
    /// working F-number `1/(2·|α'|)` of the marginal ray in image space
    pub working_f_number: f64,
}

/// Paraxial model of an [`OpticalSystem`] at one wavelength.
#[derive(Debug, Clone)]
pub struct ParaxialSystem<'a> {
    system: &'a OpticalSystem,
    wavelength: Length,
    indices: Vec<f64>,
}
impl<'a> ParaxialSystem<'a> {
    /// Creates a new [`ParaxialSystem`].
    ///
    /// # Errors
    ///
    /// This function returns an error if a refractive index cannot be evaluated at the wavelength.
    pub fn new(system: &'a OpticalSystem, wavelength: Length) -> TraceResult<Self> {
        let real = system.medium_indices(wavelength)?;
        Ok(Self {
            system,
            wavelength,
            indices: signed_indices(system.surfaces(), &real),
        })
    }
    /// The underlying system.
    #[must_use]
    pub const fn system(&self) -> &'a OpticalSystem {
        self.system
    }
    /// Wavelength of the model.
    #[must_use]
    pub const fn wavelength(&self) -> Length {
        self.wavelength
    }
    /// Signed paraxial index behind every surface.
    #[must_use]
    pub fn indices(&self) -> &[f64] {
        &self.indices
    }
    /// Index of the object space.
    #[must_use]
    pub fn object_index(&self) -> f64 {
        self.indices[0]
    }
    /// Traces a paraxial ray with height `y1` at surface 1 and reduced angle `alpha0` in object space.
    ///
    /// # Errors
    ///
    /// This function returns [`TraceError::NumericalFailure`] if the ray heights or angles diverge.
    pub fn trace(&self, y1: f64, alpha0: f64) -> TraceResult<ParaxialTrace> {
        let surfaces = self.system.surfaces();
        let mut y = y1;
        let mut alpha = alpha0;
        let mut records = Vec::with_capacity(surfaces.len());
        for (index, surface) in surfaces.iter().enumerate().skip(1) {
            if index > 1 {
                y -= surfaces[index - 1].thickness_mm() / self.indices[index - 1] * alpha;
            }
            if surface.surface_type() == SurfaceType::CoordBreak {
                continue;
            }
            let n_before = self.indices[index - 1];
            let n_after = self.indices[index];
            let curvature = surface.profile().curvature();
            let alpha_after = curvature.mul_add((n_after - n_before) * y, alpha);
            if !y.is_finite() || !alpha_after.is_finite() {
                return Err(TraceError::NumericalFailure(format!(
                    "paraxial ray diverged at surface {index}"
                )));
            }
            records.push(ParaxialSurface {
                surface_index: index,
                curvature,
                n_before,
                n_after,
                y,
                alpha_before: alpha,
                alpha_after,
            });
            alpha = alpha_after;
        }
        Ok(ParaxialTrace { surfaces: records })
    }
    /// Total reduced power `Φ` (1/mm).
    ///
    /// # Errors
    ///
    /// This function returns an error if the paraxial trace fails.
    pub fn power(&self) -> TraceResult<f64> {
        Ok(self.trace(1.0, 0.0)?.final_alpha())
    }
    /// Returns true if the system has (almost) no power.
    ///
    /// # Errors
    ///
    /// This function returns an error if the paraxial trace fails.
    pub fn is_afocal(&self) -> TraceResult<bool> {
        Ok(self.power()?.abs() < AFOCAL_POWER_LIMIT)
    }
    /// Index of the last refracting or reflecting surface in front of the image.
    #[must_use]
    pub fn last_optical_surface(&self) -> usize {
        let surfaces = self.system.surfaces();
        let image = self.system.image_index();
        surfaces[..image]
            .iter()
            .rposition(|s| matches!(s.surface_type(), SurfaceType::Lens | SurfaceType::Mirror))
            .or_else(|| {
                surfaces[..image]
                    .iter()
                    .rposition(|s| s.surface_type() != SurfaceType::CoordBreak)
            })
            .filter(|i| *i > 0)
            .unwrap_or(image)
    }
    /// Axial distance from the given surface to the image surface (mm).
    #[must_use]
    pub fn distance_to_image(&self, surface_index: usize) -> f64 {
        self.system.surfaces()[surface_index..self.system.image_index()]
            .iter()
            .map(Surface::thickness_mm)
            .sum()
    }
    /// Stop heights `(a, b)` of the unit rays `(y1, α0) = (1, 0)` and `(0, 1)`.
    ///
    /// The height of any ray at the stop is `a·y1 + b·α0`.
    ///
    /// # Errors
    ///
    /// This function returns an error if the paraxial traces fail.
    pub fn stop_coefficients(&self) -> TraceResult<(f64, f64)> {
        let stop = self.system.stop_index();
        let height = |trace: &ParaxialTrace| trace.at(stop).map_or(f64::NAN, |s| s.y);
        Ok((
            height(&self.trace(1.0, 0.0)?),
            height(&self.trace(0.0, 1.0)?),
        ))
    }
    fn stop_radius(&self) -> TraceResult<f64> {
        let r = self.system.stop_semi_diameter_mm();
        if r.is_finite() && r > 0.0 {
            Ok(r)
        } else {
            Err(TraceError::InvalidSystem(
                "the stop needs a positive semi diameter".into(),
            ))
        }
    }
    fn object_distance(&self) -> f64 {
        self.system.surfaces()[0].thickness_mm()
    }
    /// Traces the marginal ray from the axial object point through the edge of the stop.
    ///
    /// # Errors
    ///
    /// This function returns [`TraceError::UnreachableStop`] if no ray from the axial object point can reach the stop
    /// edge.
    pub fn marginal_ray(&self) -> TraceResult<ParaxialTrace> {
        let r = self.stop_radius()?;
        let (a, b) = self.stop_coefficients()?;
        if self.system.object_at_infinity() {
            if a.abs() < STOP_COEFFICIENT_LIMIT {
                return Err(TraceError::UnreachableStop(
                    "collimated marginal ray cannot reach the stop edge".into(),
                ));
            }
            self.trace(r / a, 0.0)
        } else {
            let reduced = self.object_distance() / self.object_index();
            let k = b - a * reduced;
            if k.abs() < STOP_COEFFICIENT_LIMIT {
                return Err(TraceError::UnreachableStop(
                    "marginal ray cannot reach the stop edge".into(),
                ));
            }
            let alpha0 = r / k;
            self.trace(-reduced * alpha0, alpha0)
        }
    }
    /// Traces a chief ray through the stop center.
    ///
    /// `field` is the tangent of the field angle for objects at infinity and the object height (mm) otherwise.
    ///
    /// # Errors
    ///
    /// This function returns [`TraceError::UnreachableStop`] if the stop center cannot be reached.
    pub fn chief_ray_for(&self, field: f64) -> TraceResult<ParaxialTrace> {
        let (a, b) = self.stop_coefficients()?;
        let n0 = self.object_index();
        if self.system.object_at_infinity() {
            if a.abs() < STOP_COEFFICIENT_LIMIT {
                return Err(TraceError::UnreachableStop(
                    "collimated chief ray cannot reach the stop center".into(),
                ));
            }
            let alpha0 = -n0 * field;
            self.trace(-b * alpha0 / a, alpha0)
        } else {
            let reduced = self.object_distance() / n0;
            let k = b - a * reduced;
            if k.abs() < STOP_COEFFICIENT_LIMIT {
                return Err(TraceError::UnreachableStop(
                    "chief ray cannot reach the stop center".into(),
                ));
            }
            let alpha0 = -a * field / k;
            self.trace(reduced.mul_add(-alpha0, field), alpha0)
        }
    }
    /// Field value as used by [`Self::chief_ray_for`].
    ///
    /// Angle fields on a finite object are converted to an object height using the distance between object and stop.
    ///
    /// # Errors
    ///
    /// This function returns an error if a height field is combined with an object at infinity.
    pub fn field_value(&self, field: &Field) -> TraceResult<f64> {
        match (*field.spec(), self.system.object_at_infinity()) {
            (FieldSpec::Angle { x, y }, true) => {
                Ok(x.get::<radian>().tan().hypot(y.get::<radian>().tan()))
            }
            (FieldSpec::Angle { x, y }, false) => Ok(-self.system.object_to_stop_distance_mm()
                * x.get::<radian>().tan().hypot(y.get::<radian>().tan())),
            (FieldSpec::Height { x, y } | FieldSpec::Rectangle { x, y }, false) => {
                Ok(x.get::<millimeter>().hypot(y.get::<millimeter>()))
            }
            (FieldSpec::Height { .. } | FieldSpec::Rectangle { .. }, true) => Err(
                TraceError::InvalidSystem("height fields need an object at finite distance".into()),
            ),
        }
    }
    /// Traces the chief ray of a field.
    ///
    /// # Errors
    ///
    /// This function returns an error if the field is not usable with this system or the stop cannot be reached.
    pub fn chief_ray(&self, field: &Field) -> TraceResult<ParaxialTrace> {
        self.chief_ray_for(self.field_value(field)?)
    }
    /// Chief ray of a unit field, used for pupil imaging.
    ///
    /// # Errors
    ///
    /// This function returns an error if the stop cannot be reached.
    pub fn pupil_ray(&self) -> TraceResult<ParaxialTrace> {
        self.chief_ray_for(1.0)
    }
    /// Computes the first-order properties.
    ///
    /// # Errors
    ///
    /// This function returns an error if the marginal or pupil ray cannot be traced.
    pub fn cardinal_data(&self) -> TraceResult<CardinalData> {
        let power = self.power()?;
        let last = self.last_optical_surface();
        let n_last = self.indices[last];
        let to_image = self.distance_to_image(last);
        let at_last = |trace: &ParaxialTrace| {
            trace.at(last).copied().ok_or_else(|| {
                TraceError::NumericalFailure(format!("paraxial ray did not reach surface {last}"))
            })
        };
        let parallel = at_last(&self.trace(1.0, 0.0)?)?;
        let marginal_trace = self.marginal_ray()?;
        let marginal = at_last(&marginal_trace)?;
        let pupil_trace = self.pupil_ray()?;
        let pupil = at_last(&pupil_trace)?;

        let image_distance = n_last * marginal.y / marginal.alpha_after;
        let exit_pupil = if pupil.alpha_after.abs() < PUPIL_ANGLE_LIMIT {
            Pupil::at_infinity()
        } else {
            let z = n_last * pupil.y / pupil.alpha_after;
            Pupil {
                position_mm: z - to_image,
                radius_mm: (z / n_last).mul_add(-marginal.alpha_after, marginal.y).abs(),
            }
        };
        let n0 = self.object_index();
        let entrance_pupil = match (pupil_trace.first(), marginal_trace.first()) {
            (Some(p), Some(m)) if p.alpha_before.abs() >= PUPIL_ANGLE_LIMIT => {
                let z = n0 * p.y / p.alpha_before;
                Pupil {
                    position_mm: z,
                    radius_mm: (z / n0).mul_add(-m.alpha_before, m.y).abs(),
                }
            }
            _ => Pupil::at_infinity(),
        };
        Ok(CardinalData {
            effective_focal_length_mm: 1.0 / power,
            back_focal_distance_mm: n_last * parallel.y / parallel.alpha_after,
            image_distance_mm: image_distance,
            image_offset_mm: image_distance - to_image,
            entrance_pupil,
            exit_pupil,
            working_f_number: 1.0 / (2.0 * marginal_trace.final_alpha().abs()),
        })
    }
}

/// Signed paraxial indices behind every surface: mirrors negate the index.
fn signed_indices(surfaces: &[Surface], real: &[f64]) -> Vec<f64> {
    let mut sign = 1.0;
    let mut indices = Vec::with_capacity(surfaces.len());
    for (surface, n) in surfaces.iter().zip(real) {
        if surface.surface_type() == SurfaceType::Mirror {
            sign = -sign;
        }
        indices.push(sign * n);
    }
    indices
}
