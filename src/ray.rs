#![warn(missing_docs)]
//! Module for handling geometric rays
use nalgebra::{Point3, Vector3};
use num::Zero;
use uom::si::{
    f64::Length,
    length::{micrometer, millimeter},
};

use crate::{
    error::{TraceError, TraceResult},
    millimeter,
    utils::geom_transformation::Isometry,
};

/// Struct that contains all information about a geometric ray.
///
/// Positions are stored in millimeters. The direction is always normalized (direction cosines).
#[derive(Debug, Clone, PartialEq)]
pub struct Ray {
    /// current position (mm)
    pos: Point3<f64>,
    /// position history (mm)
    pos_hist: Vec<Point3<f64>>,
    /// current propagation direction (direction cosines)
    dir: Vector3<f64>,
    /// wavelength
    wvl: Length,
    /// accumulated optical path length (mm)
    path_length: f64,
    /// refractive index of the medium the ray is currently propagating in
    refractive_index: f64,
    /// true if the ray is allowed to propagate further
    valid: bool,
}
impl Ray {
    /// Creates a new [`Ray`] in air.
    ///
    /// # Errors
    /// This function returns an error if
    ///  - the given wavelength is <= 0.0, `NaN` or +inf
    ///  - the position is not finite
    ///  - the direction vector has a zero length or is not finite
    pub fn new(position: Point3<f64>, direction: Vector3<f64>, wavelength: Length) -> TraceResult<Self> {
        if wavelength.is_zero() || wavelength.is_sign_negative() || !wavelength.is_finite() {
            return Err(TraceError::Other("wavelength must be >0".into()));
        }
        if position.iter().any(|c| !c.is_finite()) {
            return Err(TraceError::Other("position must be finite".into()));
        }
        let norm = direction.norm();
        if norm.is_zero() || !norm.is_finite() {
            return Err(TraceError::Other(
                "length of direction must be >0 and finite".into(),
            ));
        }
        Ok(Self {
            pos: position,
            pos_hist: Vec::with_capacity(16),
            dir: direction / norm,
            wvl: wavelength,
            path_length: 0.0,
            refractive_index: 1.0,
            valid: true,
        })
    }
    /// Creates a ray at the given position propagating along the z axis.
    ///
    /// # Errors
    /// This function returns an error if the wavelength or the position is invalid.
    pub fn new_collimated(position: Point3<f64>, wavelength: Length) -> TraceResult<Self> {
        Self::new(position, Vector3::z(), wavelength)
    }
    /// Current position in mm.
    #[must_use]
    pub const fn position_mm(&self) -> Point3<f64> {
        self.pos
    }
    /// Current position.
    #[must_use]
    pub fn position(&self) -> Point3<Length> {
        millimeter!(self.pos.x, self.pos.y, self.pos.z)
    }
    /// Positions visited before the current one, oldest first.
    #[must_use]
    pub fn position_history(&self) -> &[Point3<f64>] {
        &self.pos_hist
    }
    /// Current direction (normalized).
    #[must_use]
    pub const fn direction(&self) -> Vector3<f64> {
        self.dir
    }
    /// Wavelength of this ray.
    #[must_use]
    pub const fn wavelength(&self) -> Length {
        self.wvl
    }
    /// Wavelength in µm.
    #[must_use]
    pub fn wavelength_um(&self) -> f64 {
        self.wvl.get::<micrometer>()
    }
    /// Accumulated optical path length in mm.
    #[must_use]
    pub const fn path_length_mm(&self) -> f64 {
        self.path_length
    }
    /// Accumulated optical path length.
    #[must_use]
    pub fn path_length(&self) -> Length {
        Length::new::<millimeter>(self.path_length)
    }
    /// Overrides the accumulated optical path length (e.g. to start collimated rays on a common wavefront).
    pub fn set_path_length_mm(&mut self, path_length: f64) {
        self.path_length = path_length;
    }
    /// Refractive index of the medium the ray currently propagates in.
    #[must_use]
    pub const fn refractive_index(&self) -> f64 {
        self.refractive_index
    }
    /// Sets the refractive index of the current medium.
    ///
    /// # Errors
    /// This function returns an error if the index is < 1.0 or not finite.
    pub fn set_refractive_index(&mut self, refractive_index: f64) -> TraceResult<()> {
        if refractive_index < 1.0 || !refractive_index.is_finite() {
            return Err(TraceError::Other(
                "the refractive index must be >=1.0 and finite".into(),
            ));
        }
        self.refractive_index = refractive_index;
        Ok(())
    }
    /// Returns true if the ray may propagate further.
    #[must_use]
    pub const fn valid(&self) -> bool {
        self.valid
    }
    /// Invalidates this [`Ray`].
    pub fn set_invalid(&mut self) {
        self.valid = false;
    }
    /// Propagates the ray by the (signed) distance `length` (mm) along its direction.
    ///
    /// Negative lengths denote virtual propagation and reduce the optical path length accordingly.
    ///
    /// # Errors
    /// This function returns an error if the length is not finite.
    pub fn propagate(&mut self, length: f64) -> TraceResult<()> {
        if !length.is_finite() {
            return Err(TraceError::NumericalFailure(
                "propagation length must be finite".into(),
            ));
        }
        self.pos_hist.push(self.pos);
        self.pos += self.dir * length;
        self.path_length += length * self.refractive_index;
        Ok(())
    }
    /// Refracts the ray at a surface with the given unit normal into a medium with index `n2`.
    ///
    /// The normal may point to either side of the surface. Returns `false` and invalidates the ray on total internal
    /// reflection.
    ///
    /// # Errors
    /// This function returns an error if `n2` is < 1.0 or not finite.
    pub fn refract_on_normal(&mut self, normal: &Vector3<f64>, n2: f64) -> TraceResult<bool> {
        if n2 < 1.0 || !n2.is_finite() {
            return Err(TraceError::Other(
                "the refractive index must be >=1.0 and finite".into(),
            ));
        }
        let mut n = normal.normalize();
        if self.dir.dot(&n) > 0.0 {
            n = -n;
        }
        let mu = self.refractive_index / n2;
        let cos_i = -self.dir.dot(&n);
        let k = (mu * mu).mul_add(-cos_i.mul_add(-cos_i, 1.0), 1.0);
        if k < 0.0 {
            self.valid = false;
            return Ok(false);
        }
        self.dir = (self.dir * mu + n * mu.mul_add(cos_i, -k.sqrt())).normalize();
        self.refractive_index = n2;
        Ok(true)
    }
    /// Reflects the ray at a surface with the given unit normal. The refractive index is unchanged.
    pub fn reflect_on_normal(&mut self, normal: &Vector3<f64>) {
        let n = normal.normalize();
        self.dir = (self.dir - 2.0 * self.dir.dot(&n) * n).normalize();
    }
    /// Get [`Ray`] translated and rotated by given [`Isometry`]
    #[must_use]
    pub fn transformed_ray(&self, isometry: &Isometry) -> Self {
        let mut new_ray = self.clone();
        new_ray.pos = isometry.transform_point_f64(&self.pos);
        new_ray.dir = isometry.transform_vector_f64(&self.dir);
        new_ray
    }
    /// Get [`Ray`] inverse translated and rotated by given [`Isometry`]
    #[must_use]
    pub fn inverse_transformed_ray(&self, isometry: &Isometry) -> Self {
        let mut new_ray = self.clone();
        new_ray.pos = isometry.inverse_transform_point_f64(&self.pos);
        new_ray.dir = isometry.inverse_transform_vector_f64(&self.dir);
        new_ray
    }
}
