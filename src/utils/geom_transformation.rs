//! Rigid body transformations between local surface frames and the global frame.
#![warn(missing_docs)]
use nalgebra::{Isometry3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use uom::si::{f64::Length, length::millimeter};

use crate::{
    error::{TraceError, TraceResult},
    millimeter,
};

/// Rotation order of Euler rotations about the x, y and z axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EulerOrder {
    /// `Rx · Ry · Rz`
    #[default]
    Xyz,
    /// `Rz · Ry · Rx`
    Zyx,
}

/// Builds the rotation matrix for the given tilt angles (in radians) in the given order.
#[must_use]
pub fn euler_rotation(tilt_x: f64, tilt_y: f64, tilt_z: f64, order: EulerOrder) -> Rotation3<f64> {
    let rx = Rotation3::from_axis_angle(&Vector3::x_axis(), tilt_x);
    let ry = Rotation3::from_axis_angle(&Vector3::y_axis(), tilt_y);
    let rz = Rotation3::from_axis_angle(&Vector3::z_axis(), tilt_z);
    match order {
        EulerOrder::Xyz => rx * ry * rz,
        EulerOrder::Zyx => rz * ry * rx,
    }
}

/// A rigid transformation mapping *local* coordinates to *global* coordinates.
///
/// Translations are stored internally in millimeters. The inverse is kept alongside the forward transform
/// since the ray tracer needs both for every surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Isometry {
    transform: Isometry3<f64>,
    inverse: Isometry3<f64>,
}
impl Default for Isometry {
    fn default() -> Self {
        Self::identity()
    }
}
impl Isometry {
    /// Creates a new [`Isometry`] from a translation and a rotation.
    ///
    /// # Errors
    ///
    /// This function returns an error if the translation contains non-finite values.
    pub fn new(translation: Point3<Length>, rotation: Rotation3<f64>) -> TraceResult<Self> {
        let t = translation.map(|c| c.get::<millimeter>());
        if t.iter().any(|c| !c.is_finite()) {
            return Err(TraceError::Other(
                "translation of an isometry must be finite".into(),
            ));
        }
        Ok(Self::from_parts(t.coords, rotation))
    }
    /// Creates a new [`Isometry`] from a translation in millimeters and a rotation.
    #[must_use]
    pub fn from_parts(translation_mm: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        let transform = Isometry3::from_parts(
            Translation3::from(translation_mm),
            UnitQuaternion::from_rotation_matrix(&rotation),
        );
        Self {
            transform,
            inverse: transform.inverse(),
        }
    }
    /// Creates a pure translation in millimeters.
    #[must_use]
    pub fn translation(translation_mm: Vector3<f64>) -> Self {
        Self::from_parts(translation_mm, Rotation3::identity())
    }
    /// Creates a pure rotation.
    #[must_use]
    pub fn rotation(rotation: Rotation3<f64>) -> Self {
        Self::from_parts(Vector3::zeros(), rotation)
    }
    /// The identity transformation.
    #[must_use]
    pub fn identity() -> Self {
        Self {
            transform: Isometry3::identity(),
            inverse: Isometry3::identity(),
        }
    }
    /// Returns the composed transformation `self · other`, i.e. `other` is applied first in the local frame of `self`.
    #[must_use]
    pub fn append(&self, other: &Self) -> Self {
        let transform = self.transform * other.transform;
        Self {
            transform,
            inverse: transform.inverse(),
        }
    }
    /// Origin of the local frame in global coordinates (mm).
    #[must_use]
    pub fn origin_mm(&self) -> Point3<f64> {
        Point3::from(self.transform.translation.vector)
    }
    /// Origin of the local frame in global coordinates.
    #[must_use]
    pub fn origin(&self) -> Point3<Length> {
        let o = self.origin_mm();
        millimeter!(o.x, o.y, o.z)
    }
    /// Rotation matrix mapping local directions to global directions.
    #[must_use]
    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        self.transform.rotation.to_rotation_matrix()
    }
    /// Local z axis expressed in global coordinates.
    #[must_use]
    pub fn local_z_axis(&self) -> Vector3<f64> {
        self.transform.transform_vector(&Vector3::z())
    }
    /// Transforms a local point (mm) into global coordinates.
    #[must_use]
    pub fn transform_point_f64(&self, p: &Point3<f64>) -> Point3<f64> {
        self.transform.transform_point(p)
    }
    /// Transforms a global point (mm) into local coordinates.
    #[must_use]
    pub fn inverse_transform_point_f64(&self, p: &Point3<f64>) -> Point3<f64> {
        self.inverse.transform_point(p)
    }
    /// Transforms a local point into global coordinates.
    #[must_use]
    pub fn transform_point(&self, p: &Point3<Length>) -> Point3<Length> {
        let g = self.transform_point_f64(&p.map(|c| c.get::<millimeter>()));
        millimeter!(g.x, g.y, g.z)
    }
    /// Transforms a local direction into global coordinates.
    #[must_use]
    pub fn transform_vector_f64(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.transform.transform_vector(v)
    }
    /// Transforms a global direction into local coordinates.
    #[must_use]
    pub fn inverse_transform_vector_f64(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.inverse.transform_vector(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn identity() {
        let iso = Isometry::identity();
        let p = Point3::new(1.0, 2.0, 3.0);
        assert_eq!(iso.transform_point_f64(&p), p);
        assert_eq!(iso.inverse_transform_point_f64(&p), p);
        assert_eq!(iso, Isometry::default());
    }
    #[test]
    fn new() {
        assert!(Isometry::new(millimeter!(f64::NAN, 0.0, 0.0), Rotation3::identity()).is_err());
        let iso = Isometry::new(millimeter!(1.0, 2.0, 3.0), Rotation3::identity()).unwrap();
        assert_abs_diff_eq!(iso.origin_mm(), Point3::new(1.0, 2.0, 3.0));
        assert_abs_diff_eq!(iso.origin().z.get::<millimeter>(), 3.0);
    }
    #[test]
    fn rotation_and_inverse() {
        let iso = Isometry::from_parts(
            Vector3::new(0.0, 0.0, 10.0),
            euler_rotation(FRAC_PI_2, 0.0, 0.0, EulerOrder::Xyz),
        );
        let g = iso.transform_point_f64(&Point3::new(0.0, 1.0, 0.0));
        assert_abs_diff_eq!(g, Point3::new(0.0, 0.0, 11.0), epsilon = 1e-12);
        let l = iso.inverse_transform_point_f64(&g);
        assert_abs_diff_eq!(l, Point3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        let v = iso.transform_vector_f64(&Vector3::z());
        assert_abs_diff_eq!(v, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-12);
        assert_abs_diff_eq!(iso.local_z_axis(), v, epsilon = 1e-12);
        assert_abs_diff_eq!(iso.inverse_transform_vector_f64(&v), Vector3::z(), epsilon = 1e-12);
    }
    #[test]
    fn append() {
        let a = Isometry::translation(Vector3::new(0.0, 0.0, 5.0));
        let b = Isometry::rotation(euler_rotation(0.0, FRAC_PI_2, 0.0, EulerOrder::Xyz));
        let c = a.append(&b);
        let g = c.transform_point_f64(&Point3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(g, Point3::new(1.0, 0.0, 5.0), epsilon = 1e-12);
    }
    #[test]
    fn euler_order() {
        let a = euler_rotation(0.1, 0.2, 0.3, EulerOrder::Xyz);
        let b = euler_rotation(0.1, 0.2, 0.3, EulerOrder::Zyx);
        assert!((a.matrix() - b.matrix()).norm() > 1e-3);
        let zero = euler_rotation(0.0, 0.0, 0.0, EulerOrder::Zyx);
        assert_abs_diff_eq!(zero.matrix(), Rotation3::<f64>::identity().matrix());
    }
}
