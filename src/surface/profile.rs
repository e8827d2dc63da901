#![warn(missing_docs)]
//! Surface profiles: sag, normal and ray intersection in the local surface frame.
//!
//! The local frame has its vertex at the origin and the optical axis along +z. All values are given in millimeters.
use nalgebra::{Point3, Vector3};
use roots::find_roots_quadratic;
use serde::{Deserialize, Serialize};
use uom::si::{f64::Length, length::millimeter};

use crate::{
    error::{TraceError, TraceResult},
    solvers::brent,
};

/// Smallest ray parameter still treated as a forward intersection.
const T_FORWARD_EPS: f64 = -1e-9;
/// Relative tolerance when checking that a quadric root lies on the sheet described by the sag function.
const SHEET_TOLERANCE: f64 = 1e-6;
/// Number of intervals of the sign change scan preceding the Brent fallback.
const BRACKET_SAMPLES: usize = 64;

/// Geometrical shape of a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Profile {
    /// flat surface at `z = 0`
    #[default]
    Plane,
    /// sphere or conic section of revolution
    Conic {
        /// signed vertex radius of curvature. An infinite radius denotes a flat surface.
        radius: Length,
        /// conic constant `k`
        conic: f64,
    },
    /// conic plus even order polynomial `Σ aₘ r^{2m}`, `m = 1..`
    EvenAsphere {
        /// signed vertex radius of curvature
        radius: Length,
        /// conic constant `k`
        conic: f64,
        /// polynomial coefficients of `r², r⁴, …` in mm-based units
        coefficients: Vec<f64>,
    },
    /// conic plus polynomial `Σ aₘ r^m`, `m = 1..`
    OddAsphere {
        /// signed vertex radius of curvature
        radius: Length,
        /// conic constant `k`
        conic: f64,
        /// polynomial coefficients of `r, r², r³, …` in mm-based units
        coefficients: Vec<f64>,
    },
}

/// Result of a successful ray / surface intersection in local coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceIntersection {
    /// ray parameter (distance along the normalized direction, may be negative)
    pub t: f64,
    /// intersection point
    pub point: Point3<f64>,
    /// unit surface normal pointing towards local +z
    pub normal: Vector3<f64>,
}

/// Parameters of the iterative intersection solver for aspheric profiles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntersectionTolerance {
    /// convergence threshold on the ray parameter update (mm)
    pub tolerance: f64,
    /// maximum number of Newton iterations per start value
    pub max_iterations: usize,
}
impl Default for IntersectionTolerance {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 30,
        }
    }
}

impl Profile {
    /// Creates a spherical profile.
    ///
    /// # Errors
    ///
    /// This function returns an error if the radius is zero or `NaN`.
    pub fn sphere(radius: Length) -> TraceResult<Self> {
        Self::conic(radius, 0.0)
    }
    /// Creates a conic profile.
    ///
    /// # Errors
    ///
    /// This function returns an error if the radius is zero or `NaN` or the conic constant is not finite.
    pub fn conic(radius: Length, conic: f64) -> TraceResult<Self> {
        check_radius(radius)?;
        if !conic.is_finite() {
            return Err(TraceError::InvalidSystem(
                "conic constant must be finite".into(),
            ));
        }
        Ok(Self::Conic { radius, conic })
    }
    /// Creates an even asphere.
    ///
    /// # Errors
    ///
    /// This function returns an error if the radius is invalid or any coefficient is not finite.
    pub fn even_asphere(radius: Length, conic: f64, coefficients: Vec<f64>) -> TraceResult<Self> {
        check_radius(radius)?;
        check_coefficients(conic, &coefficients)?;
        Ok(Self::EvenAsphere {
            radius,
            conic,
            coefficients,
        })
    }
    /// Creates an odd asphere.
    ///
    /// # Errors
    ///
    /// This function returns an error if the radius is invalid or any coefficient is not finite.
    pub fn odd_asphere(radius: Length, conic: f64, coefficients: Vec<f64>) -> TraceResult<Self> {
        check_radius(radius)?;
        check_coefficients(conic, &coefficients)?;
        Ok(Self::OddAsphere {
            radius,
            conic,
            coefficients,
        })
    }
    /// Vertex curvature `c = 1/R` in 1/mm. Flat profiles return 0.
    #[must_use]
    pub fn curvature(&self) -> f64 {
        match self {
            Self::Plane => 0.0,
            Self::Conic { radius, .. }
            | Self::EvenAsphere { radius, .. }
            | Self::OddAsphere { radius, .. } => {
                let r = radius.get::<millimeter>();
                if r.is_infinite() {
                    0.0
                } else {
                    1.0 / r
                }
            }
        }
    }
    /// Conic constant. Flat profiles return 0.
    #[must_use]
    pub const fn conic_constant(&self) -> f64 {
        match self {
            Self::Plane => 0.0,
            Self::Conic { conic, .. }
            | Self::EvenAsphere { conic, .. }
            | Self::OddAsphere { conic, .. } => *conic,
        }
    }
    /// Returns true if the profile needs the iterative intersection solver.
    #[must_use]
    pub fn is_aspheric(&self) -> bool {
        match self {
            Self::Plane | Self::Conic { .. } => false,
            Self::EvenAsphere { coefficients, .. } | Self::OddAsphere { coefficients, .. } => {
                coefficients.iter().any(|c| *c != 0.0)
            }
        }
    }
    fn conic_sag(&self, r: f64) -> Option<f64> {
        let c = self.curvature();
        if c == 0.0 {
            return Some(0.0);
        }
        let arg = (1.0 + self.conic_constant()) * c * c * r * r;
        let root = (1.0 - arg).sqrt();
        if root.is_nan() {
            return None;
        }
        Some(c * r * r / (1.0 + root))
    }
    fn conic_sag_derivative(&self, r: f64) -> Option<f64> {
        let c = self.curvature();
        if c == 0.0 {
            return Some(0.0);
        }
        let root = (1.0 - (1.0 + self.conic_constant()) * c * c * r * r).sqrt();
        if root.is_nan() || root == 0.0 {
            return None;
        }
        Some(c * r / root)
    }
    fn polynomial(&self, r: f64) -> (f64, f64) {
        match self {
            Self::EvenAsphere { coefficients, .. } => {
                let r2 = r * r;
                let mut value = 0.0;
                let mut derivative = 0.0;
                let mut power = r2;
                let mut power_minus_one = r;
                for (i, a) in coefficients.iter().enumerate() {
                    let m = crate::utils::usize_to_f64(2 * (i + 1));
                    value += a * power;
                    derivative += a * m * power_minus_one;
                    power *= r2;
                    power_minus_one *= r2;
                }
                (value, derivative)
            }
            Self::OddAsphere { coefficients, .. } => {
                let mut value = 0.0;
                let mut derivative = 0.0;
                let mut power = r;
                let mut power_minus_one = 1.0;
                for (i, a) in coefficients.iter().enumerate() {
                    let m = crate::utils::usize_to_f64(i + 1);
                    value += a * power;
                    derivative += a * m * power_minus_one;
                    power *= r;
                    power_minus_one *= r;
                }
                (value, derivative)
            }
            _ => (0.0, 0.0),
        }
    }
    /// Sag `z(r)` at the radial coordinate `r` (mm).
    ///
    /// Returns `None` outside the domain of the conic term.
    #[must_use]
    pub fn sag(&self, r: f64) -> Option<f64> {
        Some(self.conic_sag(r)? + self.polynomial(r).0)
    }
    /// Radial derivative `dz/dr` of the sag.
    #[must_use]
    pub fn sag_derivative(&self, r: f64) -> Option<f64> {
        Some(self.conic_sag_derivative(r)? + self.polynomial(r).1)
    }
    /// Unit normal at the surface point above `(x, y)`, pointing towards local +z.
    #[must_use]
    pub fn normal(&self, x: f64, y: f64) -> Option<Vector3<f64>> {
        let r = x.hypot(y);
        if r == 0.0 {
            return Some(Vector3::z());
        }
        let dzdr = self.sag_derivative(r)?;
        let n = Vector3::new(-dzdr * x / r, -dzdr * y / r, 1.0);
        let norm = n.norm();
        if !norm.is_finite() {
            return None;
        }
        Some(n / norm)
    }
    /// Intersects a ray given in local coordinates with this profile.
    ///
    /// The nearest root with `t ≥ 0` on the physical sheet of the surface is returned. If no such root exists, the
    /// valid root with the largest negative `t` is returned (virtual propagation). `semi_diameter` is used for the
    /// start values of the aspheric solver only; aperture clipping is left to the caller.
    #[must_use]
    pub fn intersect(
        &self,
        position: &Point3<f64>,
        direction: &Vector3<f64>,
        semi_diameter: Option<f64>,
        tolerance: &IntersectionTolerance,
    ) -> Option<SurfaceIntersection> {
        let roots = self.quadric_roots(position, direction);
        if !self.is_aspheric() {
            let t = select_root(&roots)?;
            return self.intersection_at(position, direction, t);
        }
        self.intersect_asphere(position, direction, &roots, semi_diameter, tolerance)
    }
    fn intersection_at(
        &self,
        position: &Point3<f64>,
        direction: &Vector3<f64>,
        t: f64,
    ) -> Option<SurfaceIntersection> {
        let point = position + direction * t;
        let normal = self.normal(point.x, point.y)?;
        if !t.is_finite() || point.iter().any(|c| !c.is_finite()) {
            return None;
        }
        Some(SurfaceIntersection { t, point, normal })
    }
    /// Roots of the conic part that lie on the sheet described by the sag function.
    fn quadric_roots(&self, p: &Point3<f64>, d: &Vector3<f64>) -> Vec<f64> {
        let c = self.curvature();
        if c == 0.0 {
            if d.z.abs() < f64::EPSILON {
                return Vec::new();
            }
            return vec![-p.z / d.z];
        }
        let k1 = 1.0 + self.conic_constant();
        let a = c * (d.x * d.x + d.y * d.y + k1 * d.z * d.z);
        let b = 2.0 * (c * (p.x * d.x + p.y * d.y + k1 * p.z * d.z) - d.z);
        let cc = c * (p.x * p.x + p.y * p.y + k1 * p.z * p.z) - 2.0 * p.z;
        let candidates = find_roots_quadratic(a, b, cc);
        candidates
            .as_ref()
            .iter()
            .copied()
            .filter(|t| t.is_finite() && self.on_conic_sheet(&(p + d * *t)))
            .collect()
    }
    fn on_conic_sheet(&self, point: &Point3<f64>) -> bool {
        self.conic_sag(point.x.hypot(point.y))
            .is_some_and(|z| (z - point.z).abs() <= SHEET_TOLERANCE * (1.0 + z.abs()))
    }
    fn intersect_asphere(
        &self,
        p: &Point3<f64>,
        d: &Vector3<f64>,
        conic_roots: &[f64],
        semi_diameter: Option<f64>,
        tolerance: &IntersectionTolerance,
    ) -> Option<SurfaceIntersection> {
        let mut seeds: Vec<f64> = Vec::with_capacity(8);
        let mut sorted_roots = conic_roots.to_vec();
        sorted_roots.sort_by(f64::total_cmp);
        seeds.extend(sorted_roots.iter().filter(|t| **t > 0.0));
        if d.z.abs() > 1e-14 {
            seeds.push(-p.z / d.z);
        }
        if let Some(sd) = semi_diameter.filter(|sd| sd.is_finite() && *sd > 0.0) {
            let current_r = p.x.hypot(p.y);
            let dir_r = d.x.hypot(d.y);
            if dir_r > 1e-14 {
                for fraction in [0.8, 1.0] {
                    let target = sd * fraction;
                    if target > current_r {
                        seeds.push((target - current_r) / dir_r);
                    }
                }
            }
        }
        if seeds.is_empty() {
            seeds.extend([1e-6, 1e-4, 1e-2]);
        }
        let mut converged: Vec<SurfaceIntersection> = Vec::new();
        for seed in seeds {
            if let Some(t) = self.newton_on_ray(p, d, seed, tolerance) {
                if let Some(hit) = self.intersection_at(p, d, t) {
                    let inside = semi_diameter.map_or(true, |sd| hit.point.x.hypot(hit.point.y) <= sd);
                    if inside && t >= T_FORWARD_EPS {
                        return Some(hit);
                    }
                    converged.push(hit);
                }
            }
        }
        if converged.is_empty() {
            let t = self.bracketed_root(p, d, semi_diameter, tolerance)?;
            return self.intersection_at(p, d, t);
        }
        let ts: Vec<f64> = converged.iter().map(|h| h.t).collect();
        let t = select_root(&ts)?;
        converged.into_iter().find(|h| h.t == t)
    }
    /// Scans the ray for a sign change of `sag(r(t)) − z(t)` and refines the first forward one by Brent's method.
    fn bracketed_root(
        &self,
        p: &Point3<f64>,
        d: &Vector3<f64>,
        semi_diameter: Option<f64>,
        tolerance: &IntersectionTolerance,
    ) -> Option<f64> {
        let residual = |t: f64| {
            let point = p + d * t;
            self.sag(point.x.hypot(point.y)).map_or(f64::NAN, |z| z - point.z)
        };
        let center = if d.z.abs() > 1e-14 { -p.z / d.z } else { 0.0 };
        let half_width = 4.0 * semi_diameter.filter(|sd| sd.is_finite()).unwrap_or(1.0).max(1.0);
        let start = (center - half_width).max(T_FORWARD_EPS);
        let stop = center + half_width;
        if stop <= start {
            return None;
        }
        let step = (stop - start) / crate::utils::usize_to_f64(BRACKET_SAMPLES);
        let mut t_prev = start;
        let mut f_prev = residual(t_prev);
        for i in 1..=BRACKET_SAMPLES {
            let t = crate::utils::usize_to_f64(i).mul_add(step, start);
            let f = residual(t);
            if f_prev.is_finite() && f.is_finite() && f_prev * f <= 0.0 {
                return brent(residual, t_prev, t, tolerance.tolerance).ok();
            }
            t_prev = t;
            f_prev = f;
        }
        None
    }
    /// Damped Newton iteration on `f(t) = sag(r(t)) − z(t)`.
    fn newton_on_ray(
        &self,
        p: &Point3<f64>,
        d: &Vector3<f64>,
        seed: f64,
        tolerance: &IntersectionTolerance,
    ) -> Option<f64> {
        let residual = |t: f64| -> Option<(f64, f64)> {
            let x = d.x.mul_add(t, p.x);
            let y = d.y.mul_add(t, p.y);
            let z = d.z.mul_add(t, p.z);
            let r = x.hypot(y);
            let f = self.sag(r)? - z;
            let drdt = if r > 1e-14 { (x * d.x + y * d.y) / r } else { 0.0 };
            let dfdt = self.sag_derivative(r)?.mul_add(drdt, -d.z);
            Some((f, dfdt))
        };
        let mut t = seed;
        if !t.is_finite() {
            return None;
        }
        for _ in 0..tolerance.max_iterations {
            let (f, dfdt) = residual(t)?;
            if f.abs() < tolerance.tolerance {
                return Some(t);
            }
            if !dfdt.is_finite() || dfdt.abs() < 1e-14 {
                return None;
            }
            let mut step = f / dfdt;
            let mut accepted = false;
            for _ in 0..8 {
                if let Some((f_new, _)) = residual(t - step) {
                    if f_new.abs() < f.abs() || step.abs() < tolerance.tolerance {
                        accepted = true;
                        break;
                    }
                }
                step *= 0.5;
            }
            if !accepted {
                return None;
            }
            t -= step;
            if step.abs() < tolerance.tolerance {
                return Some(t);
            }
        }
        None
    }
}

fn select_root(roots: &[f64]) -> Option<f64> {
    let forward = roots
        .iter()
        .copied()
        .filter(|t| *t >= T_FORWARD_EPS)
        .min_by(f64::total_cmp);
    forward.or_else(|| roots.iter().copied().max_by(f64::total_cmp))
}

fn check_radius(radius: Length) -> TraceResult<()> {
    let r = radius.get::<millimeter>();
    if r.is_nan() || r == 0.0 {
        return Err(TraceError::InvalidSystem(
            "radius of curvature must be non-zero".into(),
        ));
    }
    Ok(())
}

fn check_coefficients(conic: f64, coefficients: &[f64]) -> TraceResult<()> {
    if !conic.is_finite() || coefficients.iter().any(|c| !c.is_finite()) {
        return Err(TraceError::InvalidSystem(
            "aspheric coefficients must be finite".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::millimeter;
    use approx::assert_abs_diff_eq;

    #[test]
    fn constructors() {
        assert!(Profile::sphere(millimeter!(0.0)).is_err());
        assert!(Profile::sphere(millimeter!(f64::NAN)).is_err());
        assert!(Profile::conic(millimeter!(10.0), f64::NAN).is_err());
        assert!(Profile::even_asphere(millimeter!(10.0), 0.0, vec![f64::INFINITY]).is_err());
        assert!(Profile::sphere(millimeter!(f64::INFINITY)).is_ok());
        assert!(Profile::odd_asphere(millimeter!(10.0), 0.0, vec![0.0, 1e-4]).is_ok());
    }
    #[test]
    fn curvature() {
        assert_eq!(Profile::Plane.curvature(), 0.0);
        assert_eq!(
            Profile::sphere(millimeter!(f64::INFINITY))
                .unwrap()
                .curvature(),
            0.0
        );
        assert_eq!(Profile::sphere(millimeter!(-50.0)).unwrap().curvature(), -0.02);
    }
    #[test]
    fn sphere_sag() {
        let p = Profile::sphere(millimeter!(50.0)).unwrap();
        let r = 10.0;
        assert_abs_diff_eq!(
            p.sag(r).unwrap(),
            50.0 - (2500.0_f64 - 100.0).sqrt(),
            epsilon = 1e-12
        );
        assert!(p.sag(60.0).is_none());
        assert_eq!(Profile::Plane.sag(3.0).unwrap(), 0.0);
    }
    #[test]
    fn parabola_sag() {
        let p = Profile::conic(millimeter!(100.0), -1.0).unwrap();
        assert_abs_diff_eq!(p.sag(20.0).unwrap(), 400.0 / 200.0, epsilon = 1e-12);
        assert_abs_diff_eq!(p.sag_derivative(20.0).unwrap(), 0.2, epsilon = 1e-12);
    }
    #[test]
    fn asphere_sag() {
        let even = Profile::even_asphere(millimeter!(f64::INFINITY), 0.0, vec![0.01, 1e-4]).unwrap();
        assert_abs_diff_eq!(even.sag(2.0).unwrap(), 0.04 + 16e-4, epsilon = 1e-14);
        assert_abs_diff_eq!(
            even.sag_derivative(2.0).unwrap(),
            0.04 + 4.0 * 8e-4,
            epsilon = 1e-14
        );
        let odd = Profile::odd_asphere(millimeter!(f64::INFINITY), 0.0, vec![0.1, 0.01]).unwrap();
        assert_abs_diff_eq!(odd.sag(2.0).unwrap(), 0.2 + 0.04, epsilon = 1e-14);
        assert_abs_diff_eq!(odd.sag_derivative(2.0).unwrap(), 0.1 + 0.04, epsilon = 1e-14);
    }
    #[test]
    fn normal() {
        let p = Profile::sphere(millimeter!(10.0)).unwrap();
        let n = p.normal(0.0, 0.0).unwrap();
        assert_abs_diff_eq!(n, Vector3::z());
        let x = 6.0;
        let z = p.sag(x).unwrap();
        let n = p.normal(x, 0.0).unwrap();
        // normal of a sphere points towards its center
        let expected = (Point3::new(0.0, 0.0, 10.0) - Point3::new(x, 0.0, z)).normalize();
        assert_abs_diff_eq!(n, expected, epsilon = 1e-12);
    }
    #[test]
    fn intersect_plane() {
        let tol = IntersectionTolerance::default();
        let hit = Profile::Plane
            .intersect(
                &Point3::new(1.0, 0.0, -5.0),
                &Vector3::new(0.0, 0.0, 1.0),
                None,
                &tol,
            )
            .unwrap();
        assert_abs_diff_eq!(hit.t, 5.0);
        assert_abs_diff_eq!(hit.point, Point3::new(1.0, 0.0, 0.0));
        assert!(Profile::Plane
            .intersect(&Point3::origin(), &Vector3::x(), None, &tol)
            .is_none());
    }
    #[test]
    fn intersect_sphere() {
        let tol = IntersectionTolerance::default();
        let p = Profile::sphere(millimeter!(50.0)).unwrap();
        let hit = p
            .intersect(
                &Point3::new(10.0, 0.0, -10.0),
                &Vector3::z(),
                None,
                &tol,
            )
            .unwrap();
        assert_abs_diff_eq!(hit.point.z, p.sag(10.0).unwrap(), epsilon = 1e-12);
        assert_abs_diff_eq!(hit.t, 10.0 + p.sag(10.0).unwrap(), epsilon = 1e-12);
        let concave = Profile::sphere(millimeter!(-50.0)).unwrap();
        let hit = concave
            .intersect(
                &Point3::new(10.0, 0.0, -10.0),
                &Vector3::z(),
                None,
                &tol,
            )
            .unwrap();
        assert_abs_diff_eq!(hit.point.z, concave.sag(10.0).unwrap(), epsilon = 1e-12);
        assert!(p
            .intersect(&Point3::new(60.0, 0.0, -10.0), &Vector3::z(), None, &tol)
            .is_none());
    }
    #[test]
    fn intersect_virtual() {
        let tol = IntersectionTolerance::default();
        let p = Profile::sphere(millimeter!(50.0)).unwrap();
        let hit = p
            .intersect(&Point3::new(5.0, 0.0, 1.0), &Vector3::z(), None, &tol)
            .unwrap();
        assert!(hit.t < 0.0);
        assert_abs_diff_eq!(hit.point.z, p.sag(5.0).unwrap(), epsilon = 1e-12);
    }
    #[test]
    fn intersect_even_asphere() {
        let tol = IntersectionTolerance::default();
        let p = Profile::even_asphere(millimeter!(40.0), -0.5, vec![0.0, 2e-5, -1e-8]).unwrap();
        let start = Point3::new(3.0, -4.0, -20.0);
        let dir = Vector3::new(0.05, 0.02, 1.0).normalize();
        let hit = p.intersect(&start, &dir, Some(12.0), &tol).unwrap();
        let r = hit.point.x.hypot(hit.point.y);
        assert_abs_diff_eq!(hit.point.z, p.sag(r).unwrap(), epsilon = 1e-10);
        assert!(hit.t > 0.0);
        assert_abs_diff_eq!(hit.normal.norm(), 1.0, epsilon = 1e-12);
    }
    #[test]
    fn intersect_odd_asphere() {
        let tol = IntersectionTolerance::default();
        let p = Profile::odd_asphere(millimeter!(f64::INFINITY), 0.0, vec![0.0, 0.0, 1e-4]).unwrap();
        let hit = p
            .intersect(&Point3::new(5.0, 0.0, -3.0), &Vector3::z(), None, &tol)
            .unwrap();
        assert_abs_diff_eq!(hit.point.z, 1e-4 * 125.0, epsilon = 1e-12);
    }
    #[test]
    fn bracketed_root() {
        let tol = IntersectionTolerance::default();
        let p = Profile::even_asphere(millimeter!(50.0), 0.0, vec![0.0, 1e-5]).unwrap();
        let origin = Point3::new(0.0, 3.0, -5.0);
        let t = p.bracketed_root(&origin, &Vector3::z(), Some(10.0), &tol).unwrap();
        let newton = p.intersect(&origin, &Vector3::z(), Some(10.0), &tol).unwrap();
        assert_abs_diff_eq!(t, newton.t, epsilon = 1e-9);
    }
}
