//! Paraxial rays of afocal systems.
//!
//! An afocal system has no focal length, so the marginal and chief rays are set up from the magnifications of the
//! system instead. The lateral magnification `β` follows from a unit-high ray parallel to the axis, the angular
//! magnification `γ = ᾱ_out / ᾱ_in` from the chief ray. The Lagrange invariant requires `γ·β = 1`.
//!
//! The chief ray of an object at infinity is found from the smallest right singular vector of the weighted
//! sensitivity matrix of the two conditions "passes the stop center" and "leaves the system collimated", scaled to
//! the field angle and refined by a damped iteration with backtracking.
use log::{debug, warn};
use nalgebra::Matrix2;

use super::{ParaxialSystem, ParaxialTrace};
use crate::{
    error::{TraceError, TraceResult},
    system::Field,
};

/// Maximum number of refinement steps of the chief ray.
const MAX_REFINEMENT_STEPS: usize = 12;
/// Maximum number of step halvings per refinement step.
const MAX_BACKTRACKING: usize = 8;
/// Relative stop miss (in units of the stop radius) accepted as converged.
const STOP_MISS_TOLERANCE: f64 = 1e-12;
/// Smallest usable angle component of the singular vector.
const SINGULAR_ANGLE_LIMIT: f64 = 1e-14;

/// Magnifications and chief ray start values of an afocal system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AfocalData {
    /// lateral magnification `β = y_out / y_in` of a ray parallel to the axis
    pub lateral_magnification: f64,
    /// angular magnification `γ = ᾱ_out / ᾱ_in` of the chief ray
    pub angular_magnification: f64,
    /// height at surface 1 of the chief ray of a unit field
    pub chief_height: f64,
    /// object space reduced angle of the chief ray of a unit field
    pub chief_angle: f64,
    /// number of refinement steps
    pub iterations: usize,
    /// remaining stop miss of the unit chief ray (mm)
    pub stop_miss_mm: f64,
}
impl AfocalData {
    /// Product `γ·β`, which equals 1 for a consistent afocal ray setup.
    #[must_use]
    pub fn magnification_product(&self) -> f64 {
        self.angular_magnification * self.lateral_magnification
    }
}

struct UnitChief {
    height: f64,
    angle: f64,
    iterations: usize,
    miss: f64,
}

/// Solves the chief ray of a unit field (`tan θ = 1` or unit object height).
fn solve_unit_chief(paraxial: &ParaxialSystem<'_>) -> TraceResult<UnitChief> {
    let (a, b) = paraxial.stop_coefficients()?;
    let c = paraxial.trace(1.0, 0.0)?.final_alpha();
    let d = paraxial.trace(0.0, 1.0)?.final_alpha();
    let radius = paraxial.system().stop_semi_diameter_mm();
    let stop_weight = if radius.is_finite() && radius > 0.0 {
        1.0 / radius
    } else {
        1.0
    };
    let output_weight = 1.0 / d.abs().max(f64::EPSILON);
    let sensitivity = Matrix2::new(stop_weight * a, stop_weight * b, output_weight * c, 0.0);
    let svd = sensitivity.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| TraceError::NumericalFailure("singular value decomposition failed".into()))?;
    let smallest = usize::from(svd.singular_values[1] < svd.singular_values[0]);
    let (v_height, v_angle) = (v_t[(smallest, 0)], v_t[(smallest, 1)]);
    if v_angle.abs() < SINGULAR_ANGLE_LIMIT {
        return Err(TraceError::UnreachableStop(
            "afocal chief ray cannot be scaled to a field angle".into(),
        ));
    }
    // chief rays of positive fields have a negative reduced angle
    let angle = -paraxial.object_index();
    let mut height = v_height * angle / v_angle;
    let stop = paraxial.system().stop_index();
    let stop_height = |h: f64| -> TraceResult<f64> {
        paraxial
            .trace(h, angle)?
            .at(stop)
            .map(|s| s.y)
            .ok_or_else(|| TraceError::UnreachableStop("paraxial ray does not reach the stop".into()))
    };
    let tolerance = STOP_MISS_TOLERANCE * radius.max(1.0);
    let mut miss = stop_height(height)?;
    let mut iterations = 0;
    while miss.abs() > tolerance && iterations < MAX_REFINEMENT_STEPS {
        if a.abs() < SINGULAR_ANGLE_LIMIT {
            break;
        }
        iterations += 1;
        let step = -miss / a;
        let mut damping: f64 = 1.0;
        let mut improved = false;
        for _ in 0..MAX_BACKTRACKING {
            let candidate = damping.mul_add(step, height);
            let candidate_miss = stop_height(candidate)?;
            if candidate_miss.abs() < miss.abs() {
                height = candidate;
                miss = candidate_miss;
                improved = true;
                break;
            }
            damping *= 0.5;
        }
        if !improved {
            break;
        }
    }
    debug!("afocal chief ray: y1={height:.6e} α0={angle:.6e} after {iterations} refinement steps");
    Ok(UnitChief {
        height,
        angle,
        iterations,
        miss,
    })
}

/// Sets up the marginal and chief rays of an afocal system for the given field.
///
/// For an object at infinity the marginal ray enters parallel to the axis and is scaled to the stop edge. For a
/// finite object it starts at the axial object point with `α₁ = β` and `h₁ = −(s₁/N₁)·β`.
///
/// # Errors
///
/// This function returns an error if the paraxial rays cannot be traced or the stop cannot be reached.
pub fn afocal_rays(
    paraxial: &ParaxialSystem<'_>,
    field: &Field,
) -> TraceResult<(ParaxialTrace, ParaxialTrace, AfocalData)> {
    let system = paraxial.system();
    let last = paraxial.last_optical_surface();
    let lateral_magnification = paraxial
        .trace(1.0, 0.0)?
        .at(last)
        .map_or(f64::NAN, |s| s.y);
    let field_value = paraxial.field_value(field)?;
    let (marginal, chief, unit) = if system.object_at_infinity() {
        let unit = solve_unit_chief(paraxial)?;
        let chief = paraxial.trace(unit.height * field_value, unit.angle * field_value)?;
        (paraxial.marginal_ray()?, chief, unit)
    } else {
        let reduced = system.surfaces()[0].thickness_mm() / paraxial.object_index();
        let marginal = paraxial.trace(-reduced * lateral_magnification, lateral_magnification)?;
        let unit_trace = paraxial.chief_ray_for(1.0)?;
        let unit = unit_trace
            .first()
            .map(|s| UnitChief {
                height: s.y,
                angle: s.alpha_before,
                iterations: 0,
                miss: unit_trace.at(system.stop_index()).map_or(f64::NAN, |s| s.y),
            })
            .ok_or_else(|| TraceError::InvalidSystem("system has no surfaces".into()))?;
        (marginal, paraxial.chief_ray_for(field_value)?, unit)
    };
    let unit_trace = paraxial.trace(unit.height, unit.angle)?;
    let angular_magnification = unit_trace.final_alpha() / unit.angle;
    let data = AfocalData {
        lateral_magnification,
        angular_magnification,
        chief_height: unit.height,
        chief_angle: unit.angle,
        iterations: unit.iterations,
        stop_miss_mm: unit.miss.abs(),
    };
    if (data.magnification_product() - 1.0).abs() > 1e-6 {
        warn!(
            "afocal magnifications are inconsistent: γ·β = {:.8}",
            data.magnification_product()
        );
    }
    Ok((marginal, chief, data))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::EngineConfig,
        degree, micrometer, millimeter,
        paraxial::seidel,
        refractive_index::{RefrIndexConst, RefractiveIndex},
        surface::{Material, Profile, Surface},
        system::OpticalSystem,
    };
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    /// Thin lens of focal length `f` made of two surfaces of a glass with n = 1.5.
    fn thin_lens(f: f64, spacing: f64) -> Vec<Surface> {
        let glass = Material::Model(RefrIndexConst::new(1.5).unwrap().to_enum());
        vec![
            Surface::lens(Profile::sphere(millimeter!(f)).unwrap(), millimeter!(0.0), glass).unwrap(),
            Surface::lens(Profile::sphere(millimeter!(-f)).unwrap(), millimeter!(spacing), Material::Air)
                .unwrap(),
        ]
    }
    fn telescope(f1: f64, f2: f64) -> OpticalSystem {
        let mut surfaces = vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            Surface::stop(millimeter!(5.0), millimeter!(0.0)).unwrap(),
        ];
        surfaces.extend(thin_lens(f1, f1 + f2));
        surfaces.extend(thin_lens(f2, 20.0));
        surfaces.push(Surface::image());
        OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()).unwrap()
    }

    #[test]
    fn galilean() {
        let system = telescope(100.0, -50.0);
        let paraxial = ParaxialSystem::new(&system, micrometer!(0.5876)).unwrap();
        assert!(paraxial.is_afocal().unwrap());
        let (marginal, chief, data) =
            afocal_rays(&paraxial, &Field::angle(degree!(0.0), degree!(1.0))).unwrap();
        assert_relative_eq!(data.angular_magnification, 2.0, max_relative = 1e-9);
        assert_relative_eq!(data.lateral_magnification, 0.5, max_relative = 1e-9);
        assert_abs_diff_eq!(data.magnification_product(), 1.0, epsilon = 1e-6);
        assert!(data.chief_angle < 0.0);
        assert!(data.stop_miss_mm < 1e-9);
        assert_abs_diff_eq!(chief.at(1).unwrap().y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(marginal.at(1).unwrap().y, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(marginal.final_alpha(), 0.0, epsilon = 1e-12);
    }
    #[test]
    fn stop_between_the_lenses() {
        let mut surfaces = vec![Surface::object(millimeter!(f64::INFINITY)).unwrap()];
        surfaces.extend(thin_lens(100.0, 30.0));
        surfaces.push(Surface::stop(millimeter!(5.0), millimeter!(20.0)).unwrap());
        surfaces.extend(thin_lens(-50.0, 20.0));
        surfaces.push(Surface::image());
        let system = OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()).unwrap();
        let paraxial = ParaxialSystem::new(&system, micrometer!(0.5876)).unwrap();
        assert!(paraxial.is_afocal().unwrap());
        let (_, chief, data) =
            afocal_rays(&paraxial, &Field::angle(degree!(0.0), degree!(1.0))).unwrap();
        assert!(data.iterations <= MAX_REFINEMENT_STEPS);
        assert!(data.stop_miss_mm < 1e-9);
        assert!(data.chief_angle < 0.0);
        assert_abs_diff_eq!(chief.at(3).unwrap().y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(data.angular_magnification, 2.0, max_relative = 1e-9);
        assert_abs_diff_eq!(data.magnification_product(), 1.0, epsilon = 1e-6);
    }
    #[test]
    fn keplerian() {
        let system = telescope(100.0, 50.0);
        let paraxial = ParaxialSystem::new(&system, micrometer!(0.5876)).unwrap();
        let (_, _, data) =
            afocal_rays(&paraxial, &Field::angle(degree!(0.0), degree!(0.5))).unwrap();
        assert_relative_eq!(data.angular_magnification, -2.0, max_relative = 1e-9);
        assert_abs_diff_eq!(data.magnification_product(), 1.0, epsilon = 1e-6);
    }
    #[test]
    fn afocal_seidel() {
        let system = telescope(100.0, -50.0);
        let report = seidel(&system, &Field::angle(degree!(0.0), degree!(1.0)), micrometer!(0.5876))
            .unwrap();
        assert!(report.is_afocal());
        assert!(report.sums.is_finite());
        assert!(report.reference_focal_length_mm.is_infinite());
        assert_eq!(report.normalized_sums(), report.sums);
        assert_relative_eq!(
            report.afocal.unwrap().angular_magnification,
            2.0,
            max_relative = 1e-9
        );
    }
    #[test]
    fn stop_behind_first_group() {
        // stop between the two groups: the chief ray needs a non-zero height at surface 1
        let mut surfaces = vec![Surface::object(millimeter!(f64::INFINITY)).unwrap()];
        surfaces.extend(thin_lens(100.0, 30.0));
        surfaces.push(Surface::stop(millimeter!(3.0), millimeter!(20.0)).unwrap());
        surfaces.extend(thin_lens(-50.0, 20.0));
        surfaces.push(Surface::image());
        let system =
            OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()).unwrap();
        let paraxial = ParaxialSystem::new(&system, micrometer!(0.5876)).unwrap();
        let (_, chief, data) =
            afocal_rays(&paraxial, &Field::angle(degree!(0.0), degree!(1.0))).unwrap();
        assert_abs_diff_eq!(chief.at(3).unwrap().y, 0.0, epsilon = 1e-9);
        assert!(chief.at(1).unwrap().y.abs() > 1e-3);
        assert_relative_eq!(data.angular_magnification, 2.0, max_relative = 1e-9);
    }
}
