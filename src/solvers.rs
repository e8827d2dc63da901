#![warn(missing_docs)]
//! Numerical root finders and minimizers.
//!
//! - [`brent`]: classical Brent root finding on a sign-changing bracket
//! - [`damped_newton_2d`]: Newton iteration on a two-dimensional residual with finite difference Jacobian
//! - [`golden_section`] and [`scan_then_golden`]: one-dimensional minimization
use log::debug;
use nalgebra::{Matrix2, Vector2};
use roots::{find_root_brent, SimpleConvergency};

use crate::error::{TraceError, TraceResult};

/// Iteration cap of [`brent`].
pub const BRENT_MAX_ITERATIONS: usize = 60;
/// Default tolerance (mm) of the golden section search.
pub const GOLDEN_TOLERANCE: f64 = 1e-3;
/// Default iteration cap of the golden section search.
pub const GOLDEN_MAX_ITERATIONS: usize = 30;
/// Number of samples of the coarse scan preceding the golden section search.
pub const SCAN_SAMPLES: usize = 41;

const INV_PHI: f64 = 0.618_033_988_749_894_9;

/// Finds a root of `f` within the bracket `[a, b]`.
///
/// # Errors
///
/// This function returns an error if `f(a)` and `f(b)` have the same sign or the iteration does not converge
/// within [`BRENT_MAX_ITERATIONS`].
pub fn brent<F: FnMut(f64) -> f64>(f: F, a: f64, b: f64, tolerance: f64) -> TraceResult<f64> {
    let mut convergency = SimpleConvergency {
        eps: tolerance,
        max_iter: BRENT_MAX_ITERATIONS,
    };
    find_root_brent(a, b, f, &mut convergency)
        .map_err(|e| TraceError::NumericalFailure(format!("brent root search failed: {e}")))
}

/// Settings of [`damped_newton_2d`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Newton2dConfig {
    /// one-sided finite difference step
    pub jacobian_step: f64,
    /// residual norm below which the solution is accepted
    pub accept_tolerance: f64,
    /// residual norm at which the iteration terminates early
    pub fine_tolerance: f64,
    /// iteration cap
    pub max_iterations: usize,
    /// maximum norm of a single step
    pub max_step: f64,
    /// gain of the proportional step `Δ = −gain·r` used if the Jacobian is singular
    pub fallback_gain: f64,
}

/// Result of [`damped_newton_2d`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Newton2dOutcome {
    /// last accepted unknown
    pub solution: Vector2<f64>,
    /// residual at [`Newton2dOutcome::solution`]. `NaN` if the start value could not be evaluated.
    pub residual: Vector2<f64>,
    /// number of performed iterations
    pub iterations: usize,
    /// number of iterations that used the proportional fallback step
    pub singular_steps: usize,
    /// true if the residual norm is below the accept tolerance
    pub converged: bool,
}
impl Newton2dOutcome {
    /// Norm of the final residual.
    #[must_use]
    pub fn residual_norm(&self) -> f64 {
        self.residual.norm()
    }
}

/// Solves `f(x) = 0` for a two-dimensional unknown by a damped Newton iteration.
///
/// The residual function returns `None` where it cannot be evaluated (e.g. a ray missing a surface). Such points are
/// treated like an increase of the residual and trigger step halving. The Jacobian is estimated by one-sided finite
/// differences. If it is singular, a proportional step `−gain·r` is taken instead. Every step is clamped to
/// `max_step` and halved up to eight times until the residual decreases.
pub fn damped_newton_2d<F>(mut f: F, x0: Vector2<f64>, config: &Newton2dConfig) -> Newton2dOutcome
where
    F: FnMut(&Vector2<f64>) -> Option<Vector2<f64>>,
{
    let mut x = x0;
    let Some(mut r) = f(&x).filter(|r| r.iter().all(|c| c.is_finite())) else {
        return Newton2dOutcome {
            solution: x0,
            residual: Vector2::repeat(f64::NAN),
            iterations: 0,
            singular_steps: 0,
            converged: false,
        };
    };
    let mut iterations = 0;
    let mut singular_steps = 0;
    while iterations < config.max_iterations && r.norm() >= config.fine_tolerance {
        iterations += 1;
        let step = match jacobian(&mut f, &x, &r, config.jacobian_step)
            .and_then(|j| j.try_inverse())
            .map(|j_inv| -(j_inv * r))
            .filter(|s| s.iter().all(|c| c.is_finite()))
        {
            Some(step) => step,
            None => {
                singular_steps += 1;
                -r * config.fallback_gain
            }
        };
        let norm = step.norm();
        let mut step = if norm > config.max_step {
            step * (config.max_step / norm)
        } else {
            step
        };
        let mut accepted = None;
        for _ in 0..8 {
            let candidate = x + step;
            if let Some(r_new) = f(&candidate).filter(|r| r.iter().all(|c| c.is_finite())) {
                if r_new.norm() < r.norm() {
                    accepted = Some((candidate, r_new));
                    break;
                }
            }
            step *= 0.5;
        }
        let Some((x_new, r_new)) = accepted else {
            debug!("newton iteration stalled after {iterations} iterations at |r| = {:e}", r.norm());
            break;
        };
        x = x_new;
        r = r_new;
    }
    Newton2dOutcome {
        solution: x,
        residual: r,
        iterations,
        singular_steps,
        converged: r.norm() < config.accept_tolerance,
    }
}

fn jacobian<F>(f: &mut F, x: &Vector2<f64>, r: &Vector2<f64>, h: f64) -> Option<Matrix2<f64>>
where
    F: FnMut(&Vector2<f64>) -> Option<Vector2<f64>>,
{
    let mut j = Matrix2::zeros();
    for col in 0..2 {
        let mut dx = Vector2::zeros();
        dx[col] = h;
        let column = match f(&(x + dx)) {
            Some(r_plus) => (r_plus - r) / h,
            None => (r - f(&(x - dx))?) / h,
        };
        j.set_column(col, &column);
    }
    let det = j.determinant();
    let scale = j.norm_squared();
    if !det.is_finite() || scale == 0.0 || det.abs() <= 1e-12 * scale {
        return None;
    }
    Some(j)
}

/// Minimizes `f` on `[a, b]` by golden section search.
///
/// Returns the abscissa and the value of the minimum. Non-finite function values are treated as `+∞`.
pub fn golden_section<F: FnMut(f64) -> f64>(
    mut f: F,
    a: f64,
    b: f64,
    tolerance: f64,
    max_iterations: usize,
) -> (f64, f64) {
    let mut eval = |x: f64| {
        let v = f(x);
        if v.is_finite() {
            v
        } else {
            f64::INFINITY
        }
    };
    let (mut a, mut b) = if a <= b { (a, b) } else { (b, a) };
    let mut c = b - INV_PHI * (b - a);
    let mut d = a + INV_PHI * (b - a);
    let mut fc = eval(c);
    let mut fd = eval(d);
    for _ in 0..max_iterations {
        if (b - a).abs() <= tolerance {
            break;
        }
        if fc < fd {
            b = d;
            d = c;
            fd = fc;
            c = b - INV_PHI * (b - a);
            fc = eval(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + INV_PHI * (b - a);
            fd = eval(d);
        }
    }
    let x = 0.5 * (a + b);
    let fx = eval(x);
    [(x, fx), (c, fc), (d, fd)]
        .into_iter()
        .min_by(|l, r| l.1.total_cmp(&r.1))
        .unwrap_or((x, fx))
}

/// Locates the minimum of `f` within `[center − half_width, center + half_width]`.
///
/// A coarse scan with `samples` equidistant points selects the best sample, the interval between its neighbours is
/// refined by [`golden_section`]. Returns `None` if `f` is not finite at any sample.
pub fn scan_then_golden<F: FnMut(f64) -> f64>(
    mut f: F,
    center: f64,
    half_width: f64,
    samples: usize,
    tolerance: f64,
) -> Option<(f64, f64)> {
    let samples = samples.max(3);
    let step = 2.0 * half_width / crate::utils::usize_to_f64(samples - 1);
    let start = center - half_width;
    let (best, _) = (0..samples)
        .map(|i| (i, f(crate::utils::usize_to_f64(i).mul_add(step, start))))
        .filter(|(_, v)| v.is_finite())
        .min_by(|l, r| l.1.total_cmp(&r.1))?;
    let lo = crate::utils::usize_to_f64(best.saturating_sub(1)).mul_add(step, start);
    let hi = crate::utils::usize_to_f64((best + 1).min(samples - 1)).mul_add(step, start);
    Some(golden_section(f, lo, hi, tolerance, GOLDEN_MAX_ITERATIONS))
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn config() -> Newton2dConfig {
        Newton2dConfig {
            jacobian_step: 1e-4,
            accept_tolerance: 1e-3,
            fine_tolerance: 1e-9,
            max_iterations: 18,
            max_step: 0.5,
            fallback_gain: 1.0,
        }
    }

    #[test]
    fn brent_root() {
        let root = brent(|x| x * x - 2.0, 0.0, 2.0, 1e-12).unwrap();
        assert_abs_diff_eq!(root, 2.0_f64.sqrt(), epsilon = 1e-9);
        assert!(brent(|x| x * x + 1.0, -1.0, 1.0, 1e-12).is_err());
    }
    #[test]
    fn newton_linear() {
        let outcome = damped_newton_2d(
            |x| Some(Vector2::new(2.0 * x[0] + x[1] - 1.0, x[1] - 0.2)),
            Vector2::zeros(),
            &config(),
        );
        assert!(outcome.converged);
        assert_eq!(outcome.singular_steps, 0);
        assert_abs_diff_eq!(outcome.solution, Vector2::new(0.4, 0.2), epsilon = 1e-8);
        assert!(outcome.residual_norm() < 1e-9);
    }
    #[test]
    fn newton_nonlinear_clamped() {
        // steps are clamped to 0.5, so reaching x = (3, −2) needs several iterations
        let outcome = damped_newton_2d(
            |x| Some(Vector2::new(x[0].powi(3) - 27.0, x[1] + 2.0)),
            Vector2::new(1.0, 0.0),
            &config(),
        );
        assert!(outcome.converged);
        assert!(outcome.iterations > 4);
        assert_abs_diff_eq!(outcome.solution, Vector2::new(3.0, -2.0), epsilon = 1e-6);
    }
    #[test]
    fn newton_singular_fallback() {
        let outcome = damped_newton_2d(
            |x| Some(Vector2::new(x[0] + x[1], x[0] + x[1])),
            Vector2::new(0.2, 0.1),
            &Newton2dConfig {
                fallback_gain: 0.5,
                ..config()
            },
        );
        assert!(outcome.singular_steps > 0);
        assert!(outcome.converged);
    }
    #[test]
    fn newton_not_evaluable() {
        let outcome = damped_newton_2d(|_| None, Vector2::new(1.0, 1.0), &config());
        assert!(!outcome.converged);
        assert!(outcome.residual_norm().is_nan());
        assert_eq!(outcome.iterations, 0);
    }
    #[test]
    fn newton_backward_difference() {
        // residual undefined for x0 > 1.5, the forward difference at the start value fails
        let outcome = damped_newton_2d(
            |x| (x[0] <= 1.5).then(|| Vector2::new(x[0] - 1.2, x[1])),
            Vector2::new(1.5, 0.1),
            &Newton2dConfig {
                max_step: 5.0,
                ..config()
            },
        );
        assert!(outcome.converged);
        assert_abs_diff_eq!(outcome.solution[0], 1.2, epsilon = 1e-8);
    }
    #[test]
    fn golden_parabola() {
        let z0 = 0.3721;
        let (x, fx) = golden_section(|z| (z - z0).powi(2) + 0.5, -1.0, 1.0, GOLDEN_TOLERANCE, 30);
        assert!((x - z0).abs() <= 1.5 * GOLDEN_TOLERANCE);
        assert_abs_diff_eq!(fx, 0.5, epsilon = 1e-5);
    }
    #[test]
    fn golden_non_finite() {
        let (x, _) = golden_section(
            |z| if z < 0.0 { f64::NAN } else { (z - 0.5).powi(2) },
            -1.0,
            1.0,
            GOLDEN_TOLERANCE,
            30,
        );
        assert!((x - 0.5).abs() <= 1.5 * GOLDEN_TOLERANCE);
    }
    #[test]
    fn scan_parabola() {
        let z0 = 96.123;
        let (x, _) =
            scan_then_golden(|z| (z - z0).abs().sqrt(), 95.0, 10.0, SCAN_SAMPLES, GOLDEN_TOLERANCE)
                .unwrap();
        assert!((x - z0).abs() <= 1.5 * GOLDEN_TOLERANCE);
        assert!(scan_then_golden(|_| f64::NAN, 0.0, 1.0, SCAN_SAMPLES, GOLDEN_TOLERANCE).is_none());
    }
}
