#![warn(missing_docs)]
//! Pupil aiming.
//!
//! The [`PupilAimer`] finds the ray from an object point that passes through a given point on the aperture stop.
//! For a finite object the object point is fixed and the direction slopes are solved. For an object at infinity the
//! direction is fixed by the field angles and the launch position is solved instead.
//!
//! Every aiming request runs through the states `Seeded → Refining → Converged | Fallback | Failed`. If the Newton
//! iteration does not converge, the ray is constructed by a geometric back projection through the target point and
//! marked as [`AimState::Fallback`].
use std::fmt::Display;

use log::debug;
use nalgebra::{Point3, Vector2, Vector3};
use uom::si::{angle::radian, f64::Length, length::millimeter};

use crate::{
    error::{TraceError, TraceResult},
    ray::Ray,
    solvers::{damped_newton_2d, Newton2dConfig},
    system::{Field, FieldSpec, OpticalSystem},
    tracer::{SequentialTracer, TraceOptions, TracedRay},
};

/// Location of the object point of a field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObjectPoint {
    /// point at finite distance (global coordinates, mm)
    Finite {
        /// object point
        point: Point3<f64>,
    },
    /// point at infinity, given by the (normalized) direction of the incoming collimated beam
    Afocal {
        /// beam direction
        direction: Vector3<f64>,
    },
}
impl ObjectPoint {
    /// Determines the object point of a field.
    ///
    /// Angle fields on a finite object are converted to heights using the axial distance between object and stop,
    /// such that a chief ray through the stop center has the given angle.
    ///
    /// # Errors
    ///
    /// This function returns an error if a height field is used with an object at infinity.
    pub fn from_field(system: &OpticalSystem, field: &Field) -> TraceResult<Self> {
        let object_frame = system
            .frames()
            .frame(0)
            .ok_or_else(|| TraceError::InvalidSystem("system has no object surface".into()))?;
        match (*field.spec(), system.object_at_infinity()) {
            (FieldSpec::Angle { x, y }, true) => {
                let local = Vector3::new(x.get::<radian>().tan(), y.get::<radian>().tan(), 1.0);
                Ok(Self::Afocal {
                    direction: object_frame.transform_vector_f64(&local.normalize()),
                })
            }
            (FieldSpec::Angle { x, y }, false) => {
                let distance = system.object_to_stop_distance_mm();
                let local = Point3::new(
                    -distance * x.get::<radian>().tan(),
                    -distance * y.get::<radian>().tan(),
                    0.0,
                );
                Ok(Self::Finite {
                    point: object_frame.transform_point_f64(&local),
                })
            }
            (FieldSpec::Height { .. } | FieldSpec::Rectangle { .. }, true) => {
                Err(TraceError::InvalidSystem(
                    "height fields need an object at finite distance".into(),
                ))
            }
            (FieldSpec::Height { x, y } | FieldSpec::Rectangle { x, y }, false) => {
                let local = Point3::new(x.get::<millimeter>(), y.get::<millimeter>(), 0.0);
                Ok(Self::Finite {
                    point: object_frame.transform_point_f64(&local),
                })
            }
        }
    }
    /// Returns true for an object at infinity.
    #[must_use]
    pub const fn is_afocal(&self) -> bool {
        matches!(self, Self::Afocal { .. })
    }
}

/// State of an aiming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AimState {
    /// initial guess computed
    Seeded,
    /// Newton iteration in progress
    Refining {
        /// current iteration
        iteration: usize,
    },
    /// the ray passes the target within the accept tolerance
    Converged,
    /// the Newton iteration failed, the ray was constructed geometrically
    Fallback,
    /// neither the iteration nor the geometric construction reached the stop
    Failed,
}
impl Display for AimState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Seeded => write!(f, "seeded"),
            Self::Refining { iteration } => write!(f, "refining ({iteration})"),
            Self::Converged => write!(f, "converged"),
            Self::Fallback => write!(f, "geometric fallback"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of an aiming request.
#[derive(Debug, Clone, PartialEq)]
pub struct AimResult {
    state: AimState,
    ray: Option<Ray>,
    miss_mm: f64,
    iterations: usize,
}
impl AimResult {
    /// Final state of the request.
    #[must_use]
    pub const fn state(&self) -> AimState {
        self.state
    }
    /// The launch ray (global coordinates, before the first surface). `None` if the request failed.
    #[must_use]
    pub const fn ray(&self) -> Option<&Ray> {
        self.ray.as_ref()
    }
    /// Distance between the traced ray and the target on the stop (mm). `NaN` if the stop was not reached.
    #[must_use]
    pub const fn miss_mm(&self) -> f64 {
        self.miss_mm
    }
    /// Number of Newton iterations.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }
    /// Returns true if the ray was constructed by the geometric fallback.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.state == AimState::Fallback
    }
    /// Returns true if a launch ray is available.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.state, AimState::Converged | AimState::Fallback)
    }
}

/// Aims rays from one object point through points of the aperture stop.
#[derive(Debug, Clone)]
pub struct PupilAimer<'a> {
    tracer: SequentialTracer<'a>,
    object: ObjectPoint,
    stop_index: usize,
    newton: Newton2dConfig,
    launch_distance: f64,
}
impl<'a> PupilAimer<'a> {
    /// Creates a new [`PupilAimer`] for a field at the given wavelength.
    ///
    /// # Errors
    ///
    /// This function returns an error if the object point of the field cannot be determined or the refractive
    /// indices cannot be evaluated.
    pub fn new(system: &'a OpticalSystem, field: &Field, wavelength: Length) -> TraceResult<Self> {
        Self::with_object(system, ObjectPoint::from_field(system, field)?, wavelength)
    }
    /// Creates a new [`PupilAimer`] for an explicit object point.
    ///
    /// # Errors
    ///
    /// This function returns an error if the refractive indices cannot be evaluated.
    pub fn with_object(
        system: &'a OpticalSystem,
        object: ObjectPoint,
        wavelength: Length,
    ) -> TraceResult<Self> {
        let aimer = system.config().aimer;
        let newton = Newton2dConfig {
            jacobian_step: aimer.jacobian_step,
            accept_tolerance: aimer.accept_tolerance,
            fine_tolerance: aimer.fine_tolerance,
            max_iterations: aimer.max_iterations,
            max_step: if object.is_afocal() {
                aimer.max_origin_step
            } else {
                aimer.max_slope_step
            },
            fallback_gain: 1.0,
        };
        Ok(Self {
            tracer: SequentialTracer::new(system, wavelength)?,
            object,
            stop_index: system.stop_index(),
            newton,
            launch_distance: aimer.afocal_launch_distance,
        })
    }
    /// The object point.
    #[must_use]
    pub const fn object(&self) -> &ObjectPoint {
        &self.object
    }
    /// The underlying tracer.
    #[must_use]
    pub const fn tracer(&self) -> &SequentialTracer<'a> {
        &self.tracer
    }
    /// Clear aperture radius of the stop (mm).
    #[must_use]
    pub fn stop_radius_mm(&self) -> f64 {
        self.tracer.system().stop_semi_diameter_mm()
    }
    /// Creates the launch ray for the unknowns of the solver.
    ///
    /// For a finite object the unknowns are the direction slopes `(dx/dz, dy/dz)` in the object frame. For an object
    /// at infinity they are the `(x, y)` coordinates on the launch plane located in front of the first surface.
    ///
    /// # Errors
    ///
    /// This function returns an error if the ray cannot be constructed.
    pub fn launch_ray(&self, unknowns: &Vector2<f64>) -> TraceResult<Ray> {
        let system = self.tracer.system();
        let n0 = self.tracer.index_before(1);
        match self.object {
            ObjectPoint::Finite { point } => {
                let frame = system.frames().frame(0).copied().unwrap_or_default();
                let dir = frame.transform_vector_f64(&Vector3::new(unknowns[0], unknowns[1], 1.0));
                let mut ray = Ray::new(point, dir, self.tracer.wavelength())?;
                ray.set_refractive_index(n0)?;
                Ok(ray)
            }
            ObjectPoint::Afocal { direction } => {
                let frame = system.frames().frame(1).copied().unwrap_or_default();
                let center = frame.transform_point_f64(&Point3::new(0.0, 0.0, -self.launch_distance));
                let position = frame.transform_point_f64(&Point3::new(
                    unknowns[0],
                    unknowns[1],
                    -self.launch_distance,
                ));
                let mut ray = Ray::new(position, direction, self.tracer.wavelength())?;
                ray.set_refractive_index(n0)?;
                // all rays start on the plane wavefront through the launch plane center
                ray.set_path_length_mm(n0 * direction.dot(&(position - center)));
                Ok(ray)
            }
        }
    }
    /// Target point on the stop in global coordinates.
    fn target_global(&self, target: &Vector2<f64>) -> Point3<f64> {
        let system = self.tracer.system();
        let stop = &system.surfaces()[self.stop_index];
        let z = stop
            .profile()
            .sag(target[0].hypot(target[1]))
            .unwrap_or(0.0);
        system
            .frames()
            .frame(self.stop_index)
            .copied()
            .unwrap_or_default()
            .transform_point_f64(&Point3::new(target[0], target[1], z))
    }
    /// Geometric guess: straight line from the object through the target.
    fn geometric_seed(&self, target: &Vector2<f64>) -> Option<Vector2<f64>> {
        let system = self.tracer.system();
        let t = self.target_global(target);
        match self.object {
            ObjectPoint::Finite { point } => {
                let frame = system.frames().frame(0).copied().unwrap_or_default();
                let local = frame.inverse_transform_vector_f64(&(t - point));
                if local.z.abs() < f64::EPSILON {
                    return None;
                }
                Some(Vector2::new(local.x / local.z, local.y / local.z))
            }
            ObjectPoint::Afocal { direction } => {
                let frame = system.frames().frame(1).copied().unwrap_or_default();
                let t_local = frame.inverse_transform_point_f64(&t);
                let d_local = frame.inverse_transform_vector_f64(&direction);
                if d_local.z.abs() < f64::EPSILON {
                    return None;
                }
                let s = (-self.launch_distance - t_local.z) / d_local.z;
                let p = t_local + d_local * s;
                Some(Vector2::new(p.x, p.y))
            }
        }
    }
    /// Traces a launch ray up to the stop without aperture clipping.
    fn trace_to_stop(&self, ray: Ray) -> TracedRay {
        self.tracer
            .trace(ray, 1, self.stop_index, TraceOptions::unclipped())
    }
    /// Miss vector at the stop for the given unknowns.
    fn residual(&self, unknowns: &Vector2<f64>, target: &Vector2<f64>) -> Option<Vector2<f64>> {
        let ray = self.launch_ray(unknowns).ok()?;
        let traced = self.trace_to_stop(ray);
        if !traced.is_complete() {
            return None;
        }
        let hit = traced.hit(self.stop_index)?;
        Some(Vector2::new(hit.local.x - target[0], hit.local.y - target[1]))
    }
    /// Aims a ray through the point `(x, y)` (mm) of the stop's local frame.
    #[must_use]
    pub fn aim(&self, x: f64, y: f64) -> AimResult {
        let target = Vector2::new(x, y);
        let Some(seed) = self.geometric_seed(&target) else {
            return failed(0);
        };
        let mut state = AimState::Seeded;
        debug!("aiming at ({x:.4}, {y:.4}) mm: {state}");
        let mut config = self.newton;
        if let ObjectPoint::Finite { point } = self.object {
            let distance = (self.target_global(&target) - point).norm();
            if distance > 0.0 {
                config.fallback_gain = 1.0 / distance;
            }
        }
        let outcome = damped_newton_2d(|u| self.residual(u, &target), seed, &config);
        state = AimState::Refining {
            iteration: outcome.iterations,
        };
        if outcome.converged {
            if let Ok(ray) = self.launch_ray(&outcome.solution) {
                return AimResult {
                    state: AimState::Converged,
                    ray: Some(ray),
                    miss_mm: outcome.residual_norm(),
                    iterations: outcome.iterations,
                };
            }
        }
        debug!("aiming at ({x:.4}, {y:.4}) mm: {state} did not converge, using geometric fallback");
        match self.launch_ray(&seed) {
            Ok(ray) => {
                let traced = self.trace_to_stop(ray.clone());
                let Some(hit) = traced.hit(self.stop_index).filter(|_| traced.is_complete()) else {
                    return failed(outcome.iterations);
                };
                AimResult {
                    state: AimState::Fallback,
                    ray: Some(ray),
                    miss_mm: (hit.local.x - x).hypot(hit.local.y - y),
                    iterations: outcome.iterations,
                }
            }
            Err(_) => failed(outcome.iterations),
        }
    }
    /// Aims at the normalized pupil coordinate `(u, v)`, i.e. at `(u·r_stop, v·r_stop)` on the stop.
    #[must_use]
    pub fn aim_normalized(&self, u: f64, v: f64) -> AimResult {
        let r = self.stop_radius_mm();
        self.aim(u * r, v * r)
    }
    /// Aims the chief ray through the stop center.
    ///
    /// # Errors
    ///
    /// This function returns [`TraceError::UnreachableStop`] if neither the iteration nor the geometric construction
    /// reaches the stop.
    pub fn chief_ray(&self) -> TraceResult<AimResult> {
        let result = self.aim(0.0, 0.0);
        if result.is_success() {
            Ok(result)
        } else {
            Err(TraceError::UnreachableStop(
                "chief ray cannot be aimed through the stop center".into(),
            ))
        }
    }
    /// Traces an aimed launch ray to the image surface with aperture checks.
    #[must_use]
    pub fn trace_to_image(&self, ray: &Ray) -> TracedRay {
        self.tracer.trace_to_image(ray.clone(), TraceOptions::default())
    }
    /// Traces an aimed launch ray to the given surface with aperture checks.
    #[must_use]
    pub fn trace_to(&self, ray: &Ray, target: usize) -> TracedRay {
        self.tracer.trace(ray.clone(), 1, target, TraceOptions::default())
    }
}

const fn failed(iterations: usize) -> AimResult {
    AimResult {
        state: AimState::Failed,
        ray: None,
        miss_mm: f64::NAN,
        iterations,
    }
}
