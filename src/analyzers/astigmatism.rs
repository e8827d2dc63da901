//! Best focus of meridional and sagittal fans.
//!
//! Both fans of a field are traced to the evaluation surface and projected onto trial focus planes parallel to it.
//! The plane minimizing the RMS spread of a fan around the projected chief ray is its focus. Foci are reported
//! relative to the paraxial image of the primary wavelength, so their difference is the astigmatic focal difference.
use kahan::KahanSummator;
use nalgebra::{Point3, Vector3};
use uom::si::{f64::Length, length::micrometer};

use super::{
    note_numerical_failures, run_tasks, AnalysisOptions, Analyzer, AnalyzerType, QueryControl,
    QueryOutput, WarnOnce,
};
use crate::{
    aiming::PupilAimer,
    distributions::{FanType, PupilSampler},
    error::{TraceError, TraceResult},
    paraxial::ParaxialSystem,
    solvers::{scan_then_golden, GOLDEN_TOLERANCE, SCAN_SAMPLES},
    system::{Field, OpticalSystem},
    utils::usize_to_f64,
};

/// Half width of the focus scan around the paraxial image (mm).
pub const FOCUS_SCAN_HALF_WIDTH: f64 = 10.0;
/// Rays with a smaller axial direction component are treated as parallel to the evaluation plane.
const PARALLEL_LIMIT: f64 = 1e-12;

/// Best focus of one field and wavelength.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AstigmatismRecord {
    /// index into the field table
    pub field_index: usize,
    /// index into the source table
    pub wavelength_index: usize,
    /// wavelength (µm)
    pub wavelength_um: f64,
    /// paraxial image position of the primary wavelength along the local z axis of the evaluation surface (mm)
    pub reference_focus_mm: f64,
    /// meridional focus relative to the reference (mm)
    pub meridional_deviation: f64,
    /// sagittal focus relative to the reference (mm)
    pub sagittal_deviation: f64,
    /// RMS spread of the meridional fan at its focus (µm)
    pub meridional_rms_um: f64,
    /// RMS spread of the sagittal fan at its focus (µm)
    pub sagittal_rms_um: f64,
}
impl AstigmatismRecord {
    /// Astigmatic focal difference `M − S` (mm).
    #[must_use]
    pub fn astigmatic_difference(&self) -> f64 {
        self.meridional_deviation - self.sagittal_deviation
    }
}

/// Position and direction of a ray in the local frame of the evaluation surface.
#[derive(Debug, Clone, Copy)]
struct LocalRay {
    position: Point3<f64>,
    direction: Vector3<f64>,
}
impl LocalRay {
    fn coordinate_at(&self, z: f64, axis: usize) -> f64 {
        let t = (z - self.position.z) / self.direction.z;
        t.mul_add(self.direction[axis], self.position[axis])
    }
}

/// RMS deviation of the fan rays from the chief ray along `axis` on the plane `z`.
fn fan_rms(rays: &[LocalRay], chief: &LocalRay, axis: usize, z: f64) -> f64 {
    let reference = chief.coordinate_at(z, axis);
    let squares: Vec<f64> = rays
        .iter()
        .map(|r| (r.coordinate_at(z, axis) - reference).powi(2))
        .collect();
    let sum: f64 = squares.iter().kahan_sum().sum();
    (sum / usize_to_f64(rays.len())).sqrt()
}

/// Analyzer for the meridional and sagittal best focus.
#[derive(Debug, Clone)]
pub struct AstigmatismAnalyzer<'a> {
    system: &'a OpticalSystem,
    options: AnalysisOptions,
}
impl<'a> AstigmatismAnalyzer<'a> {
    /// Creates a new [`AstigmatismAnalyzer`].
    ///
    /// # Errors
    ///
    /// This function returns an error if the options are not valid for the system.
    pub fn new(system: &'a OpticalSystem, options: AnalysisOptions) -> TraceResult<Self> {
        options.validate(system)?;
        Ok(Self { system, options })
    }
    /// Paraxial image position of the primary wavelength relative to the evaluation surface.
    fn reference_focus(&self) -> TraceResult<f64> {
        let paraxial = ParaxialSystem::new(self.system, self.system.primary_wavelength())?;
        if paraxial.is_afocal()? {
            return Err(TraceError::DegenerateGeometry(
                "an afocal system has no best focus".into(),
            ));
        }
        let cardinal = paraxial.cardinal_data()?;
        let target = self.options.target_surface(self.system);
        // offset relative to the image surface, shifted to an intermediate evaluation surface
        let offset = cardinal.image_offset_mm
            + paraxial.distance_to_image(target.min(self.system.image_index()));
        if offset.is_finite() {
            Ok(offset)
        } else {
            Err(TraceError::NumericalFailure(
                "paraxial image position is not finite".into(),
            ))
        }
    }
    /// Determines the best focus of a single field.
    ///
    /// # Errors
    ///
    /// This function returns
    ///  - [`TraceError::DegenerateGeometry`] for afocal systems or if fewer than two rays of a fan are usable.
    ///  - [`TraceError::Vignetted`] if the chief ray does not reach the evaluation surface.
    pub fn best_focus(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
    ) -> TraceResult<AstigmatismRecord> {
        let reference = self.reference_focus()?;
        self.best_focus_around(
            field_index,
            field,
            wavelength_index,
            wavelength,
            reference,
            &WarnOnce::default(),
        )
    }
    fn best_focus_around(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
        reference: f64,
        guard: &WarnOnce,
    ) -> TraceResult<AstigmatismRecord> {
        let target = self.options.target_surface(self.system);
        let aimer = PupilAimer::new(self.system, field, wavelength)?;
        let chief = aimer
            .chief_ray()?
            .ray()
            .map(|ray| aimer.trace_to(ray, target))
            .ok_or_else(|| TraceError::UnreachableStop("chief ray has no launch ray".into()))?;
        let chief = chief
            .hit(target)
            .filter(|_| chief.is_complete())
            .map(|hit| LocalRay {
                position: hit.local,
                direction: hit.local_direction,
            })
            .ok_or_else(|| {
                TraceError::Vignetted(format!(
                    "chief ray of field {field_index} does not reach surface {target}"
                ))
            })?;
        if chief.direction.z.abs() < PARALLEL_LIMIT {
            return Err(TraceError::DegenerateGeometry(
                "chief ray runs parallel to the evaluation plane".into(),
            ));
        }
        let sampler = PupilSampler::new(&aimer, target);
        let focus = |fan_type: FanType| -> TraceResult<(f64, f64)> {
            let rays = sampler.fan(fan_type, self.options.ray_count);
            note_numerical_failures(&rays, guard);
            let usable: Vec<LocalRay> = rays
                .iter()
                .filter_map(|r| r.hit(target))
                .filter(|hit| hit.local_direction.z.abs() >= PARALLEL_LIMIT)
                .map(|hit| LocalRay {
                    position: hit.local,
                    direction: hit.local_direction,
                })
                .collect();
            if usable.len() < 2 {
                return Err(TraceError::DegenerateGeometry(format!(
                    "{fan_type} fan of field {field_index} has fewer than two usable rays"
                )));
            }
            let axis = match fan_type {
                FanType::Meridional => 1,
                FanType::Sagittal => 0,
            };
            scan_then_golden(
                |z| fan_rms(&usable, &chief, axis, z),
                reference,
                FOCUS_SCAN_HALF_WIDTH,
                SCAN_SAMPLES,
                GOLDEN_TOLERANCE,
            )
            .ok_or_else(|| {
                TraceError::NumericalFailure(format!(
                    "{fan_type} spot size of field {field_index} is not finite"
                ))
            })
        };
        let (meridional_z, meridional_rms) = focus(FanType::Meridional)?;
        let (sagittal_z, sagittal_rms) = focus(FanType::Sagittal)?;
        Ok(AstigmatismRecord {
            field_index,
            wavelength_index,
            wavelength_um: wavelength.get::<micrometer>(),
            reference_focus_mm: reference,
            meridional_deviation: meridional_z - reference,
            sagittal_deviation: sagittal_z - reference,
            meridional_rms_um: meridional_rms * 1.0e3,
            sagittal_rms_um: sagittal_rms * 1.0e3,
        })
    }
}
impl Analyzer for AstigmatismAnalyzer<'_> {
    type Output = AstigmatismRecord;
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::Astigmatism
    }
    fn analyze(
        &self,
        control: &mut QueryControl<'_>,
    ) -> TraceResult<QueryOutput<AstigmatismRecord>> {
        self.options.validate(self.system)?;
        let reference = self.reference_focus();
        let guard = WarnOnce::default();
        Ok(run_tasks(
            self.analyzer_type(),
            self.system,
            &self.options,
            control,
            |f, field, w, wavelength| {
                let reference = reference.clone()?;
                self.best_focus_around(f, field, w, wavelength, reference, &guard)
            },
        ))
    }
}
