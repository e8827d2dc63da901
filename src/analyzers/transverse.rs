//! Transverse ray aberration fans.
//!
//! For every field and wavelength a meridional and a sagittal fan are aimed through the stop and traced to the
//! evaluation surface. The aberration of a ray is its offset from the chief ray on that surface (local coordinates),
//! together with the angular deviation of its direction which is the meaningful measure for afocal systems.
use uom::si::{
    f64::Length,
    length::{micrometer, millimeter},
};

use super::{
    note_numerical_failures, run_tasks, AnalysisOptions, Analyzer, AnalyzerType, QueryControl,
    QueryOutput, WarnOnce,
};
use crate::{
    aiming::PupilAimer,
    distributions::{FanType, PupilSampler},
    error::{TraceError, TraceResult},
    system::{Field, OpticalSystem},
};

/// Aberration of a single fan ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseRecord {
    /// normalized pupil coordinate along the fan
    pub pupil_coordinate: f64,
    /// offset from the chief ray along the fan direction (µm). `NaN` for vignetted rays.
    pub transverse_aberration_um: f64,
    /// angular deviation from the chief ray direction along the fan direction (rad). `NaN` for vignetted rays.
    pub angular_aberration_rad: f64,
    /// intersection with the evaluation surface (local x / y, mm)
    pub image_xy_mm: [f64; 2],
    /// chief ray intersection with the evaluation surface (local x / y, mm)
    pub chief_xy_mm: [f64; 2],
    /// the ray was aimed without fallback and reached the evaluation surface
    pub is_full_success: bool,
}

/// A traced fan of one field and wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseFan {
    /// index into the field table
    pub field_index: usize,
    /// index into the source table
    pub wavelength_index: usize,
    /// wavelength (µm)
    pub wavelength_um: f64,
    /// orientation of the fan
    pub fan_type: FanType,
    /// bulk offset of the field. Consumers treat it as already applied, the records do not include it.
    pub zero_aberration_position_mm: Option<f64>,
    /// records in pupil order
    pub records: Vec<TransverseRecord>,
}
impl TransverseFan {
    /// Transverse aberrations (µm) of all records.
    #[must_use]
    pub fn aberrations_um(&self) -> Vec<f64> {
        self.records
            .iter()
            .map(|r| r.transverse_aberration_um)
            .collect()
    }
    /// Number of records that reached the evaluation surface.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.transverse_aberration_um.is_finite())
            .count()
    }
}

/// Meridional and sagittal fan of one field and wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseFans {
    /// fan along the local y axis of the stop
    pub meridional: TransverseFan,
    /// fan along the local x axis of the stop
    pub sagittal: TransverseFan,
}

/// Analyzer for transverse ray aberrations.
#[derive(Debug, Clone)]
pub struct TransverseAnalyzer<'a> {
    system: &'a OpticalSystem,
    options: AnalysisOptions,
}
impl<'a> TransverseAnalyzer<'a> {
    /// Creates a new [`TransverseAnalyzer`].
    ///
    /// # Errors
    ///
    /// This function returns an error if the options are not valid for the system.
    pub fn new(system: &'a OpticalSystem, options: AnalysisOptions) -> TraceResult<Self> {
        options.validate(system)?;
        Ok(Self { system, options })
    }
    /// Traces both fans of a single field.
    ///
    /// # Errors
    ///
    /// This function returns an error if the chief ray of the field cannot be aimed or does not reach the evaluation
    /// surface.
    pub fn fans(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
    ) -> TraceResult<TransverseFans> {
        self.fans_with_guard(field_index, field, wavelength_index, wavelength, &WarnOnce::default())
    }
    fn fans_with_guard(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
        guard: &WarnOnce,
    ) -> TraceResult<TransverseFans> {
        let target = self.options.target_surface(self.system);
        let aimer = PupilAimer::new(self.system, field, wavelength)?;
        let chief = aimer.chief_ray()?;
        let chief_trace = chief
            .ray()
            .map(|ray| aimer.trace_to(ray, target))
            .ok_or_else(|| TraceError::UnreachableStop("chief ray has no launch ray".into()))?;
        let chief_hit = chief_trace
            .hit(target)
            .filter(|_| chief_trace.is_complete())
            .copied()
            .ok_or_else(|| {
                TraceError::Vignetted(format!(
                    "chief ray of field {field_index} does not reach surface {target}"
                ))
            })?;
        let sampler = PupilSampler::new(&aimer, target);
        let fan = |fan_type: FanType| {
            let rays = sampler.fan(fan_type, self.options.ray_count);
            note_numerical_failures(&rays, guard);
            let records = rays
                .iter()
                .map(|ray| {
                    let pupil_coordinate = match fan_type {
                        FanType::Meridional => ray.sample.v,
                        FanType::Sagittal => ray.sample.u,
                    };
                    let axis = match fan_type {
                        FanType::Meridional => 1,
                        FanType::Sagittal => 0,
                    };
                    let chief_xy_mm = [chief_hit.local.x, chief_hit.local.y];
                    ray.hit(target).map_or(
                        TransverseRecord {
                            pupil_coordinate,
                            transverse_aberration_um: f64::NAN,
                            angular_aberration_rad: f64::NAN,
                            image_xy_mm: [f64::NAN, f64::NAN],
                            chief_xy_mm,
                            is_full_success: false,
                        },
                        |hit| {
                            let d = hit.local_direction;
                            let dc = chief_hit.local_direction;
                            TransverseRecord {
                                pupil_coordinate,
                                transverse_aberration_um: (hit.local[axis] - chief_hit.local[axis])
                                    * 1.0e3,
                                angular_aberration_rad: d[axis].atan2(d.z) - dc[axis].atan2(dc.z),
                                image_xy_mm: [hit.local.x, hit.local.y],
                                chief_xy_mm,
                                is_full_success: !ray.sample.is_partial,
                            }
                        },
                    )
                })
                .collect();
            TransverseFan {
                field_index,
                wavelength_index,
                wavelength_um: wavelength.get::<micrometer>(),
                fan_type,
                zero_aberration_position_mm: field
                    .zero_aberration_position()
                    .map(|p| p.get::<millimeter>()),
                records,
            }
        };
        Ok(TransverseFans {
            meridional: fan(FanType::Meridional),
            sagittal: fan(FanType::Sagittal),
        })
    }
}
impl Analyzer for TransverseAnalyzer<'_> {
    type Output = TransverseFans;
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::Transverse
    }
    fn analyze(&self, control: &mut QueryControl<'_>) -> TraceResult<QueryOutput<TransverseFans>> {
        self.options.validate(self.system)?;
        let guard = WarnOnce::default();
        Ok(run_tasks(
            self.analyzer_type(),
            self.system,
            &self.options,
            control,
            |f, field, w, wavelength| self.fans_with_guard(f, field, w, wavelength, &guard),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::EngineConfig,
        degree, micrometer, millimeter,
        refractive_index::{RefrIndexAbbe, RefrIndexConst, RefractiveIndex},
        surface::{Material, Profile, Surface},
    };
    use approx::assert_abs_diff_eq;

    fn singlet(fields: Vec<Field>) -> OpticalSystem {
        let glass = Material::Model(RefrIndexAbbe::new(1.5168, 64.17).unwrap().to_enum());
        let surfaces = vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            Surface::stop(millimeter!(5.0), millimeter!(0.0)).unwrap(),
            Surface::lens(Profile::sphere(millimeter!(50.0)).unwrap(), millimeter!(3.0), glass)
                .unwrap(),
            Surface::lens(Profile::sphere(millimeter!(-50.0)).unwrap(), millimeter!(47.9), Material::Air)
                .unwrap(),
            Surface::image(),
        ];
        OpticalSystem::new(surfaces, vec![], fields, EngineConfig::default()).unwrap()
    }

    #[test]
    fn on_axis_fans_agree() {
        let system = singlet(vec![]);
        let analyzer = TransverseAnalyzer::new(
            &system,
            AnalysisOptions {
                ray_count: 11,
                ..Default::default()
            },
        )
        .unwrap();
        let fans = analyzer
            .fans(0, &Field::angle(degree!(0.0), degree!(0.0)), 0, micrometer!(0.5876))
            .unwrap();
        assert_eq!(fans.meridional.records.len(), 11);
        assert_eq!(fans.meridional.valid_count(), 11);
        for (m, s) in fans.meridional.records.iter().zip(&fans.sagittal.records) {
            assert_abs_diff_eq!(m.pupil_coordinate, s.pupil_coordinate);
            assert_abs_diff_eq!(
                m.transverse_aberration_um,
                s.transverse_aberration_um,
                epsilon = 1e-5
            );
            assert!(m.is_full_success);
        }
        // spherical aberration: odd in the pupil coordinate
        let first = fans.meridional.records[0].transverse_aberration_um;
        let last = fans.meridional.records[10].transverse_aberration_um;
        assert_abs_diff_eq!(first, -last, epsilon = 1e-5);
        assert_abs_diff_eq!(fans.meridional.records[5].transverse_aberration_um, 0.0, epsilon = 1e-9);
    }
    #[test]
    fn zero_aberration_position_is_passed_through() {
        let field = Field::angle(degree!(0.0), degree!(2.0)).with_zero_aberration_position(millimeter!(0.25));
        let system = singlet(vec![field]);
        let analyzer = TransverseAnalyzer::new(&system, AnalysisOptions::default()).unwrap();
        let output = analyzer.analyze(&mut QueryControl::new()).unwrap();
        let fans = output.successes().next().unwrap();
        assert_eq!(fans.meridional.zero_aberration_position_mm, Some(0.25));
        assert_abs_diff_eq!(fans.meridional.records[25].transverse_aberration_um, 0.0, epsilon = 1e-6);
        assert!(fans.meridional.records[25].chief_xy_mm[1].abs() > 1.0);
    }
    #[test]
    fn plane_block_has_no_angular_aberration() {
        let glass = Material::Model(RefrIndexConst::new(1.6).unwrap().to_enum());
        let surfaces = vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            Surface::stop(millimeter!(4.0), millimeter!(10.0)).unwrap(),
            Surface::lens(Profile::Plane, millimeter!(10.0), glass).unwrap(),
            Surface::lens(Profile::Plane, millimeter!(10.0), Material::Air).unwrap(),
            Surface::image(),
        ];
        let system = OpticalSystem::new(
            surfaces,
            vec![],
            vec![Field::angle(degree!(0.0), degree!(5.0))],
            EngineConfig::default(),
        )
        .unwrap();
        let analyzer = TransverseAnalyzer::new(&system, AnalysisOptions::default()).unwrap();
        let output = analyzer.analyze(&mut QueryControl::new()).unwrap();
        let fans = output.successes().next().unwrap();
        for record in fans.meridional.records.iter().chain(&fans.sagittal.records) {
            assert!(record.angular_aberration_rad.abs() <= 1e-9);
        }
    }
    #[test]
    fn unreachable_field_is_reported_per_task() {
        let system = singlet(vec![
            Field::angle(degree!(0.0), degree!(0.0)),
            Field::height(millimeter!(0.0), millimeter!(1.0)),
        ]);
        let analyzer = TransverseAnalyzer::new(&system, AnalysisOptions::default()).unwrap();
        let output = analyzer.analyze(&mut QueryControl::new()).unwrap();
        assert_eq!(output.tasks.len(), 2);
        assert!(output.tasks[0].result.is_ok());
        assert!(output.tasks[1].result.is_err());
    }
}
