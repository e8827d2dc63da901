#![warn(missing_docs)]
//! Optical path difference over the exit pupil.
//!
//! The wavefront of a field is compared with a reference sphere centered on the chief ray's intersection with the
//! evaluation surface. The sphere passes through the point where the chief ray crosses the paraxial exit pupil
//! plane. Every pupil ray is traced to the evaluation surface and propagated (backwards, usually) to the reference
//! sphere; its optical path there minus the optical path of the chief ray is the OPD. Afocal systems and systems with
//! the exit pupil at infinity use a plane perpendicular to the chief ray as reference.
use kahan::KahanSummator;
use log::debug;
use nalgebra::{Matrix3, Point3, Vector3};
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
    distributions::{Distribution, PupilMask, PupilSample, PupilSampler, SampledRay},
    error::{TraceError, TraceResult},
    paraxial::ParaxialSystem,
    system::{Field, OpticalSystem},
    tracer::SurfaceHit,
    utils::usize_to_f64,
};

/// Best-effort rays are accepted if they pass the stop closer than this fraction of the stop radius to their target.
pub const RESCUE_MISS_FRACTION: f64 = 0.7;
const PARALLEL_LIMIT: f64 = 1e-12;

/// Square `G×G` grid of normalized pupil coordinates `u_i = (i − G/2)·2/G`.
///
/// The chief ray lies exactly on the cell `(G/2, G/2)`. Cells are stored in raster order, rows of constant `v`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PupilGrid {
    /// grid dimension `G`
    pub size: usize,
    /// transmission mask
    pub mask: PupilMask,
    /// central obscuration of the annular mask
    pub obscuration_ratio: f64,
}
impl PupilGrid {
    /// Creates a new [`PupilGrid`].
    #[must_use]
    pub const fn new(size: usize, mask: PupilMask, obscuration_ratio: f64) -> Self {
        Self {
            size,
            mask,
            obscuration_ratio,
        }
    }
    /// Normalized coordinate of row or column `i`.
    #[must_use]
    pub fn coordinate(&self, i: usize) -> f64 {
        2.0 * (usize_to_f64(i) - usize_to_f64(self.size / 2)) / usize_to_f64(self.size)
    }
    /// Normalized coordinates `(u, v)` of a cell.
    #[must_use]
    pub fn cell_coordinates(&self, index: usize) -> (f64, f64) {
        (
            self.coordinate(index % self.size),
            self.coordinate(index / self.size),
        )
    }
    /// Column and row of the chief ray.
    #[must_use]
    pub const fn chief_cell(&self) -> (usize, usize) {
        (self.size / 2, self.size / 2)
    }
    /// Number of cells.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.size * self.size
    }
    /// Returns true for a grid without cells.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
    /// Returns true if the mask transmits the cell.
    #[must_use]
    pub fn transmits(&self, index: usize) -> bool {
        let (u, v) = self.cell_coordinates(index);
        self.mask.transmits(u, v, self.obscuration_ratio)
    }
    /// Number of cells transmitted by the mask.
    #[must_use]
    pub fn transmitted_count(&self) -> usize {
        (0..self.len()).filter(|i| self.transmits(*i)).count()
    }
}
impl Distribution for PupilGrid {
    fn generate(&self) -> Vec<PupilSample> {
        (0..self.len())
            .map(|index| {
                let (u, v) = self.cell_coordinates(index);
                let mut sample = PupilSample::new(u, v);
                sample.is_vignetted = !self.mask.transmits(u, v, self.obscuration_ratio);
                sample
            })
            .collect()
    }
}

/// Reference surface of the OPD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReferenceSurface {
    /// sphere centered on the chief ray image point
    Sphere {
        /// distance between exit pupil and image point (mm)
        radius_mm: f64,
    },
    /// plane perpendicular to the chief ray (afocal or image space telecentric)
    Plane,
}

/// Statistics of the valid cells of a map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavefrontStatistics {
    /// mean OPD (waves)
    pub mean_waves: f64,
    /// RMS about the mean (waves)
    pub rms_waves: f64,
    /// peak to valley (waves)
    pub pv_waves: f64,
    /// number of cells with a valid OPD
    pub valid_count: usize,
    /// valid cells divided by the cells transmitted by the mask
    pub coverage: f64,
}
impl WavefrontStatistics {
    /// Computes the statistics of the finite values. `transmitted` is the number of cells inside the mask.
    #[must_use]
    pub fn from_values(values: &[f64], transmitted: usize) -> Self {
        let valid: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if valid.is_empty() {
            return Self {
                mean_waves: f64::NAN,
                rms_waves: f64::NAN,
                pv_waves: f64::NAN,
                valid_count: 0,
                coverage: 0.0,
            };
        }
        let count = usize_to_f64(valid.len());
        let sum: f64 = valid.iter().kahan_sum().sum();
        let mean = sum / count;
        let squares: Vec<f64> = valid.iter().map(|v| (v - mean).powi(2)).collect();
        let square_sum: f64 = squares.iter().kahan_sum().sum();
        let variance = square_sum / count;
        let (min, max) = valid
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(*v), hi.max(*v))
            });
        Self {
            mean_waves: mean,
            rms_waves: variance.sqrt(),
            pv_waves: max - min,
            valid_count: valid.len(),
            coverage: if transmitted > 0 {
                count / usize_to_f64(transmitted)
            } else {
                0.0
            },
        }
    }
}

/// OPD map of one field and wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct WavefrontMap {
    /// index into the field table
    pub field_index: usize,
    /// index into the source table
    pub wavelength_index: usize,
    /// wavelength (µm)
    pub wavelength_um: f64,
    /// pupil grid
    pub grid: PupilGrid,
    /// OPD per cell (waves), `NaN` for masked or vignetted cells
    pub opd_waves: Vec<f64>,
    /// cells filled by best-effort rays
    pub best_effort: Vec<bool>,
    /// reference surface
    pub reference: ReferenceSurface,
    /// radius of the exit pupil or of the emerging beam (mm)
    pub exit_pupil_radius_mm: f64,
    /// removed piston and tilt `[a, b, c]` of `a + b·u + c·v` (waves)
    pub removed_tilt: Option<[f64; 3]>,
    /// statistics of the valid cells
    pub statistics: WavefrontStatistics,
}
impl WavefrontMap {
    /// Creates a map from an analytic OPD function (waves) of the normalized pupil coordinates.
    #[must_use]
    pub fn synthetic(
        grid: PupilGrid,
        wavelength_um: f64,
        reference: ReferenceSurface,
        exit_pupil_radius_mm: f64,
        opd_waves: impl Fn(f64, f64) -> f64,
    ) -> Self {
        let values = (0..grid.len())
            .map(|index| {
                if grid.transmits(index) {
                    let (u, v) = grid.cell_coordinates(index);
                    opd_waves(u, v)
                } else {
                    f64::NAN
                }
            })
            .collect();
        let mut map = Self {
            field_index: 0,
            wavelength_index: 0,
            wavelength_um,
            grid,
            opd_waves: values,
            best_effort: vec![false; grid.len()],
            reference,
            exit_pupil_radius_mm,
            removed_tilt: None,
            statistics: WavefrontStatistics::from_values(&[], 0),
        };
        map.finish(false);
        map
    }
    /// Applies the optional piston / tilt removal and computes the statistics.
    fn finish(&mut self, remove_tilt: bool) {
        if remove_tilt {
            self.removed_tilt = remove_piston_and_tilt(&self.grid, &mut self.opd_waves);
            if self.removed_tilt.is_none() {
                debug!("piston and tilt could not be fitted, the map is left unchanged");
            }
        }
        self.statistics =
            WavefrontStatistics::from_values(&self.opd_waves, self.grid.transmitted_count());
    }
    /// OPD of the cell at column `i` and row `j` (waves).
    #[must_use]
    pub fn value(&self, i: usize, j: usize) -> Option<f64> {
        if i >= self.grid.size || j >= self.grid.size {
            return None;
        }
        self.opd_waves.get(j * self.grid.size + i).copied()
    }
    /// OPD per cell (µm).
    #[must_use]
    pub fn opd_um(&self) -> Vec<f64> {
        self.opd_waves.iter().map(|w| w * self.wavelength_um).collect()
    }
    /// RMS OPD (µm).
    #[must_use]
    pub fn rms_um(&self) -> f64 {
        self.statistics.rms_waves * self.wavelength_um
    }
    /// Peak to valley OPD (µm).
    #[must_use]
    pub fn pv_um(&self) -> f64 {
        self.statistics.pv_waves * self.wavelength_um
    }
    /// OPD at the chief ray cell (waves).
    #[must_use]
    pub fn chief_opd(&self) -> Option<f64> {
        let (i, j) = self.grid.chief_cell();
        self.value(i, j)
    }
    /// Returns true if no cell carries a valid OPD.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.statistics.valid_count == 0
    }
}

/// Least squares removal of `a + b·u + c·v` from the finite cells.
fn remove_piston_and_tilt(grid: &PupilGrid, values: &mut [f64]) -> Option<[f64; 3]> {
    let mut normal = Matrix3::<f64>::zeros();
    let mut rhs = Vector3::<f64>::zeros();
    for (index, value) in values.iter().enumerate().filter(|(_, v)| v.is_finite()) {
        let (u, v) = grid.cell_coordinates(index);
        let row = Vector3::new(1.0, u, v);
        normal += row * row.transpose();
        rhs += row * *value;
    }
    let c = normal.lu().solve(&rhs)?;
    if !c.iter().all(|x| x.is_finite()) {
        return None;
    }
    for (index, value) in values.iter_mut().enumerate() {
        if value.is_finite() {
            let (u, v) = grid.cell_coordinates(index);
            *value -= c[2].mul_add(v, c[1].mul_add(u, c[0]));
        }
    }
    Some([c[0], c[1], c[2]])
}

/// OPD of a scattered pupil sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScatteredOpd {
    /// normalized pupil coordinate along x
    pub u: f64,
    /// normalized pupil coordinate along y
    pub v: f64,
    /// OPD (waves), `NaN` if the sample is vignetted
    pub opd_waves: f64,
    /// the sample was filled by a best-effort ray
    pub is_best_effort: bool,
}

/// Nearest-neighbour resampling of scattered OPD samples onto a pupil grid.
///
/// Every transmitted cell takes the value of the closest sample, vignetted samples included (their `NaN` marks the
/// cell invalid). Cells outside the mask are `NaN`.
#[must_use]
pub fn resample_nearest(samples: &[ScatteredOpd], grid: &PupilGrid) -> (Vec<f64>, Vec<bool>) {
    let mut values = vec![f64::NAN; grid.len()];
    let mut best_effort = vec![false; grid.len()];
    for index in (0..grid.len()).filter(|i| grid.transmits(*i)) {
        let (u, v) = grid.cell_coordinates(index);
        let nearest = samples.iter().min_by(|a, b| {
            let da = (a.u - u).hypot(a.v - v);
            let db = (b.u - u).hypot(b.v - v);
            da.total_cmp(&db)
        });
        if let Some(sample) = nearest {
            values[index] = sample.opd_waves;
            best_effort[index] = sample.is_best_effort && sample.opd_waves.is_finite();
        }
    }
    (values, best_effort)
}

/// Reference sphere or plane of one field in the local frame of the evaluation surface.
#[derive(Debug, Clone, Copy)]
struct OpdReference {
    center: Point3<f64>,
    chief_direction: Vector3<f64>,
    index: f64,
    surface: ReferenceSurface,
    /// +1 if the sphere lies behind the evaluation surface, −1 if in front of it
    side: f64,
    chief_path: f64,
    exit_pupil_radius_mm: f64,
}
impl OpdReference {
    /// Optical path from the object to the reference surface along the ray of the hit.
    fn path_to(&self, hit: &SurfaceHit) -> Option<f64> {
        let w = hit.local - self.center;
        let d = hit.local_direction;
        let t = match self.surface {
            ReferenceSurface::Sphere { radius_mm } => {
                let b = d.dot(&w);
                let c = radius_mm.mul_add(-radius_mm, w.norm_squared());
                let discriminant = b.mul_add(b, -c);
                if discriminant < 0.0 {
                    return None;
                }
                self.side.mul_add(discriminant.sqrt(), -b)
            }
            ReferenceSurface::Plane => {
                let cos = d.dot(&self.chief_direction);
                if cos.abs() < PARALLEL_LIMIT {
                    return None;
                }
                -w.dot(&self.chief_direction) / cos
            }
        };
        let path = self.index.mul_add(t, hit.optical_path);
        path.is_finite().then_some(path)
    }
}

/// Analyzer for OPD maps. It also provides the maps of the PSF analysis.
#[derive(Debug, Clone)]
pub struct WavefrontAnalyzer<'a> {
    system: &'a OpticalSystem,
    options: AnalysisOptions,
}
impl<'a> WavefrontAnalyzer<'a> {
    /// Creates a new [`WavefrontAnalyzer`].
    ///
    /// # Errors
    ///
    /// This function returns an error if the options are not valid for the system.
    pub fn new(system: &'a OpticalSystem, options: AnalysisOptions) -> TraceResult<Self> {
        options.validate(system)?;
        Ok(Self { system, options })
    }
    /// The analysis options.
    #[must_use]
    pub const fn options(&self) -> &AnalysisOptions {
        &self.options
    }
    /// The pupil grid of the maps.
    #[must_use]
    pub const fn grid(&self) -> PupilGrid {
        PupilGrid::new(
            self.options.grid_size,
            self.options.pupil_mask,
            self.options.obscuration_ratio,
        )
    }
    fn reference(&self, aimer: &PupilAimer<'_>, target: usize) -> TraceResult<OpdReference> {
        let chief = aimer.chief_ray()?;
        let launch = chief
            .ray()
            .ok_or_else(|| TraceError::UnreachableStop("chief ray has no launch ray".into()))?;
        let traced = aimer.trace_to(launch, target);
        let hit = traced
            .hit(target)
            .filter(|_| traced.is_complete())
            .copied()
            .ok_or_else(|| {
                TraceError::Vignetted(format!("chief ray does not reach surface {target}"))
            })?;
        if hit.local_direction.z.abs() < PARALLEL_LIMIT {
            return Err(TraceError::DegenerateGeometry(
                "chief ray runs parallel to the evaluation plane".into(),
            ));
        }
        let index = aimer.tracer().indices().get(target).copied().unwrap_or(1.0);
        let paraxial = ParaxialSystem::new(self.system, aimer.tracer().wavelength())?;
        let cardinal = paraxial.cardinal_data()?;
        let exit_pupil = cardinal.exit_pupil;
        let (surface, side) = if paraxial.is_afocal()? || exit_pupil.is_at_infinity() {
            (ReferenceSurface::Plane, 1.0)
        } else {
            let exit_z = exit_pupil.position_mm + paraxial.distance_to_image(target);
            let t = (exit_z - hit.local.z) / hit.local_direction.z;
            if !t.is_finite() || t.abs() < PARALLEL_LIMIT {
                return Err(TraceError::DegenerateGeometry(
                    "exit pupil coincides with the evaluation surface".into(),
                ));
            }
            (ReferenceSurface::Sphere { radius_mm: t.abs() }, t.signum())
        };
        let exit_pupil_radius_mm = if exit_pupil.radius_mm.is_finite() {
            exit_pupil.radius_mm
        } else {
            paraxial
                .marginal_ray()?
                .at(paraxial.last_optical_surface())
                .map_or(f64::NAN, |s| s.y.abs())
        };
        let mut reference = OpdReference {
            center: hit.local,
            chief_direction: hit.local_direction,
            index,
            surface,
            side,
            chief_path: 0.0,
            exit_pupil_radius_mm,
        };
        reference.chief_path = reference.path_to(&hit).ok_or_else(|| {
            TraceError::NumericalFailure("chief ray path to the reference is not finite".into())
        })?;
        debug!("OPD reference {surface:?}, chief path {:.6} mm", reference.chief_path);
        Ok(reference)
    }
    /// OPD (mm) of a sampled ray and whether it is a best-effort value.
    fn ray_opd(
        &self,
        reference: &OpdReference,
        ray: &SampledRay,
        target: usize,
        stop_radius: f64,
    ) -> Option<(f64, bool)> {
        let hit = ray.hit(target)?;
        let best_effort = ray.sample.is_partial;
        if best_effort {
            if !self.options.marginal_rescue {
                return None;
            }
            let stop_hit = ray.traced.as_ref()?.hit(self.system.stop_index())?;
            let miss = (stop_hit.local.x - ray.sample.u * stop_radius)
                .hypot(stop_hit.local.y - ray.sample.v * stop_radius);
            if !(miss < RESCUE_MISS_FRACTION * stop_radius) {
                return None;
            }
        }
        let opd = reference.path_to(hit)? - reference.chief_path;
        opd.is_finite().then_some((opd, best_effort))
    }
    fn sample_opd(
        &self,
        field: &Field,
        wavelength: Length,
        distribution: &dyn Distribution,
        guard: &WarnOnce,
    ) -> TraceResult<(Vec<ScatteredOpd>, OpdReference)> {
        let target = self.options.target_surface(self.system);
        let aimer = PupilAimer::new(self.system, field, wavelength)?;
        let reference = self.reference(&aimer, target)?;
        let sampler = PupilSampler::new(&aimer, target)
            .with_mask(self.options.pupil_mask, self.options.obscuration_ratio);
        let rays = sampler.sample_distribution(distribution);
        note_numerical_failures(&rays, guard);
        let wavelength_mm = wavelength.get::<millimeter>();
        let stop_radius = aimer.stop_radius_mm();
        let samples = rays
            .iter()
            .map(|ray| {
                let opd = self.ray_opd(&reference, ray, target, stop_radius);
                ScatteredOpd {
                    u: ray.sample.u,
                    v: ray.sample.v,
                    opd_waves: opd.map_or(f64::NAN, |(value, _)| value / wavelength_mm),
                    is_best_effort: opd.is_some_and(|(_, rescued)| rescued),
                }
            })
            .collect();
        Ok((samples, reference))
    }
    /// OPD of the pupil samples of the configured pupil pattern.
    ///
    /// # Errors
    ///
    /// This function returns an error if the chief ray cannot be found or the reference cannot be set up.
    pub fn scattered(&self, field: &Field, wavelength: Length) -> TraceResult<Vec<ScatteredOpd>> {
        let pattern = ScatteredPattern(
            self.options
                .pupil_pattern
                .generate(self.options.ray_count, self.options.annular_rings),
        );
        Ok(self
            .sample_opd(field, wavelength, &pattern, &WarnOnce::default())?
            .0)
    }
    /// OPD map on the pupil grid.
    ///
    /// # Errors
    ///
    /// This function returns an error if the chief ray cannot be found or the reference cannot be set up.
    pub fn map(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
    ) -> TraceResult<WavefrontMap> {
        self.map_with_guard(field_index, field, wavelength_index, wavelength, &WarnOnce::default())
    }
    pub(crate) fn map_with_guard(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
        guard: &WarnOnce,
    ) -> TraceResult<WavefrontMap> {
        let grid = self.grid();
        let (samples, reference) = self.sample_opd(field, wavelength, &grid, guard)?;
        let mut map = WavefrontMap {
            field_index,
            wavelength_index,
            wavelength_um: wavelength.get::<micrometer>(),
            grid,
            opd_waves: samples.iter().map(|s| s.opd_waves).collect(),
            best_effort: samples.iter().map(|s| s.is_best_effort).collect(),
            reference: reference.surface,
            exit_pupil_radius_mm: reference.exit_pupil_radius_mm,
            removed_tilt: None,
            statistics: WavefrontStatistics::from_values(&[], 0),
        };
        map.finish(self.options.remove_tilt);
        Ok(map)
    }
    /// OPD map built from the samples of the configured pupil pattern by nearest-neighbour resampling.
    ///
    /// # Errors
    ///
    /// This function returns an error if the chief ray cannot be found or the reference cannot be set up.
    pub fn resampled_map(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
    ) -> TraceResult<WavefrontMap> {
        let grid = self.grid();
        let pattern = ScatteredPattern(
            self.options
                .pupil_pattern
                .generate(self.options.ray_count, self.options.annular_rings),
        );
        let (samples, reference) =
            self.sample_opd(field, wavelength, &pattern, &WarnOnce::default())?;
        let (opd_waves, best_effort) = resample_nearest(&samples, &grid);
        let mut map = WavefrontMap {
            field_index,
            wavelength_index,
            wavelength_um: wavelength.get::<micrometer>(),
            grid,
            opd_waves,
            best_effort,
            reference: reference.surface,
            exit_pupil_radius_mm: reference.exit_pupil_radius_mm,
            removed_tilt: None,
            statistics: WavefrontStatistics::from_values(&[], 0),
        };
        map.finish(self.options.remove_tilt);
        Ok(map)
    }
}
impl Analyzer for WavefrontAnalyzer<'_> {
    type Output = WavefrontMap;
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::Wavefront
    }
    fn analyze(&self, control: &mut QueryControl<'_>) -> TraceResult<QueryOutput<WavefrontMap>> {
        self.options.validate(self.system)?;
        let guard = WarnOnce::default();
        Ok(run_tasks(
            self.analyzer_type(),
            self.system,
            &self.options,
            control,
            |f, field, w, wavelength| self.map_with_guard(f, field, w, wavelength, &guard),
        ))
    }
}

/// Pre-generated samples used as a [`Distribution`].
struct ScatteredPattern(Vec<PupilSample>);
impl Distribution for ScatteredPattern {
    fn generate(&self) -> Vec<PupilSample> {
        self.0.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::EngineConfig,
        degree, micrometer, millimeter,
        distributions::PupilPattern,
        refractive_index::{RefrIndexAbbe, RefrIndexConst, RefractiveIndex},
        surface::{Material, Profile, Surface},
    };
    use approx::assert_abs_diff_eq;

    fn singlet(stop_radius: f64, image_distance: f64) -> OpticalSystem {
        let glass = Material::Model(RefrIndexAbbe::new(1.5168, 64.17).unwrap().to_enum());
        let surfaces = vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            Surface::stop(millimeter!(stop_radius), millimeter!(0.0)).unwrap(),
            Surface::lens(Profile::sphere(millimeter!(50.0)).unwrap(), millimeter!(3.0), glass)
                .unwrap(),
            Surface::lens(
                Profile::sphere(millimeter!(-50.0)).unwrap(),
                millimeter!(image_distance),
                Material::Air,
            )
            .unwrap(),
            Surface::image(),
        ];
        OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()).unwrap()
    }
    fn options(grid_size: usize) -> AnalysisOptions {
        AnalysisOptions {
            grid_size,
            ..Default::default()
        }
    }

    #[test]
    fn grid_coordinates() {
        let grid = PupilGrid::new(8, PupilMask::Circular, 0.0);
        assert_eq!(grid.coordinate(0), -1.0);
        assert_eq!(grid.coordinate(4), 0.0);
        assert_eq!(grid.coordinate(7), 0.75);
        assert_eq!(grid.chief_cell(), (4, 4));
        assert_eq!(grid.cell_coordinates(4 * 8 + 4), (0.0, 0.0));
        assert!(!grid.transmits(0));
        assert!(grid.transmits(4 * 8));
        let samples = grid.generate();
        assert_eq!(samples.len(), 64);
        assert_eq!(
            samples.iter().filter(|s| !s.is_vignetted).count(),
            grid.transmitted_count()
        );
        let annular = PupilGrid::new(8, PupilMask::Annular, 0.3);
        assert!(!annular.transmits(4 * 8 + 4));
    }
    #[test]
    fn statistics() {
        let stats = WavefrontStatistics::from_values(&[1.0, -1.0, f64::NAN, 1.0, -1.0], 5);
        assert_eq!(stats.valid_count, 4);
        assert_abs_diff_eq!(stats.mean_waves, 0.0);
        assert_abs_diff_eq!(stats.rms_waves, 1.0);
        assert_abs_diff_eq!(stats.pv_waves, 2.0);
        assert_abs_diff_eq!(stats.coverage, 0.8);
        let empty = WavefrontStatistics::from_values(&[f64::NAN], 1);
        assert!(empty.rms_waves.is_nan());
        assert_eq!(empty.coverage, 0.0);
    }
    #[test]
    fn tilt_removal() {
        let grid = PupilGrid::new(16, PupilMask::Circular, 0.0);
        let mut values: Vec<f64> = (0..grid.len())
            .map(|i| {
                if grid.transmits(i) {
                    let (u, v) = grid.cell_coordinates(i);
                    0.5 + 0.25 * u - 0.75 * v
                } else {
                    f64::NAN
                }
            })
            .collect();
        let coefficients = remove_piston_and_tilt(&grid, &mut values).unwrap();
        assert_abs_diff_eq!(coefficients[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(coefficients[1], 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(coefficients[2], -0.75, epsilon = 1e-12);
        for v in values.iter().filter(|v| v.is_finite()) {
            assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
        }
        let mut single = vec![f64::NAN; grid.len()];
        single[8 * 16 + 8] = 1.0;
        assert!(remove_piston_and_tilt(&grid, &mut single).is_none());
    }
    #[test]
    fn resampling() {
        let grid = PupilGrid::new(4, PupilMask::Circular, 0.0);
        let samples = [
            ScatteredOpd {
                u: 0.0,
                v: 0.0,
                opd_waves: 0.0,
                is_best_effort: false,
            },
            ScatteredOpd {
                u: -0.5,
                v: -0.5,
                opd_waves: f64::NAN,
                is_best_effort: false,
            },
        ];
        let (values, best_effort) = resample_nearest(&samples, &grid);
        assert_eq!(values[2 * 4 + 2], 0.0);
        assert!(values[4 + 1].is_nan());
        assert!(values[0].is_nan());
        assert!(best_effort.iter().all(|b| !b));
    }
    #[test]
    fn on_axis_singlet() {
        let system = singlet(5.0, 47.9);
        let analyzer = WavefrontAnalyzer::new(&system, options(32)).unwrap();
        let map = analyzer
            .map(0, &Field::angle(degree!(0.0), degree!(0.0)), 0, micrometer!(0.5876))
            .unwrap();
        assert_eq!(map.opd_waves.len(), 32 * 32);
        assert_abs_diff_eq!(map.chief_opd().unwrap(), 0.0, epsilon = 1e-6);
        assert!(matches!(map.reference, ReferenceSurface::Sphere { .. }));
        assert!(map.statistics.rms_waves > 0.0);
        assert!(map.statistics.pv_waves >= map.statistics.rms_waves);
        assert_abs_diff_eq!(map.statistics.coverage, 1.0, epsilon = 1e-12);
        // rotational symmetry of the OPD
        let g = 32;
        assert_abs_diff_eq!(
            map.value(16 + 5, 16).unwrap(),
            map.value(16, 16 + 5).unwrap(),
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            map.value(16 - 5, 16).unwrap(),
            map.value(16, 16 - 5).unwrap(),
            epsilon = 1e-6
        );
        assert!(map.value(g, 0).is_none());
        assert_abs_diff_eq!(map.rms_um(), map.statistics.rms_waves * 0.5876, epsilon = 1e-12);
    }
    #[test]
    fn plane_plate_in_collimated_beam_is_flat() {
        let glass = Material::Model(RefrIndexConst::new(1.6).unwrap().to_enum());
        let surfaces = vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            Surface::stop(millimeter!(4.0), millimeter!(10.0)).unwrap(),
            Surface::lens(Profile::Plane, millimeter!(10.0), glass).unwrap(),
            Surface::lens(Profile::Plane, millimeter!(10.0), Material::Air).unwrap(),
            Surface::image(),
        ];
        let system =
            OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()).unwrap();
        let analyzer = WavefrontAnalyzer::new(&system, options(16)).unwrap();
        let map = analyzer
            .map(0, &Field::angle(degree!(0.0), degree!(3.0)), 0, micrometer!(0.5876))
            .unwrap();
        assert_eq!(map.reference, ReferenceSurface::Plane);
        assert!(map.statistics.valid_count > 0);
        assert!(map.statistics.pv_waves < 1e-6);
    }
    #[test]
    fn remove_tilt_option() {
        let system = singlet(5.0, 47.9);
        let field = Field::angle(degree!(0.0), degree!(3.0));
        let plain = WavefrontAnalyzer::new(&system, options(16))
            .unwrap()
            .map(0, &field, 0, micrometer!(0.5876))
            .unwrap();
        let untilted = WavefrontAnalyzer::new(
            &system,
            AnalysisOptions {
                remove_tilt: true,
                ..options(16)
            },
        )
        .unwrap()
        .map(0, &field, 0, micrometer!(0.5876))
        .unwrap();
        assert!(untilted.removed_tilt.is_some());
        assert!(untilted.statistics.rms_waves <= plain.statistics.rms_waves + 1e-12);
        assert_abs_diff_eq!(untilted.statistics.mean_waves, 0.0, epsilon = 1e-9);
    }
    #[test]
    fn annular_mask_and_scattered_samples() {
        let system = singlet(5.0, 47.9);
        let analyzer = WavefrontAnalyzer::new(
            &system,
            AnalysisOptions {
                pupil_mask: PupilMask::Annular,
                pupil_pattern: PupilPattern::Annular,
                ray_count: 61,
                ..options(16)
            },
        )
        .unwrap();
        let field = Field::angle(degree!(0.0), degree!(0.0));
        let map = analyzer.map(0, &field, 0, micrometer!(0.5876)).unwrap();
        assert!(map.chief_opd().unwrap().is_nan());
        assert!(map.statistics.valid_count > 0);
        let scattered = analyzer.scattered(&field, micrometer!(0.5876)).unwrap();
        assert_eq!(scattered.len(), 61);
        assert!(scattered[0].opd_waves.is_nan());
        let resampled = analyzer.resampled_map(0, &field, 0, micrometer!(0.5876)).unwrap();
        assert!(resampled.statistics.valid_count > 0);
        assert!(resampled.statistics.pv_waves.is_finite());
    }
    #[test]
    fn analyze_all_wavelengths() {
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
        let sources = vec![
            crate::system::Source::new(micrometer!(0.4861), false).unwrap(),
            crate::system::Source::new(micrometer!(0.5876), true).unwrap(),
        ];
        let system =
            OpticalSystem::new(surfaces, sources, vec![], EngineConfig::default()).unwrap();
        let analyzer = WavefrontAnalyzer::new(&system, options(8)).unwrap();
        let output = analyzer.analyze(&mut QueryControl::new()).unwrap();
        assert_eq!(output.tasks.len(), 2);
        assert_eq!(output.tasks[0].wavelength_index, 0);
        assert_abs_diff_eq!(
            output.tasks[0].result.as_ref().unwrap().wavelength_um,
            0.4861,
            epsilon = 1e-12
        );
    }
    #[test]
    fn marginal_rescue_threshold() {
        let system = singlet(5.0, 47.9);
        let field = Field::angle(degree!(0.0), degree!(0.0));
        let aimer = PupilAimer::new(&system, &field, micrometer!(0.5876)).unwrap();
        let rescue = WavefrontAnalyzer::new(&system, options(16)).unwrap();
        let target = rescue.options().target_surface(&system);
        let reference = rescue.reference(&aimer, target).unwrap();
        let stop_radius = aimer.stop_radius_mm();
        let aimed = PupilSampler::new(&aimer, target).sample(PupilSample::new(0.0, 0.5));
        assert!(aimed.is_valid());
        let exact = rescue
            .ray_opd(&reference, &aimed, target, stop_radius)
            .unwrap();
        assert!(!exact.1);
        // a fallback ray that crossed the stop `offset` (fraction of r) away from its pupil target
        let fallback = |offset: f64| {
            let mut ray = aimed.clone();
            ray.sample.is_partial = true;
            ray.sample.v += offset;
            ray
        };
        let inside = fallback(RESCUE_MISS_FRACTION - 0.01);
        let (opd, best_effort) = rescue
            .ray_opd(&reference, &inside, target, stop_radius)
            .unwrap();
        assert!(best_effort);
        assert_abs_diff_eq!(opd, exact.0, epsilon = 1e-12);
        let outside = fallback(RESCUE_MISS_FRACTION + 0.01);
        assert!(rescue
            .ray_opd(&reference, &outside, target, stop_radius)
            .is_none());
        let strict = WavefrontAnalyzer::new(
            &system,
            AnalysisOptions {
                grid_size: 16,
                marginal_rescue: false,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(strict
            .ray_opd(&reference, &inside, target, stop_radius)
            .is_none());
        assert!(strict
            .ray_opd(&reference, &aimed, target, stop_radius)
            .is_some());
    }
}
