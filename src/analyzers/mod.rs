#![warn(missing_docs)]
//! Aberration analyzers
//!
//! An analyzer of a certain [`AnalyzerType`] evaluates an [`OpticalSystem`] for every field × wavelength combination
//! of the system. Each combination is an independent task: tasks run in field-major order, are reported in that order
//! and are the only points where a query reports progress, yields to the caller or honors a cancellation request.
//!
//! Per-task failures (e.g. a chief ray that cannot pass the stop) do not abort the query. They are reported in the
//! [`TaskOutput`] of the failing task, while all other tasks carry their results.
use std::{
    fmt::Display,
    sync::atomic::{AtomicBool, Ordering},
};

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum::EnumIter;
use uom::si::{f64::Length, length::millimeter};

pub mod astigmatism;
pub mod psf;
pub mod transverse;
pub mod wavefront;

pub use astigmatism::{AstigmatismAnalyzer, AstigmatismRecord};
pub use psf::{PixelUnit, PsfAnalyzer, PsfMetrics, PsfResult};
pub use transverse::{TransverseAnalyzer, TransverseFan, TransverseFans, TransverseRecord};
pub use wavefront::{PupilGrid, ReferenceSurface, WavefrontAnalyzer, WavefrontMap, WavefrontStatistics};

use crate::{
    degree,
    distributions::{PupilMask, PupilPattern, SampledRay},
    error::{TraceError, TraceResult},
    surface::SurfaceType,
    system::{Field, OpticalSystem},
    tracer::{TraceStatus, VignetteReason},
    utils::usize_to_f64,
};

/// Type of analysis to be performed.
#[non_exhaustive]
#[derive(EnumIter, PartialEq, Eq, Debug, Clone, Copy)]
pub enum AnalyzerType {
    /// transverse ray aberration fans
    Transverse,
    /// best focus of meridional and sagittal fans
    Astigmatism,
    /// optical path difference over the pupil
    Wavefront,
    /// point spread function
    Psf,
}
impl Display for AnalyzerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::Transverse => "transverse aberration analysis",
            Self::Astigmatism => "astigmatism analysis",
            Self::Wavefront => "wavefront analysis",
            Self::Psf => "PSF analysis",
        };
        write!(f, "{msg}")
    }
}

/// Parameters of an analysis query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AnalysisOptions {
    /// evaluation surface, the image surface if `None`
    pub target_surface_index: Option<usize>,
    /// rays per fan or per pupil
    pub ray_count: usize,
    /// sampling pattern of the full pupil
    pub pupil_pattern: PupilPattern,
    /// ring count of the annular pattern, automatic if `None`
    pub annular_rings: Option<usize>,
    /// dimension of the OPD / PSF grid
    pub grid_size: usize,
    /// pupil transmission mask
    pub pupil_mask: PupilMask,
    /// central obscuration (fraction of the stop radius) of the annular mask
    pub obscuration_ratio: f64,
    /// display flag only
    pub log_scale: bool,
    /// abort request given at query entry
    pub cancel_requested: bool,
    /// number of completed tasks between calls of the yield hook
    pub yield_every: usize,
    /// evaluate tasks in parallel if no progress callback or yield hook is installed
    pub parallel: bool,
    /// zero padding factor of the PSF
    pub psf_oversampling: usize,
    /// remove piston and tilt from the OPD map
    pub remove_tilt: bool,
    /// try to fill vignetted cells at the pupil edge with best-effort rays
    pub marginal_rescue: bool,
}
impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            target_surface_index: None,
            ray_count: 51,
            pupil_pattern: PupilPattern::Annular,
            annular_rings: None,
            grid_size: 64,
            pupil_mask: PupilMask::Circular,
            obscuration_ratio: 0.3,
            log_scale: false,
            cancel_requested: false,
            yield_every: 1,
            parallel: false,
            psf_oversampling: 4,
            remove_tilt: false,
            marginal_rescue: true,
        }
    }
}
impl AnalysisOptions {
    /// Reads options from a YAML document. Unknown fields are rejected.
    ///
    /// # Errors
    ///
    /// This function returns an error if the document cannot be parsed.
    pub fn from_yaml(yaml: &str) -> TraceResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
    /// Evaluation surface for the given system.
    #[must_use]
    pub fn target_surface(&self, system: &OpticalSystem) -> usize {
        self.target_surface_index
            .unwrap_or_else(|| system.image_index())
    }
    /// Checks the options against a system.
    ///
    /// # Errors
    ///
    /// This function returns [`TraceError::InvalidSystem`] if a parameter is out of range or the target surface is
    /// not a valid evaluation plane.
    pub fn validate(&self, system: &OpticalSystem) -> TraceResult<()> {
        let target = self.target_surface(system);
        match system.surface(target).map(crate::surface::Surface::surface_type) {
            None => {
                return Err(TraceError::InvalidSystem(format!(
                    "target surface {target} does not exist"
                )))
            }
            Some(SurfaceType::Object | SurfaceType::CoordBreak) => {
                return Err(TraceError::InvalidSystem(format!(
                    "surface {target} cannot be used as evaluation plane"
                )))
            }
            Some(_) => {}
        }
        if self.ray_count == 0 {
            return Err(TraceError::InvalidSystem("ray count must be positive".into()));
        }
        if self.grid_size < 4 {
            return Err(TraceError::InvalidSystem("grid size must be at least 4".into()));
        }
        if self.psf_oversampling == 0 || self.yield_every == 0 {
            return Err(TraceError::InvalidSystem(
                "oversampling and yield interval must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.obscuration_ratio) {
            return Err(TraceError::InvalidSystem(
                "obscuration ratio must be within [0, 1)".into(),
            ));
        }
        if self.annular_rings == Some(0) {
            return Err(TraceError::InvalidSystem("ring count must be positive".into()));
        }
        Ok(())
    }
}

/// Callbacks and flags of a running query which cannot be part of [`AnalysisOptions`].
#[derive(Default)]
pub struct QueryControl<'c> {
    on_progress: Option<Box<dyn FnMut(f64, &str) + 'c>>,
    on_yield: Option<Box<dyn FnMut() + 'c>>,
    cancel: Option<&'c AtomicBool>,
}
impl<'c> QueryControl<'c> {
    /// Creates a control without callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Installs a progress callback receiving the completed percentage and a message.
    #[must_use]
    pub fn with_progress(mut self, callback: impl FnMut(f64, &str) + 'c) -> Self {
        self.on_progress = Some(Box::new(callback));
        self
    }
    /// Installs a hook called every `yield_every` completed tasks.
    #[must_use]
    pub fn with_yield_hook(mut self, hook: impl FnMut() + 'c) -> Self {
        self.on_yield = Some(Box::new(hook));
        self
    }
    /// Installs a cancellation flag checked before every task.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: &'c AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }
    /// Returns true if no callback is installed.
    #[must_use]
    pub const fn is_passive(&self) -> bool {
        self.on_progress.is_none() && self.on_yield.is_none()
    }
    fn flag_raised(&self) -> bool {
        self.cancel.is_some_and(|f| f.load(Ordering::Relaxed))
    }
    fn progress(&mut self, percent: f64, message: &str) {
        if let Some(callback) = self.on_progress.as_mut() {
            callback(percent, message);
        }
    }
    fn yield_now(&mut self) {
        if let Some(hook) = self.on_yield.as_mut() {
            hook();
        }
    }
}
impl std::fmt::Debug for QueryControl<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryControl")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_yield", &self.on_yield.is_some())
            .field("cancel", &self.flag_raised())
            .finish()
    }
}

/// Result of a single field × wavelength task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutput<T> {
    /// index into the field table
    pub field_index: usize,
    /// index into the source table
    pub wavelength_index: usize,
    /// task result
    pub result: TraceResult<T>,
}

/// Results of a complete query in field-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput<T> {
    /// completed tasks
    pub tasks: Vec<TaskOutput<T>>,
    /// the query was cancelled before all tasks were completed
    pub cancelled: bool,
    /// at least one task failed due to degenerate geometry
    pub degenerate: bool,
}
impl<T> QueryOutput<T> {
    /// Iterates over the successful task results.
    pub fn successes(&self) -> impl Iterator<Item = &T> {
        self.tasks.iter().filter_map(|t| t.result.as_ref().ok())
    }
    /// Result of the given field and wavelength, if it was completed.
    #[must_use]
    pub fn get(&self, field_index: usize, wavelength_index: usize) -> Option<&TraceResult<T>> {
        self.tasks
            .iter()
            .find(|t| t.field_index == field_index && t.wavelength_index == wavelength_index)
            .map(|t| &t.result)
    }
}

/// Interface of all analyzers.
pub trait Analyzer {
    /// Result of a single field × wavelength task.
    type Output: Send;
    /// Type of the analyzer.
    fn analyzer_type(&self) -> AnalyzerType;
    /// Evaluates all field × wavelength tasks.
    ///
    /// # Errors
    ///
    /// This function returns an error if the query cannot be started, e.g. because of invalid options.
    fn analyze(&self, control: &mut QueryControl<'_>) -> TraceResult<QueryOutput<Self::Output>>;
}

/// Emits a warning at most once per query.
#[derive(Debug, Default)]
pub struct WarnOnce(AtomicBool);
impl WarnOnce {
    /// Logs the message if no warning was emitted before.
    pub fn warn(&self, message: &str) {
        if !self.0.swap(true, Ordering::Relaxed) {
            warn!("{message}");
        }
    }
    /// Returns true if a warning was emitted.
    #[must_use]
    pub fn has_warned(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Logs numerical failures among sampled rays (once per query).
pub(crate) fn note_numerical_failures(rays: &[SampledRay], guard: &WarnOnce) {
    let failed = rays.iter().any(|r| {
        r.traced.as_ref().is_some_and(|t| {
            matches!(
                t.status(),
                TraceStatus::Vignetted {
                    reason: VignetteReason::NumericalFailure,
                    ..
                }
            )
        })
    });
    if failed {
        guard.warn("numerical failure during ray tracing, affected samples are treated as vignetted");
    }
}

/// Fields of a query. A system without field table is evaluated on axis.
#[must_use]
pub fn query_fields(system: &OpticalSystem) -> Vec<Field> {
    if !system.fields().is_empty() {
        return system.fields().to_vec();
    }
    if system.object_at_infinity() {
        vec![Field::angle(degree!(0.0), degree!(0.0))]
    } else {
        vec![Field::height(
            Length::new::<millimeter>(0.0),
            Length::new::<millimeter>(0.0),
        )]
    }
}

/// Runs `task` for every field × wavelength combination.
///
/// Tasks run in parallel if requested and no callback is installed. Otherwise they run sequentially, reporting
/// progress after every task and calling the yield hook every `yield_every` tasks. Cancellation is checked before
/// every task; completed tasks are always returned.
pub(crate) fn run_tasks<T, F>(
    analyzer: AnalyzerType,
    system: &OpticalSystem,
    options: &AnalysisOptions,
    control: &mut QueryControl<'_>,
    task: F,
) -> QueryOutput<T>
where
    T: Send,
    F: Fn(usize, &Field, usize, Length) -> TraceResult<T> + Sync,
{
    let fields = query_fields(system);
    let wavelengths = system.wavelengths();
    info!(
        "Performing {analyzer} for {} field(s) at {} wavelength(s).",
        fields.len(),
        wavelengths.len()
    );
    let jobs: Vec<(usize, usize)> = (0..fields.len())
        .flat_map(|f| (0..wavelengths.len()).map(move |w| (f, w)))
        .collect();
    let total = jobs.len();
    let run = |(f, w): (usize, usize)| TaskOutput {
        field_index: f,
        wavelength_index: w,
        result: task(f, &fields[f], w, wavelengths[w]),
    };
    let mut cancelled = options.cancel_requested || control.flag_raised();
    let mut tasks = Vec::with_capacity(total);
    if cancelled {
        warn!("{analyzer} cancelled before the first task");
        return QueryOutput {
            tasks,
            cancelled,
            degenerate: false,
        };
    }
    if options.parallel && control.is_passive() {
        let cancel = control.cancel;
        let results: Vec<Option<TaskOutput<T>>> = jobs
            .par_iter()
            .map(|job| {
                if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                    None
                } else {
                    Some(run(*job))
                }
            })
            .collect();
        cancelled = results.iter().any(Option::is_none);
        tasks.extend(results.into_iter().flatten());
    } else {
        for (done, job) in jobs.iter().enumerate() {
            if control.flag_raised() {
                cancelled = true;
                break;
            }
            tasks.push(run(*job));
            let percent = 100.0 * usize_to_f64(done + 1) / usize_to_f64(total);
            control.progress(
                percent,
                &format!("{analyzer}: field {} wavelength {} done", job.0, job.1),
            );
            if (done + 1) % options.yield_every == 0 {
                control.yield_now();
            }
        }
    }
    if cancelled {
        warn!("{analyzer} cancelled after {} of {total} tasks", tasks.len());
    }
    let degenerate = tasks
        .iter()
        .any(|t| matches!(t.result, Err(TraceError::DegenerateGeometry(_))));
    if degenerate {
        warn!("{analyzer}: degenerate geometry, results are incomplete");
    }
    QueryOutput {
        tasks,
        cancelled,
        degenerate,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::EngineConfig,
        micrometer, millimeter,
        surface::{Profile, Surface},
        system::Source,
    };
    use assert_matches::assert_matches;
    use std::cell::RefCell;

    fn system(fields: Vec<Field>) -> OpticalSystem {
        let surfaces = vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            Surface::stop(millimeter!(5.0), millimeter!(10.0)).unwrap(),
            Surface::new(SurfaceType::Lens, Profile::Plane, millimeter!(10.0)).unwrap(),
            Surface::image(),
        ];
        let sources = vec![
            Source::new(micrometer!(0.5876), true).unwrap(),
            Source::new(micrometer!(0.6563), false).unwrap(),
        ];
        OpticalSystem::new(surfaces, sources, fields, EngineConfig::default()).unwrap()
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", AnalyzerType::Psf), "PSF analysis");
        assert_eq!(format!("{:?}", AnalyzerType::Wavefront), "Wavefront");
    }
    #[test]
    fn options_default() {
        let options = AnalysisOptions::default();
        assert_eq!(options.ray_count, 51);
        assert_eq!(options.grid_size, 64);
        assert_eq!(options.pupil_pattern, PupilPattern::Annular);
        assert_eq!(options.pupil_mask, PupilMask::Circular);
        assert_eq!(options.yield_every, 1);
        assert!(!options.log_scale);
        assert!(options.validate(&system(vec![])).is_ok());
    }
    #[test]
    fn options_from_yaml() {
        let options = AnalysisOptions::from_yaml("ray_count: 21\npupil_pattern: grid\ngrid_size: 32\n").unwrap();
        assert_eq!(options.ray_count, 21);
        assert_eq!(options.pupil_pattern, PupilPattern::Grid);
        assert_eq!(options.grid_size, 32);
        assert_eq!(options.psf_oversampling, 4);
        assert_eq!(options.obscuration_ratio, 0.3);
        let annular = AnalysisOptions::from_yaml("pupil_mask: annular\nobscuration_ratio: 0.5\n").unwrap();
        assert_eq!(annular.pupil_mask, PupilMask::Annular);
        assert_eq!(annular.obscuration_ratio, 0.5);
        assert!(AnalysisOptions::from_yaml("rays: 3\n").is_err());
    }
    #[test]
    fn options_validate() {
        let system = system(vec![]);
        let mut options = AnalysisOptions {
            target_surface_index: Some(0),
            ..Default::default()
        };
        assert_matches!(options.validate(&system), Err(TraceError::InvalidSystem(_)));
        options.target_surface_index = Some(7);
        assert!(options.validate(&system).is_err());
        options.target_surface_index = Some(2);
        assert!(options.validate(&system).is_ok());
        assert_eq!(options.target_surface(&system), 2);
        options.grid_size = 2;
        assert!(options.validate(&system).is_err());
        options.grid_size = 16;
        options.obscuration_ratio = 1.0;
        assert!(options.validate(&system).is_err());
    }
    #[test]
    fn default_fields() {
        let fields = query_fields(&system(vec![]));
        assert_eq!(fields.len(), 1);
        assert!(fields[0].is_on_axis());
    }
    #[test]
    fn tasks_in_field_major_order() {
        let fields = vec![
            Field::angle(degree!(0.0), degree!(0.0)),
            Field::angle(degree!(0.0), degree!(1.0)),
        ];
        let system = system(fields);
        let progress = RefCell::new(Vec::new());
        let yields = RefCell::new(0);
        let mut control = QueryControl::new()
            .with_progress(|p, _| progress.borrow_mut().push(p))
            .with_yield_hook(|| *yields.borrow_mut() += 1);
        let options = AnalysisOptions {
            yield_every: 2,
            ..Default::default()
        };
        let output = run_tasks(AnalyzerType::Transverse, &system, &options, &mut control, |f, _, w, _| {
            Ok((f, w))
        });
        drop(control);
        let order: Vec<(usize, usize)> = output.successes().copied().collect();
        assert_eq!(order, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(progress.borrow().as_slice(), &[25.0, 50.0, 75.0, 100.0]);
        assert_eq!(*yields.borrow(), 2);
        assert!(!output.cancelled);
        assert_eq!(output.get(1, 0), Some(&Ok((1, 0))));
    }
    #[test]
    fn cancellation() {
        let system = system(vec![
            Field::angle(degree!(0.0), degree!(0.0)),
            Field::angle(degree!(0.0), degree!(1.0)),
        ]);
        let flag = AtomicBool::new(false);
        let mut control = QueryControl::new()
            .with_cancel_flag(&flag)
            .with_yield_hook(|| flag.store(true, Ordering::Relaxed));
        let output = run_tasks(
            AnalyzerType::Psf,
            &system,
            &AnalysisOptions::default(),
            &mut control,
            |f, _, w, _| Ok((f, w)),
        );
        assert!(output.cancelled);
        assert_eq!(output.tasks.len(), 1);
        let cancelled_at_entry = run_tasks(
            AnalyzerType::Psf,
            &system,
            &AnalysisOptions {
                cancel_requested: true,
                ..Default::default()
            },
            &mut QueryControl::new(),
            |f, _, w, _| Ok((f, w)),
        );
        assert!(cancelled_at_entry.cancelled);
        assert!(cancelled_at_entry.tasks.is_empty());
    }
    #[test]
    fn parallel_keeps_order_and_flags_degenerate() {
        let system = system(vec![
            Field::angle(degree!(0.0), degree!(0.0)),
            Field::angle(degree!(0.0), degree!(1.0)),
        ]);
        let options = AnalysisOptions {
            parallel: true,
            ..Default::default()
        };
        let output = run_tasks(
            AnalyzerType::Astigmatism,
            &system,
            &options,
            &mut QueryControl::new(),
            |f, _, w, _| {
                if f == 1 && w == 1 {
                    Err(TraceError::DegenerateGeometry("parallel rays".into()))
                } else {
                    Ok(f * 10 + w)
                }
            },
        );
        assert!(output.degenerate);
        assert_eq!(output.tasks.len(), 4);
        assert_eq!(output.successes().copied().collect::<Vec<_>>(), vec![0, 1, 10]);
    }
    #[test]
    fn warn_once() {
        testing_logger::setup();
        let guard = WarnOnce::default();
        guard.warn("first");
        guard.warn("second");
        assert!(guard.has_warned());
        crate::utils::test_helper::test_helper::check_warnings(vec!["first"]);
    }
}
