//! Aiming of pupil samples through the aperture stop
use log::warn;

use super::{Distribution, Fan, FanType, PupilMask, PupilSample};
use crate::{
    aiming::{AimState, PupilAimer},
    ray::Ray,
    tracer::{SurfaceHit, TracedRay},
    utils::usize_to_f64,
};

/// A pupil sample after aiming and tracing.
#[derive(Debug, Clone, PartialEq)]
pub struct SampledRay {
    /// pupil coordinate with updated vignetting flags
    pub sample: PupilSample,
    /// final state of the aimer. `None` if the sample was blocked by the pupil mask.
    pub aim_state: Option<AimState>,
    /// launch ray in front of the first surface
    pub launch: Option<Ray>,
    /// the traced ray (possibly partial)
    pub traced: Option<TracedRay>,
}
impl SampledRay {
    fn blocked(mut sample: PupilSample) -> Self {
        sample.is_vignetted = true;
        Self {
            sample,
            aim_state: None,
            launch: None,
            traced: None,
        }
    }
    /// Hit on the given surface, if the sample is not vignetted.
    #[must_use]
    pub fn hit(&self, surface_index: usize) -> Option<&SurfaceHit> {
        if self.sample.is_vignetted {
            return None;
        }
        self.traced.as_ref()?.hit(surface_index)
    }
    /// Returns true if the sample reached the target surface.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.sample.is_vignetted
    }
}

/// Aims and traces pupil samples of one field point.
#[derive(Debug, Clone)]
pub struct PupilSampler<'s, 'a> {
    aimer: &'s PupilAimer<'a>,
    target_surface: usize,
    mask: PupilMask,
    obscuration_ratio: f64,
}
impl<'s, 'a> PupilSampler<'s, 'a> {
    /// Creates a new [`PupilSampler`] tracing up to `target_surface` with a clear circular pupil.
    #[must_use]
    pub const fn new(aimer: &'s PupilAimer<'a>, target_surface: usize) -> Self {
        Self {
            aimer,
            target_surface,
            mask: PupilMask::Circular,
            obscuration_ratio: 0.0,
        }
    }
    /// Sets the pupil mask. The obscuration ratio is only used by [`PupilMask::Annular`].
    #[must_use]
    pub const fn with_mask(mut self, mask: PupilMask, obscuration_ratio: f64) -> Self {
        self.mask = mask;
        self.obscuration_ratio = obscuration_ratio;
        self
    }
    /// The aimer used by this sampler.
    #[must_use]
    pub const fn aimer(&self) -> &'s PupilAimer<'a> {
        self.aimer
    }
    /// Index of the surface the samples are traced to.
    #[must_use]
    pub const fn target_surface(&self) -> usize {
        self.target_surface
    }
    /// Aims and traces a single sample.
    #[must_use]
    pub fn sample(&self, sample: PupilSample) -> SampledRay {
        if sample.is_vignetted || !self.mask.transmits(sample.u, sample.v, self.obscuration_ratio) {
            return SampledRay::blocked(sample);
        }
        let aim = self.aimer.aim_normalized(sample.u, sample.v);
        let Some(launch) = aim.ray().cloned() else {
            let mut blocked = SampledRay::blocked(sample);
            blocked.aim_state = Some(aim.state());
            return blocked;
        };
        let traced = self.aimer.trace_to(&launch, self.target_surface);
        let mut sample = sample;
        sample.is_partial = aim.is_partial();
        sample.is_vignetted = !traced.is_complete();
        SampledRay {
            sample,
            aim_state: Some(aim.state()),
            launch: Some(launch),
            traced: Some(traced),
        }
    }
    /// Aims and traces all samples, keeping their order.
    #[must_use]
    pub fn sample_all(&self, samples: Vec<PupilSample>) -> Vec<SampledRay> {
        let rays: Vec<SampledRay> = samples.into_iter().map(|s| self.sample(s)).collect();
        let aimed = rays.iter().filter(|r| r.aim_state.is_some()).count();
        let fallbacks = rays.iter().filter(|r| r.sample.is_partial).count();
        if aimed > 0 && usize_to_f64(fallbacks) > 0.5 * usize_to_f64(aimed) {
            warn!("pupil aimer used the geometric fallback for {fallbacks} of {aimed} samples");
        }
        rays
    }
    /// Aims and traces the samples of a distribution.
    #[must_use]
    pub fn sample_distribution(&self, distribution: &dyn Distribution) -> Vec<SampledRay> {
        self.sample_all(distribution.generate())
    }
    /// Aims and traces a meridional or sagittal fan.
    #[must_use]
    pub fn fan(&self, fan_type: FanType, ray_count: usize) -> Vec<SampledRay> {
        self.sample_distribution(&Fan::new(fan_type, ray_count))
    }
}
