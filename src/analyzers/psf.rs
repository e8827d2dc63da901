//! Fraunhofer point spread function.
//!
//! The complex pupil `exp(i·2π·W)` of an OPD map (`W` in waves, zero amplitude on invalid cells) is zero padded by
//! the oversampling factor and transformed by a 2D FFT. Intensities are normalized to the peak of the unaberrated
//! PSF of the same effective pupil, so the peak of a normalized PSF is its Strehl ratio.
use std::f64::consts::PI;

use kahan::KahanSummator;
use log::debug;
use rustfft::num_complex::Complex;
use uom::si::f64::Length;

use super::{
    run_tasks,
    wavefront::{ReferenceSurface, WavefrontAnalyzer, WavefrontMap},
    AnalysisOptions, Analyzer, AnalyzerType, QueryControl, QueryOutput, WarnOnce,
};
use crate::{
    error::TraceResult,
    system::{Field, OpticalSystem},
    utils::{
        f64_to_usize,
        fft::{cyclic_shift, fft2_inplace, fftshift},
        math_utils::f64_round_to_isize,
        usize_to_f64,
    },
};

/// The PSF is fft-shifted if its peak lies within this fraction of the grid size from a corner.
pub const CORNER_FRACTION: f64 = 0.08;
/// Intensity threshold (fraction of the peak) of the centroid region.
pub const CENTROID_THRESHOLD: f64 = 0.3;
/// Floor of the logarithmic display relative to the peak.
const LOG_FLOOR: f64 = 1e-12;

/// Unit of the PSF pixel scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelUnit {
    /// image plane distance (focal systems)
    Micrometer,
    /// far field angle (afocal systems)
    Microradian,
}

/// Scalar metrics of a PSF.
#[derive(Debug, Clone, PartialEq)]
pub struct PsfMetrics {
    /// peak intensity (normalized to the unaberrated peak)
    pub peak: f64,
    /// sum over all finite pixels
    pub total_energy: f64,
    /// full width at half maximum along x (pixel unit)
    pub fwhm_x: f64,
    /// full width at half maximum along y (pixel unit)
    pub fwhm_y: f64,
    /// peak divided by the unaberrated peak
    pub strehl: f64,
    /// encircled energy as `(radius, fraction)` pairs around the grid center
    pub encircled_energy: Vec<(f64, f64)>,
    /// intensity centroid `(x, y)` in pixels before recentering
    pub centroid: (f64, f64),
}
impl PsfMetrics {
    fn undefined() -> Self {
        Self {
            peak: f64::NAN,
            total_energy: f64::NAN,
            fwhm_x: f64::NAN,
            fwhm_y: f64::NAN,
            strehl: f64::NAN,
            encircled_energy: Vec::new(),
            centroid: (f64::NAN, f64::NAN),
        }
    }
}

/// PSF of one field and wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct PsfResult {
    /// index into the field table
    pub field_index: usize,
    /// index into the source table
    pub wavelength_index: usize,
    /// wavelength (µm)
    pub wavelength_um: f64,
    /// grid dimension (pupil grid size × oversampling)
    pub size: usize,
    /// normalized intensities in row-major order, rows along y
    pub intensity: Vec<f64>,
    /// size of a pixel
    pub pixel_scale: f64,
    /// unit of [`Self::pixel_scale`] and of the FWHM values
    pub pixel_unit: PixelUnit,
    /// an fftshift was applied before recentering
    pub fft_shifted: bool,
    /// display flag carried over from the query
    pub log_scale: bool,
    /// scalar metrics
    pub metrics: PsfMetrics,
}
impl PsfResult {
    /// Intensity at column `x` and row `y`.
    #[must_use]
    pub fn at(&self, x: usize, y: usize) -> Option<f64> {
        if x >= self.size || y >= self.size {
            return None;
        }
        self.intensity.get(y * self.size + x).copied()
    }
    /// Returns true if the PSF carries no energy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.metrics.peak.is_finite()
    }
    /// Intensities rotated by a quarter turn to the left. The numerics are not affected.
    #[must_use]
    pub fn rotated_left(&self) -> Vec<f64> {
        rotate_left(&self.intensity, self.size)
    }
    /// Intensities in `log10` relative to the peak, floored at 10⁻¹².
    #[must_use]
    pub fn log_scaled(&self) -> Vec<f64> {
        log_scale(&self.intensity)
    }
    /// Grid prepared for display: rotated left and log scaled if requested by the query.
    #[must_use]
    pub fn display(&self) -> Vec<f64> {
        let rotated = self.rotated_left();
        if self.log_scale {
            log_scale(&rotated)
        } else {
            rotated
        }
    }
}

/// Rotates a row-major `n × n` grid by a quarter turn counterclockwise.
#[must_use]
pub fn rotate_left(data: &[f64], n: usize) -> Vec<f64> {
    if data.len() != n * n {
        return data.to_vec();
    }
    let mut rotated = vec![0.0; n * n];
    for row in 0..n {
        for col in 0..n {
            rotated[(n - 1 - col) * n + row] = data[row * n + col];
        }
    }
    rotated
}

fn log_scale(data: &[f64]) -> Vec<f64> {
    let peak = data
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0, f64::max);
    if peak <= 0.0 {
        return vec![f64::NAN; data.len()];
    }
    data.iter()
        .map(|v| (v / peak).max(LOG_FLOOR).log10())
        .collect()
}

/// Returns true if the pixel lies within the corner regions of the grid in both axes.
fn near_corner(row: usize, col: usize, n: usize) -> bool {
    let margin = CORNER_FRACTION * usize_to_f64(n);
    let near_edge = |i: usize| {
        let i = usize_to_f64(i);
        i < margin || i >= usize_to_f64(n) - margin
    };
    near_edge(row) && near_edge(col)
}

fn argmax(data: &[f64]) -> Option<(usize, f64)> {
    data.iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Intensity centroid `(x, y)` of the pixels at or above `threshold · peak`.
///
/// Pixel offsets are taken cyclically relative to the peak, so a spot wrapping around the grid edge stays connected.
fn centroid(data: &[f64], n: usize, peak_index: usize, peak: f64) -> (f64, f64) {
    let limit = CENTROID_THRESHOLD * peak;
    let size = usize_to_f64(n);
    let offset = |i: usize, reference: usize| {
        let d = usize_to_f64(i) - usize_to_f64(reference);
        if d >= 0.5 * size {
            d - size
        } else if d < -0.5 * size {
            d + size
        } else {
            d
        }
    };
    let (peak_row, peak_col) = (peak_index / n, peak_index % n);
    let selected: Vec<(usize, f64)> = data
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| *v >= limit)
        .collect();
    let weights: Vec<f64> = selected.iter().map(|(_, v)| *v).collect();
    let xs: Vec<f64> = selected
        .iter()
        .map(|(i, v)| offset(i % n, peak_col) * v)
        .collect();
    let ys: Vec<f64> = selected
        .iter()
        .map(|(i, v)| offset(i / n, peak_row) * v)
        .collect();
    let weight: f64 = weights.iter().kahan_sum().sum();
    let x: f64 = xs.iter().kahan_sum().sum();
    let y: f64 = ys.iter().kahan_sum().sum();
    (
        usize_to_f64(peak_col) + x / weight,
        usize_to_f64(peak_row) + y / weight,
    )
}

/// Full width at half maximum of a profile through its peak `center`, by linear interpolation.
fn fwhm(profile: &[f64], center: usize) -> f64 {
    let half = 0.5 * profile[center];
    let crossing = |inner: usize, outer: usize| {
        let (a, b) = (profile[inner], profile[outer]);
        let fraction = (a - half) / (a - b);
        usize_to_f64(inner) + fraction * (usize_to_f64(outer) - usize_to_f64(inner))
    };
    let left = (1..=center)
        .rev()
        .find(|i| profile[i - 1] < half)
        .map(|i| crossing(i, i - 1));
    let right = (center..profile.len().saturating_sub(1))
        .find(|i| profile[i + 1] < half)
        .map(|i| crossing(i, i + 1));
    match (left, right) {
        (Some(l), Some(r)) => r - l,
        _ => f64::NAN,
    }
}

/// Encircled energy around the pixel `(center, center)` in rings of one pixel.
fn encircled_energy(data: &[f64], n: usize, center: usize) -> Vec<f64> {
    let c = usize_to_f64(center);
    let ring_of = |index: usize| {
        let dx = usize_to_f64(index % n) - c;
        let dy = usize_to_f64(index / n) - c;
        // truncation is intended: ring k holds radii in [k, k+1)
        f64_to_usize(dx.hypot(dy))
    };
    let rings = (0..data.len()).map(ring_of).max().map_or(0, |r| r + 1);
    let mut ring_energy = vec![Vec::new(); rings];
    for (index, value) in data.iter().enumerate().filter(|(_, v)| v.is_finite()) {
        ring_energy[ring_of(index)].push(*value);
    }
    let ring_sums: Vec<f64> = ring_energy
        .iter()
        .map(|values| values.iter().kahan_sum().sum())
        .collect();
    let total: f64 = ring_sums.iter().kahan_sum().sum();
    (0..rings)
        .map(|k| {
            let inside: f64 = ring_sums[..=k].iter().kahan_sum().sum();
            inside / total
        })
        .collect()
}

/// Computes the PSF of an OPD map.
///
/// # Errors
///
/// This function returns an error if the FFT buffer cannot be processed.
pub fn psf_from_map(
    map: &WavefrontMap,
    oversampling: usize,
    log_display: bool,
) -> TraceResult<PsfResult> {
    let g = map.grid.size;
    let n = g * oversampling.max(1);
    let wavelength_mm = map.wavelength_um * 1e-3;
    let (pixel_scale, pixel_unit) = match map.reference {
        ReferenceSurface::Sphere { radius_mm } => (
            wavelength_mm * radius_mm / (usize_to_f64(oversampling.max(1)) * 2.0 * map.exit_pupil_radius_mm)
                * 1e3,
            PixelUnit::Micrometer,
        ),
        ReferenceSurface::Plane => (
            wavelength_mm / (usize_to_f64(oversampling.max(1)) * 2.0 * map.exit_pupil_radius_mm) * 1e6,
            PixelUnit::Microradian,
        ),
    };
    let mut result = PsfResult {
        field_index: map.field_index,
        wavelength_index: map.wavelength_index,
        wavelength_um: map.wavelength_um,
        size: n,
        intensity: vec![0.0; n * n],
        pixel_scale,
        pixel_unit,
        fft_shifted: false,
        log_scale: log_display,
        metrics: PsfMetrics::undefined(),
    };
    let mut pupil = vec![Complex::new(0.0, 0.0); n * n];
    let mut transmitted = 0usize;
    for (index, opd) in map.opd_waves.iter().enumerate() {
        if opd.is_finite() {
            let (row, col) = (index / g, index % g);
            pupil[row * n + col] = Complex::from_polar(1.0, 2.0 * PI * opd);
            transmitted += 1;
        }
    }
    if transmitted == 0 {
        debug!("empty pupil, returning an undefined PSF");
        return Ok(result);
    }
    fft2_inplace(&mut pupil, n)?;
    // the unaberrated PSF of the same pupil peaks at (Σ amplitude)²
    let ideal_peak = usize_to_f64(transmitted).powi(2);
    let mut intensity: Vec<f64> = pupil.iter().map(|z| z.norm_sqr() / ideal_peak).collect();
    let Some((mut peak_index, peak)) = argmax(&intensity) else {
        return Ok(result);
    };
    if peak <= 0.0 {
        return Ok(result);
    }
    if near_corner(peak_index / n, peak_index % n, n) {
        fftshift(&mut intensity, n);
        result.fft_shifted = true;
        peak_index = argmax(&intensity).map_or(peak_index, |(i, _)| i);
    }
    let (cx, cy) = centroid(&intensity, n, peak_index, peak);
    let shift = |c: f64| {
        let target = isize::try_from(n / 2).unwrap_or(0);
        let n = isize::try_from(n).unwrap_or(1);
        usize::try_from((target - f64_round_to_isize(c)).rem_euclid(n)).unwrap_or(0)
    };
    cyclic_shift(&mut intensity, n, shift(cy), shift(cx));
    let (peak_index, peak) = argmax(&intensity).unwrap_or((0, peak));
    let (peak_row, peak_col) = (peak_index / n, peak_index % n);
    let row: Vec<f64> = intensity[peak_row * n..(peak_row + 1) * n].to_vec();
    let column: Vec<f64> = (0..n).map(|r| intensity[r * n + peak_col]).collect();
    let total_energy: f64 = intensity
        .iter()
        .filter(|v| v.is_finite())
        .kahan_sum()
        .sum();
    let ee = encircled_energy(&intensity, n, n / 2);
    result.metrics = PsfMetrics {
        peak,
        total_energy,
        fwhm_x: fwhm(&row, peak_col) * pixel_scale,
        fwhm_y: fwhm(&column, peak_row) * pixel_scale,
        strehl: peak,
        encircled_energy: ee
            .into_iter()
            .enumerate()
            .map(|(k, fraction)| (usize_to_f64(k + 1) * pixel_scale, fraction))
            .collect(),
        centroid: (cx, cy),
    };
    result.intensity = intensity;
    Ok(result)
}

/// Analyzer for point spread functions.
#[derive(Debug, Clone)]
pub struct PsfAnalyzer<'a> {
    wavefront: WavefrontAnalyzer<'a>,
    system: &'a OpticalSystem,
}
impl<'a> PsfAnalyzer<'a> {
    /// Creates a new [`PsfAnalyzer`].
    ///
    /// # Errors
    ///
    /// This function returns an error if the options are not valid for the system.
    pub fn new(system: &'a OpticalSystem, options: AnalysisOptions) -> TraceResult<Self> {
        Ok(Self {
            wavefront: WavefrontAnalyzer::new(system, options)?,
            system,
        })
    }
    /// PSF of a single field.
    ///
    /// # Errors
    ///
    /// This function returns an error if the OPD map cannot be computed.
    pub fn psf(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
    ) -> TraceResult<PsfResult> {
        self.psf_with_guard(field_index, field, wavelength_index, wavelength, &WarnOnce::default())
    }
    fn psf_with_guard(
        &self,
        field_index: usize,
        field: &Field,
        wavelength_index: usize,
        wavelength: Length,
        guard: &WarnOnce,
    ) -> TraceResult<PsfResult> {
        let map = self
            .wavefront
            .map_with_guard(field_index, field, wavelength_index, wavelength, guard)?;
        self.psf_of_map(&map)
    }
    /// PSF of a given OPD map with the oversampling of the query.
    ///
    /// # Errors
    ///
    /// This function returns an error if the FFT fails.
    pub fn psf_of_map(&self, map: &WavefrontMap) -> TraceResult<PsfResult> {
        let options = self.wavefront.options();
        psf_from_map(map, options.psf_oversampling, options.log_scale)
    }
}
impl Analyzer for PsfAnalyzer<'_> {
    type Output = PsfResult;
    fn analyzer_type(&self) -> AnalyzerType {
        AnalyzerType::Psf
    }
    fn analyze(&self, control: &mut QueryControl<'_>) -> TraceResult<QueryOutput<PsfResult>> {
        let options = self.wavefront.options();
        options.validate(self.system)?;
        let guard = WarnOnce::default();
        Ok(run_tasks(
            self.analyzer_type(),
            self.system,
            options,
            control,
            |f, field, w, wavelength| self.psf_with_guard(f, field, w, wavelength, &guard),
        ))
    }
}
