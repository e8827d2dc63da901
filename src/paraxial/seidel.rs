//! Third-order (Seidel) aberration sums and primary chromatic aberrations.
use std::ops::AddAssign;

use log::info;
use uom::si::{f64::Length, length::micrometer};

use super::{afocal::afocal_rays, AfocalData, ParaxialSystem, ParaxialTrace};
use crate::{
    error::{TraceError, TraceResult},
    micrometer,
    refractive_index::{LAMBDA_C_UM, LAMBDA_F_UM},
    surface::SurfaceType,
    system::{Field, OpticalSystem},
};

/// Below this value of the marginal refraction invariant the distortion term is evaluated in closed form.
const REFRACTION_INVARIANT_LIMIT: f64 = 1e-12;

/// Seidel sums `S_I … S_V`, the Petzval sum and the primary chromatic aberrations.
///
/// `field_curvature` is `S_IV = S_III + P`, where `P` is the Petzval sum, such that `S_IV − P = S_III`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeidelTerms {
    /// spherical aberration `S_I`
    pub spherical: f64,
    /// coma `S_II`
    pub coma: f64,
    /// astigmatism `S_III`
    pub astigmatism: f64,
    /// field curvature `S_IV`
    pub field_curvature: f64,
    /// distortion `S_V`
    pub distortion: f64,
    /// Petzval sum `P = Σ H²·φ/(n·n')`
    pub petzval: f64,
    /// longitudinal chromatic aberration
    pub axial_color: f64,
    /// transverse chromatic aberration
    pub lateral_color: f64,
}
impl SeidelTerms {
    /// Returns all terms multiplied by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            spherical: self.spherical * factor,
            coma: self.coma * factor,
            astigmatism: self.astigmatism * factor,
            field_curvature: self.field_curvature * factor,
            distortion: self.distortion * factor,
            petzval: self.petzval * factor,
            axial_color: self.axial_color * factor,
            lateral_color: self.lateral_color * factor,
        }
    }
    /// Returns true if all terms are finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        [
            self.spherical,
            self.coma,
            self.astigmatism,
            self.field_curvature,
            self.distortion,
            self.petzval,
            self.axial_color,
            self.lateral_color,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}
impl AddAssign for SeidelTerms {
    fn add_assign(&mut self, rhs: Self) {
        self.spherical += rhs.spherical;
        self.coma += rhs.coma;
        self.astigmatism += rhs.astigmatism;
        self.field_curvature += rhs.field_curvature;
        self.distortion += rhs.distortion;
        self.petzval += rhs.petzval;
        self.axial_color += rhs.axial_color;
        self.lateral_color += rhs.lateral_color;
    }
}

/// Contribution of a single surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceContribution {
    /// index of the surface
    pub surface_index: usize,
    /// contributed terms
    pub terms: SeidelTerms,
}

/// Result of a Seidel analysis for one field and wavelength.
#[derive(Debug, Clone, PartialEq)]
pub struct SeidelReport {
    /// wavelength of the analysis
    pub wavelength: Length,
    /// per surface contributions (refracting and reflecting surfaces only)
    pub surfaces: Vec<SurfaceContribution>,
    /// sums over all surfaces
    pub sums: SeidelTerms,
    /// Lagrange invariant `H = α·ȳ − ᾱ·y`
    pub lagrange_invariant: f64,
    /// reference focal length (mm), infinite for afocal systems
    pub reference_focal_length_mm: f64,
    /// wavelengths (µm) used for the index difference of the chromatic terms
    pub chromatic_pair_um: (f64, f64),
    /// magnifications of an afocal system
    pub afocal: Option<AfocalData>,
}
impl SeidelReport {
    /// Sums in units of the reference focal length (or unnormalized if no finite focal length exists).
    #[must_use]
    pub fn normalized_sums(&self) -> SeidelTerms {
        let f = self.reference_focal_length_mm;
        if f.is_finite() && f != 0.0 {
            self.sums.scaled(1.0 / f)
        } else {
            self.sums
        }
    }
    /// Returns true if the report belongs to an afocal system.
    #[must_use]
    pub const fn is_afocal(&self) -> bool {
        self.afocal.is_some()
    }
}

/// Shortest and longest source wavelength, or the F / C lines if the system has a single wavelength.
fn chromatic_pair(system: &OpticalSystem) -> (Length, Length) {
    let wavelengths = system.wavelengths();
    let shortest = wavelengths.iter().copied().reduce(|a, b| if b < a { b } else { a });
    let longest = wavelengths.iter().copied().reduce(|a, b| if b > a { b } else { a });
    match (shortest, longest) {
        (Some(s), Some(l)) if s < l => (s, l),
        _ => (micrometer!(LAMBDA_F_UM), micrometer!(LAMBDA_C_UM)),
    }
}

/// Computes the Seidel sums of a system for one field at the given wavelength.
///
/// Focal systems use a marginal ray through the edge of the stop and the chief ray of the field. For afocal systems
/// the rays are set up by [`afocal_rays`]. The chromatic terms use the index difference between the shortest and
/// longest source wavelength.
///
/// # Errors
///
/// This function returns an error if the paraxial rays cannot be traced or the sums are not finite.
pub fn seidel(system: &OpticalSystem, field: &Field, wavelength: Length) -> TraceResult<SeidelReport> {
    let paraxial = ParaxialSystem::new(system, wavelength)?;
    let (marginal, chief, afocal) = if paraxial.is_afocal()? {
        let (marginal, chief, data) = afocal_rays(&paraxial, field)?;
        (marginal, chief, Some(data))
    } else {
        (paraxial.marginal_ray()?, paraxial.chief_ray(field)?, None)
    };
    let (short, long) = chromatic_pair(system);
    let n_short = ParaxialSystem::new(system, short)?;
    let n_long = ParaxialSystem::new(system, long)?;
    let dispersion: Vec<f64> = n_short
        .indices()
        .iter()
        .zip(n_long.indices())
        .map(|(s, l)| s - l)
        .collect();
    let lagrange_invariant = lagrange_invariant(&marginal, &chief)?;
    let mut surfaces = Vec::new();
    let mut sums = SeidelTerms::default();
    for (m, c) in marginal.surfaces().iter().zip(chief.surfaces()) {
        let surface_type = system.surfaces()[m.surface_index].surface_type();
        if !matches!(surface_type, SurfaceType::Lens | SurfaceType::Mirror) {
            continue;
        }
        let dn_before = dispersion[m.surface_index - 1];
        let dn_after = dispersion[m.surface_index];
        let terms = surface_terms(m, c, lagrange_invariant, dn_before, dn_after);
        sums += terms;
        surfaces.push(SurfaceContribution {
            surface_index: m.surface_index,
            terms,
        });
    }
    if !sums.is_finite() {
        return Err(TraceError::NumericalFailure(
            "Seidel sums are not finite".into(),
        ));
    }
    let reference_focal_length_mm = if afocal.is_some() {
        f64::INFINITY
    } else {
        1.0 / paraxial.power()?
    };
    info!(
        "Seidel sums at {:.4} µm: S_I={:.3e} S_II={:.3e} S_III={:.3e} S_IV={:.3e} S_V={:.3e}",
        wavelength.get::<micrometer>(),
        sums.spherical,
        sums.coma,
        sums.astigmatism,
        sums.field_curvature,
        sums.distortion
    );
    Ok(SeidelReport {
        wavelength,
        surfaces,
        sums,
        lagrange_invariant,
        reference_focal_length_mm,
        chromatic_pair_um: (short.get::<micrometer>(), long.get::<micrometer>()),
        afocal,
    })
}

fn lagrange_invariant(marginal: &ParaxialTrace, chief: &ParaxialTrace) -> TraceResult<f64> {
    match (marginal.first(), chief.first()) {
        (Some(m), Some(c)) => Ok(m.alpha_before * c.y - c.alpha_before * m.y),
        _ => Err(TraceError::InvalidSystem(
            "system has no surface between object and image".into(),
        )),
    }
}

fn surface_terms(
    m: &super::ParaxialSurface,
    c: &super::ParaxialSurface,
    h: f64,
    dn_before: f64,
    dn_after: f64,
) -> SeidelTerms {
    let n = m.n_before;
    let n_after = m.n_after;
    let y = m.y;
    let curv = m.curvature;
    let a = (n * y).mul_add(curv, -m.alpha_before);
    let a_bar = (n * c.y).mul_add(curv, -c.alpha_before);
    let delta = m.alpha_after / (n_after * n_after) - m.alpha_before / (n * n);
    let spherical = a * a * y * delta;
    let coma = a * a_bar * y * delta;
    let astigmatism = a_bar * a_bar * y * delta;
    let petzval = h * h * m.power() / (n * n_after);
    let field_curvature = astigmatism + petzval;
    let distortion = if a.abs() > REFRACTION_INVARIANT_LIMIT {
        a_bar / a * field_curvature
    } else {
        let delta_inv_sq = 1.0 / (n_after * n_after) - 1.0 / (n * n);
        let delta_inv = 1.0 / n_after - 1.0 / n;
        (a_bar * curv * c.y * delta_inv).mul_add(a_bar.mul_add(y, h), -a_bar.powi(3) * y * delta_inv_sq)
    };
    let delta_dispersion = dn_after / n_after - dn_before / n;
    SeidelTerms {
        spherical,
        coma,
        astigmatism,
        field_curvature,
        distortion,
        petzval,
        axial_color: a * y * delta_dispersion,
        lateral_color: a_bar * y * delta_dispersion,
    }
}
