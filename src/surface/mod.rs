#![warn(missing_docs)]
//! Surfaces of a sequential optical system.
//!
//! A [`Surface`] combines a [`SurfaceType`], a geometric [`Profile`], the axial distance to the following surface,
//! the [`Material`] *behind* the surface and an optional clear aperture.
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum::EnumIter;
use uom::si::{f64::Length, length::millimeter};

pub mod coord_break;
pub mod profile;
pub mod record;

pub use coord_break::{CoordBreak, CoordBreakOrder};
pub use profile::{IntersectionTolerance, Profile, SurfaceIntersection};
pub use record::SurfaceRecord;

use crate::{
    error::{TraceError, TraceResult},
    refractive_index::{GlassCatalog, RefractiveIndexType},
};

/// Role of a surface within the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, Default)]
pub enum SurfaceType {
    /// object plane (always the first surface)
    Object,
    /// refracting surface
    #[default]
    Lens,
    /// reflecting surface
    Mirror,
    /// aperture stop
    Stop,
    /// image plane (always the last surface)
    Image,
    /// coordinate break, never intersected by rays
    CoordBreak,
}
impl Display for SurfaceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::Object => "object",
            Self::Lens => "lens",
            Self::Mirror => "mirror",
            Self::Stop => "stop",
            Self::Image => "image",
            Self::CoordBreak => "coordinate break",
        };
        write!(f, "{msg}")
    }
}

/// Optical medium following a surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Material {
    /// air, approximated with `n = 1`
    #[default]
    Air,
    /// explicit refractive index model
    Model(RefractiveIndexType),
    /// glass referenced by name. Must be resolved against a [`GlassCatalog`] before tracing.
    Glass(String),
}
impl Material {
    /// Returns the refractive index of the material at the given wavelength.
    ///
    /// # Errors
    ///
    /// This function returns an error if the material is an unresolved catalog glass or the model fails.
    pub fn refractive_index(&self, wavelength: Length) -> TraceResult<f64> {
        match self {
            Self::Air => Ok(1.0),
            Self::Model(model) => model.get_refractive_index(wavelength),
            Self::Glass(name) => Err(TraceError::InvalidSystem(format!(
                "glass {name} has not been resolved"
            ))),
        }
    }
    /// Replaces a named glass by the refractive index model of the catalog.
    ///
    /// # Errors
    ///
    /// This function returns an error if the glass is not part of the catalog.
    pub fn resolve(&mut self, catalog: &GlassCatalog) -> TraceResult<()> {
        if let Self::Glass(name) = self {
            *self = Self::Model(catalog.refractive_index(name)?);
        }
        Ok(())
    }
}

/// A single surface of a sequential system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    surface_type: SurfaceType,
    profile: Profile,
    thickness: Length,
    material: Material,
    semi_diameter: Option<Length>,
    coord_break: Option<CoordBreak>,
}
impl Surface {
    /// Creates a new [`Surface`] followed by air and without aperture.
    ///
    /// # Errors
    ///
    /// This function returns an error if the thickness is `NaN`.
    pub fn new(surface_type: SurfaceType, profile: Profile, thickness: Length) -> TraceResult<Self> {
        if thickness.is_nan() {
            return Err(TraceError::InvalidSystem("thickness must not be NaN".into()));
        }
        Ok(Self {
            surface_type,
            profile,
            thickness,
            material: Material::Air,
            semi_diameter: None,
            coord_break: None,
        })
    }
    /// Creates an object surface. An infinite thickness places the object at infinity.
    ///
    /// # Errors
    ///
    /// This function returns an error if the thickness is `NaN`.
    pub fn object(thickness: Length) -> TraceResult<Self> {
        Self::new(SurfaceType::Object, Profile::Plane, thickness)
    }
    /// Creates a flat image surface.
    #[must_use]
    pub fn image() -> Self {
        Self {
            surface_type: SurfaceType::Image,
            profile: Profile::Plane,
            thickness: Length::new::<millimeter>(0.0),
            material: Material::Air,
            semi_diameter: None,
            coord_break: None,
        }
    }
    /// Creates a flat aperture stop.
    ///
    /// # Errors
    ///
    /// This function returns an error if the semi diameter is not positive or the thickness is `NaN`.
    pub fn stop(semi_diameter: Length, thickness: Length) -> TraceResult<Self> {
        Self::new(SurfaceType::Stop, Profile::Plane, thickness)?.with_semi_diameter(semi_diameter)
    }
    /// Creates a refracting surface followed by the given material.
    ///
    /// # Errors
    ///
    /// This function returns an error if the thickness is `NaN`.
    pub fn lens(profile: Profile, thickness: Length, material: Material) -> TraceResult<Self> {
        Ok(Self::new(SurfaceType::Lens, profile, thickness)?.with_material(material))
    }
    /// Creates a mirror. The thickness following a mirror is negative for a folded system.
    ///
    /// # Errors
    ///
    /// This function returns an error if the thickness is `NaN`.
    pub fn mirror(profile: Profile, thickness: Length) -> TraceResult<Self> {
        Self::new(SurfaceType::Mirror, profile, thickness)
    }
    /// Creates a coordinate break.
    ///
    /// # Errors
    ///
    /// This function returns an error if the thickness is `NaN`.
    pub fn coordinate_break(coord_break: CoordBreak, thickness: Length) -> TraceResult<Self> {
        let mut s = Self::new(SurfaceType::CoordBreak, Profile::Plane, thickness)?;
        s.coord_break = Some(coord_break);
        Ok(s)
    }
    /// Sets the material behind this surface.
    #[must_use]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }
    /// Sets the clear aperture radius.
    ///
    /// # Errors
    ///
    /// This function returns an error if the semi diameter is not positive or `NaN`.
    pub fn with_semi_diameter(mut self, semi_diameter: Length) -> TraceResult<Self> {
        if semi_diameter.is_nan() || semi_diameter.get::<millimeter>() <= 0.0 {
            return Err(TraceError::InvalidSystem(
                "semi diameter must be positive".into(),
            ));
        }
        self.semi_diameter = Some(semi_diameter);
        Ok(self)
    }
    /// Returns the type of this surface.
    #[must_use]
    pub const fn surface_type(&self) -> SurfaceType {
        self.surface_type
    }
    /// Changes the type of this surface (e.g. to promote a lens surface to the aperture stop).
    pub fn set_surface_type(&mut self, surface_type: SurfaceType) {
        self.surface_type = surface_type;
    }
    /// Returns the profile of this surface.
    #[must_use]
    pub const fn profile(&self) -> &Profile {
        &self.profile
    }
    /// Axial distance to the following surface.
    #[must_use]
    pub const fn thickness(&self) -> Length {
        self.thickness
    }
    /// Axial distance to the following surface in mm.
    #[must_use]
    pub fn thickness_mm(&self) -> f64 {
        self.thickness.get::<millimeter>()
    }
    /// Material behind this surface.
    #[must_use]
    pub const fn material(&self) -> &Material {
        &self.material
    }
    /// Mutable access to the material, e.g. for resolving catalog glasses.
    pub fn material_mut(&mut self) -> &mut Material {
        &mut self.material
    }
    /// Clear aperture radius.
    #[must_use]
    pub const fn semi_diameter(&self) -> Option<Length> {
        self.semi_diameter
    }
    /// Clear aperture radius in mm.
    #[must_use]
    pub fn semi_diameter_mm(&self) -> Option<f64> {
        self.semi_diameter.map(|sd| sd.get::<millimeter>())
    }
    /// Coordinate break parameters (only set for [`SurfaceType::CoordBreak`]).
    #[must_use]
    pub const fn coord_break(&self) -> Option<&CoordBreak> {
        self.coord_break.as_ref()
    }
    /// Returns true for surfaces a ray physically interacts with.
    #[must_use]
    pub const fn is_physical(&self) -> bool {
        !matches!(
            self.surface_type,
            SurfaceType::Object | SurfaceType::Image | SurfaceType::CoordBreak
        )
    }
}
