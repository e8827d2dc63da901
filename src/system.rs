#![warn(missing_docs)]
//! Validated sequential optical system.
//!
//! An [`OpticalSystem`] is an immutable snapshot of the surface, source and field tables. It is created once per
//! query by the caller and borrowed by all analyzers.
use log::info;
use serde::{Deserialize, Serialize};
use uom::si::{
    angle::degree,
    f64::{Angle, Length},
    length::micrometer,
};

use crate::{
    config::EngineConfig,
    error::{TraceError, TraceResult},
    frames::SystemFrames,
    micrometer, millimeter,
    refractive_index::GlassCatalog,
    surface::{Surface, SurfaceRecord, SurfaceType},
};

/// A source wavelength.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Source {
    wavelength: Length,
    is_primary: bool,
}
impl Source {
    /// Creates a new [`Source`].
    ///
    /// # Errors
    ///
    /// This function returns an error if the wavelength is not positive and finite.
    pub fn new(wavelength: Length, is_primary: bool) -> TraceResult<Self> {
        if !wavelength.is_finite() || wavelength.get::<micrometer>() <= 0.0 {
            return Err(TraceError::InvalidSystem(
                "wavelength must be positive and finite".into(),
            ));
        }
        Ok(Self {
            wavelength,
            is_primary,
        })
    }
    /// Wavelength of this source.
    #[must_use]
    pub const fn wavelength(&self) -> Length {
        self.wavelength
    }
    /// Returns true if this source defines the primary wavelength.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.is_primary
    }
}

/// Kind of a field point as used in field tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// field angle in degrees
    Angle,
    /// object height in mm
    Height,
    /// rectangular object height in mm, treated like [`FieldKind::Height`]
    Rectangle,
}

/// Location of a field point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FieldSpec {
    /// field angles about the y axis (x) and the x axis (y)
    Angle {
        /// angle in the x-z plane
        x: Angle,
        /// angle in the y-z plane
        y: Angle,
    },
    /// object height
    Height {
        /// height along x
        x: Length,
        /// height along y
        y: Length,
    },
    /// rectangular object point
    Rectangle {
        /// height along x
        x: Length,
        /// height along y
        y: Length,
    },
}

/// A field point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Field {
    spec: FieldSpec,
    zero_aberration_position: Option<Length>,
}
impl Field {
    /// Creates a field given by angles.
    #[must_use]
    pub const fn angle(x: Angle, y: Angle) -> Self {
        Self {
            spec: FieldSpec::Angle { x, y },
            zero_aberration_position: None,
        }
    }
    /// Creates a field given by an object height.
    #[must_use]
    pub const fn height(x: Length, y: Length) -> Self {
        Self {
            spec: FieldSpec::Height { x, y },
            zero_aberration_position: None,
        }
    }
    /// Sets the bulk offset that downstream consumers treat as already applied.
    #[must_use]
    pub const fn with_zero_aberration_position(mut self, position: Length) -> Self {
        self.zero_aberration_position = Some(position);
        self
    }
    /// Field location.
    #[must_use]
    pub const fn spec(&self) -> &FieldSpec {
        &self.spec
    }
    /// Bulk offset of this field, passed through untouched.
    #[must_use]
    pub const fn zero_aberration_position(&self) -> Option<Length> {
        self.zero_aberration_position
    }
    /// Returns true if both field coordinates are zero.
    #[must_use]
    pub fn is_on_axis(&self) -> bool {
        match self.spec {
            FieldSpec::Angle { x, y } => x.value == 0.0 && y.value == 0.0,
            FieldSpec::Height { x, y } | FieldSpec::Rectangle { x, y } => {
                x.value == 0.0 && y.value == 0.0
            }
        }
    }
}

/// Source table row (wavelength in µm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceRecord {
    /// wavelength in µm
    pub wavelength: f64,
    /// primary flag
    #[serde(default)]
    pub is_primary: bool,
}
/// Object table row (angles in degrees, heights in mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRecord {
    /// kind of the field
    pub kind: FieldKind,
    /// x coordinate
    #[serde(default)]
    pub x: f64,
    /// y coordinate
    #[serde(default)]
    pub y: f64,
    /// bulk offset in mm
    #[serde(default)]
    pub zero_aberration_position: Option<f64>,
}
impl From<FieldRecord> for Field {
    fn from(record: FieldRecord) -> Self {
        let spec = match record.kind {
            FieldKind::Angle => FieldSpec::Angle {
                x: Angle::new::<degree>(record.x),
                y: Angle::new::<degree>(record.y),
            },
            FieldKind::Height => FieldSpec::Height {
                x: millimeter!(record.x),
                y: millimeter!(record.y),
            },
            FieldKind::Rectangle => FieldSpec::Rectangle {
                x: millimeter!(record.x),
                y: millimeter!(record.y),
            },
        };
        Self {
            spec,
            zero_aberration_position: record.zero_aberration_position.map(|z| millimeter!(z)),
        }
    }
}

/// Serialized form of a complete system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SystemDocument {
    /// surface table
    pub surfaces: Vec<SurfaceRecord>,
    /// source table
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
    /// object table
    #[serde(default)]
    pub fields: Vec<FieldRecord>,
    /// engine configuration
    #[serde(default)]
    pub config: EngineConfig,
}

/// A validated sequential optical system.
#[derive(Debug, Clone, PartialEq)]
pub struct OpticalSystem {
    surfaces: Vec<Surface>,
    sources: Vec<Source>,
    fields: Vec<Field>,
    frames: SystemFrames,
    stop_index: usize,
    primary_index: usize,
    config: EngineConfig,
}
impl OpticalSystem {
    /// Creates and validates a new [`OpticalSystem`].
    ///
    /// If no surface is declared as stop, the physical surface with the smallest semi diameter becomes the stop. An
    /// empty source table is replaced by the primary wavelength of the configuration. If no source is marked as
    /// primary, the first one is used.
    ///
    /// # Errors
    ///
    /// This function returns [`TraceError::InvalidSystem`] if
    ///  - there are fewer than two surfaces or the object / image surfaces are misplaced
    ///  - more than one stop is declared or no stop can be determined
    ///  - more than one source is marked as primary
    ///  - a refractive index cannot be evaluated at one of the source wavelengths
    pub fn new(
        surfaces: Vec<Surface>,
        sources: Vec<Source>,
        fields: Vec<Field>,
        config: EngineConfig,
    ) -> TraceResult<Self> {
        config.validate()?;
        if surfaces.len() < 2 {
            return Err(TraceError::InvalidSystem(
                "system needs at least an object and an image surface".into(),
            ));
        }
        let last = surfaces.len() - 1;
        for (index, surface) in surfaces.iter().enumerate() {
            let expected_object = index == 0;
            let expected_image = index == last;
            if (surface.surface_type() == SurfaceType::Object) != expected_object {
                return Err(TraceError::InvalidSystem(format!(
                    "surface {index}: the object surface must be the first surface"
                )));
            }
            if (surface.surface_type() == SurfaceType::Image) != expected_image {
                return Err(TraceError::InvalidSystem(format!(
                    "surface {index}: the image surface must be the last surface"
                )));
            }
        }
        let stop_index = resolve_stop(&surfaces)?;
        let (sources, primary_index) = resolve_sources(sources, &config)?;
        let frames = SystemFrames::new(&surfaces)?;
        let system = Self {
            surfaces,
            sources,
            fields,
            frames,
            stop_index,
            primary_index,
            config,
        };
        for source in &system.sources {
            system.medium_indices(source.wavelength())?;
        }
        Ok(system)
    }
    /// Creates a new [`OpticalSystem`] after resolving all catalog glasses.
    ///
    /// # Errors
    ///
    /// This function returns an error if a glass is missing in the catalog or the system is invalid.
    pub fn with_catalog(
        mut surfaces: Vec<Surface>,
        sources: Vec<Source>,
        fields: Vec<Field>,
        config: EngineConfig,
        catalog: &GlassCatalog,
    ) -> TraceResult<Self> {
        for surface in &mut surfaces {
            surface.material_mut().resolve(catalog)?;
        }
        Self::new(surfaces, sources, fields, config)
    }
    /// Creates a system from a [`SystemDocument`].
    ///
    /// # Errors
    ///
    /// This function returns an error if any table row is invalid.
    pub fn from_document(
        document: SystemDocument,
        catalog: Option<&GlassCatalog>,
    ) -> TraceResult<Self> {
        let surfaces = document
            .surfaces
            .into_iter()
            .map(Surface::try_from)
            .collect::<TraceResult<Vec<_>>>()?;
        let sources = document
            .sources
            .iter()
            .map(|s| Source::new(micrometer!(s.wavelength), s.is_primary))
            .collect::<TraceResult<Vec<_>>>()?;
        let fields = document.fields.into_iter().map(Field::from).collect();
        match catalog {
            Some(catalog) => Self::with_catalog(surfaces, sources, fields, document.config, catalog),
            None => Self::new(surfaces, sources, fields, document.config),
        }
    }
    /// Parses a YAML [`SystemDocument`]. Unknown fields are rejected.
    ///
    /// # Errors
    ///
    /// This function returns an error if the document cannot be parsed or describes an invalid system.
    pub fn from_yaml(yaml: &str, catalog: Option<&GlassCatalog>) -> TraceResult<Self> {
        let document: SystemDocument = serde_yaml::from_str(yaml)?;
        let system = Self::from_document(document, catalog)?;
        info!(
            "loaded system with {} surfaces, {} sources and {} fields",
            system.surfaces.len(),
            system.sources.len(),
            system.fields.len()
        );
        Ok(system)
    }
    /// All surfaces.
    #[must_use]
    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }
    /// Surface with the given index.
    #[must_use]
    pub fn surface(&self, index: usize) -> Option<&Surface> {
        self.surfaces.get(index)
    }
    /// All sources.
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }
    /// All fields.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
    /// Local frames of all surfaces.
    #[must_use]
    pub const fn frames(&self) -> &SystemFrames {
        &self.frames
    }
    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }
    /// Index of the aperture stop.
    #[must_use]
    pub const fn stop_index(&self) -> usize {
        self.stop_index
    }
    /// Index of the image surface.
    #[must_use]
    pub fn image_index(&self) -> usize {
        self.surfaces.len() - 1
    }
    /// Clear aperture radius of the stop (mm).
    #[must_use]
    pub fn stop_semi_diameter_mm(&self) -> f64 {
        self.surfaces[self.stop_index]
            .semi_diameter_mm()
            .unwrap_or(f64::NAN)
    }
    /// Index of the primary source.
    #[must_use]
    pub const fn primary_index(&self) -> usize {
        self.primary_index
    }
    /// Primary wavelength.
    #[must_use]
    pub fn primary_wavelength(&self) -> Length {
        self.sources[self.primary_index].wavelength()
    }
    /// All source wavelengths in table order.
    #[must_use]
    pub fn wavelengths(&self) -> Vec<Length> {
        self.sources.iter().map(Source::wavelength).collect()
    }
    /// Returns true if the object is located at infinity.
    #[must_use]
    pub fn object_at_infinity(&self) -> bool {
        self.surfaces[0].thickness_mm().is_infinite()
    }
    /// Axial distance from the object surface to the stop (mm), summed over the surface thicknesses.
    #[must_use]
    pub fn object_to_stop_distance_mm(&self) -> f64 {
        self.surfaces[..self.stop_index]
            .iter()
            .map(Surface::thickness_mm)
            .sum()
    }
    /// Refractive index of the medium *behind* every surface at the given wavelength.
    ///
    /// Mirrors, stops, coordinate breaks and the image surface keep the medium in front of them.
    ///
    /// # Errors
    ///
    /// This function returns an error if a material cannot be evaluated at the wavelength.
    pub fn medium_indices(&self, wavelength: Length) -> TraceResult<Vec<f64>> {
        let mut indices = Vec::with_capacity(self.surfaces.len());
        let mut current = 1.0;
        for (index, surface) in self.surfaces.iter().enumerate() {
            if matches!(
                surface.surface_type(),
                SurfaceType::Object | SurfaceType::Lens
            ) {
                current = surface
                    .material()
                    .refractive_index(wavelength)
                    .map_err(|e| {
                        TraceError::InvalidSystem(format!(
                            "surface {index}: refractive index at {:.4} µm: {e}",
                            wavelength.get::<micrometer>()
                        ))
                    })?;
            }
            indices.push(current);
        }
        Ok(indices)
    }
}

fn resolve_stop(surfaces: &[Surface]) -> TraceResult<usize> {
    let stops: Vec<usize> = surfaces
        .iter()
        .enumerate()
        .filter(|(_, s)| s.surface_type() == SurfaceType::Stop)
        .map(|(i, _)| i)
        .collect();
    let stop_index = match stops.as_slice() {
        [] => surfaces
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_physical())
            .filter_map(|(i, s)| s.semi_diameter_mm().map(|sd| (i, sd)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
            .ok_or_else(|| {
                TraceError::InvalidSystem(
                    "no stop declared and no surface with a semi diameter found".into(),
                )
            })?,
        [index] => *index,
        _ => {
            return Err(TraceError::InvalidSystem(
                "contradictory stop declarations: more than one stop surface".into(),
            ))
        }
    };
    if surfaces[stop_index].semi_diameter().is_none() {
        return Err(TraceError::InvalidSystem(
            "the stop surface needs a semi diameter".into(),
        ));
    }
    Ok(stop_index)
}

fn resolve_sources(
    sources: Vec<Source>,
    config: &EngineConfig,
) -> TraceResult<(Vec<Source>, usize)> {
    if sources.is_empty() {
        let source = Source::new(micrometer!(config.primary_wavelength_um), true)?;
        return Ok((vec![source], 0));
    }
    let primaries: Vec<usize> = sources
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_primary())
        .map(|(i, _)| i)
        .collect();
    match primaries.as_slice() {
        [] => Ok((sources, 0)),
        [index] => Ok((sources, *index)),
        _ => Err(TraceError::InvalidSystem(
            "more than one primary wavelength declared".into(),
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        degree,
        refractive_index::{RefrIndexAbbe, RefractiveIndex},
        surface::{Material, Profile},
    };
    use approx::assert_abs_diff_eq;
    use assert_matches::assert_matches;

    fn singlet() -> Vec<Surface> {
        vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            Surface::stop(millimeter!(5.0), millimeter!(0.0)).unwrap(),
            Surface::lens(
                Profile::sphere(millimeter!(50.0)).unwrap(),
                millimeter!(3.0),
                Material::Model(RefrIndexAbbe::new(1.5168, 64.17).unwrap().to_enum()),
            )
            .unwrap(),
            Surface::lens(
                Profile::sphere(millimeter!(-50.0)).unwrap(),
                millimeter!(96.5),
                Material::Air,
            )
            .unwrap(),
            Surface::image(),
        ]
    }

    #[test]
    fn new() {
        let s = OpticalSystem::new(singlet(), vec![], vec![], EngineConfig::default()).unwrap();
        assert_eq!(s.stop_index(), 1);
        assert_eq!(s.image_index(), 4);
        assert_eq!(s.stop_semi_diameter_mm(), 5.0);
        assert!(s.object_at_infinity());
        assert_abs_diff_eq!(s.primary_wavelength().get::<micrometer>(), 0.5876, epsilon = 1e-12);
        assert_eq!(s.sources().len(), 1);
        assert_eq!(s.frames().len(), 5);
        assert_eq!(s.surfaces().len(), 5);
        assert!(s.surface(5).is_none());
    }
    #[test]
    fn too_few_surfaces() {
        assert_matches!(
            OpticalSystem::new(vec![], vec![], vec![], EngineConfig::default()),
            Err(TraceError::InvalidSystem(_))
        );
    }
    #[test]
    fn misplaced_object_and_image() {
        let mut surfaces = singlet();
        surfaces.swap(0, 4);
        assert_matches!(
            OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()),
            Err(TraceError::InvalidSystem(_))
        );
    }
    #[test]
    fn contradictory_stops() {
        let mut surfaces = singlet();
        surfaces[2].set_surface_type(SurfaceType::Stop);
        surfaces[2] = surfaces[2].clone().with_semi_diameter(millimeter!(6.0)).unwrap();
        assert_matches!(
            OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()),
            Err(TraceError::InvalidSystem(_))
        );
    }
    #[test]
    fn implicit_stop() {
        let mut surfaces = singlet();
        surfaces[1].set_surface_type(SurfaceType::Lens);
        surfaces[2] = surfaces[2].clone().with_semi_diameter(millimeter!(8.0)).unwrap();
        surfaces[3] = surfaces[3].clone().with_semi_diameter(millimeter!(7.0)).unwrap();
        let s = OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()).unwrap();
        assert_eq!(s.stop_index(), 1);
        let mut surfaces = singlet();
        surfaces[1] = Surface::lens(Profile::Plane, millimeter!(0.0), Material::Air).unwrap();
        assert_matches!(
            OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()),
            Err(TraceError::InvalidSystem(_))
        );
    }
    #[test]
    fn sources() {
        let sources = vec![
            Source::new(micrometer!(0.4861), false).unwrap(),
            Source::new(micrometer!(0.5876), true).unwrap(),
            Source::new(micrometer!(0.6563), false).unwrap(),
        ];
        let s = OpticalSystem::new(singlet(), sources, vec![], EngineConfig::default()).unwrap();
        assert_eq!(s.primary_index(), 1);
        assert_eq!(s.wavelengths().len(), 3);
        let sources = vec![
            Source::new(micrometer!(0.4861), true).unwrap(),
            Source::new(micrometer!(0.5876), true).unwrap(),
        ];
        assert_matches!(
            OpticalSystem::new(singlet(), sources, vec![], EngineConfig::default()),
            Err(TraceError::InvalidSystem(_))
        );
        let sources = vec![Source::new(micrometer!(0.6563), false).unwrap()];
        let s = OpticalSystem::new(singlet(), sources, vec![], EngineConfig::default()).unwrap();
        assert_eq!(s.primary_index(), 0);
        assert!(Source::new(micrometer!(-0.5), false).is_err());
    }
    #[test]
    fn unresolved_glass() {
        let mut surfaces = singlet();
        *surfaces[2].material_mut() = Material::Glass("N-BK7".into());
        assert_matches!(
            OpticalSystem::new(surfaces, vec![], vec![], EngineConfig::default()),
            Err(TraceError::InvalidSystem(_))
        );
    }
    #[test]
    fn medium_indices() {
        let s = OpticalSystem::new(singlet(), vec![], vec![], EngineConfig::default()).unwrap();
        let n = s.medium_indices(micrometer!(0.58756)).unwrap();
        assert_eq!(n.len(), 5);
        assert_eq!(n[0], 1.0);
        assert_eq!(n[1], 1.0);
        assert_abs_diff_eq!(n[2], 1.5168, epsilon = 1e-9);
        assert_eq!(n[3], 1.0);
        assert_eq!(n[4], 1.0);
    }
    #[test]
    fn fields() {
        let f = Field::angle(degree!(0.0), degree!(10.0));
        assert!(!f.is_on_axis());
        let f = Field::height(millimeter!(0.0), millimeter!(0.0))
            .with_zero_aberration_position(millimeter!(0.1));
        assert!(f.is_on_axis());
        assert_eq!(f.zero_aberration_position(), Some(millimeter!(0.1)));
        let f = Field::from(FieldRecord {
            kind: FieldKind::Rectangle,
            x: 1.0,
            y: 2.0,
            zero_aberration_position: None,
        });
        assert_matches!(f.spec(), FieldSpec::Rectangle { .. });
    }
    #[test]
    fn from_yaml() {
        let yaml = "
surfaces:
  - surface_type: Object
    thickness: .inf
  - surface_type: Stop
    semi_diameter: 5.0
  - radius: 50.0
    thickness: 3.0
    refractive_index: 1.5168
    abbe_number: 64.17
  - radius: -50.0
    thickness: 96.5
  - surface_type: Image
sources:
  - wavelength: 0.5876
    is_primary: true
fields:
  - kind: Angle
    y: 10.0
";
        let s = OpticalSystem::from_yaml(yaml, None).unwrap();
        assert_eq!(s.surfaces().len(), 5);
        assert_eq!(s.fields().len(), 1);
        assert!(s.object_at_infinity());
        assert_eq!(s.object_to_stop_distance_mm(), f64::INFINITY);
        assert_matches!(
            OpticalSystem::from_yaml("surfaces: []\nextra: 1\n", None),
            Err(TraceError::InvalidSystem(_))
        );
    }
}
