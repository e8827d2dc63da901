//! Flat surface table rows as delivered by external editors.
//!
//! Lengths are given in millimeters and angles in degrees. A [`SurfaceRecord`] is converted into a [`Surface`]
//! with [`TryFrom`], which rejects inconsistent rows.
use serde::{Deserialize, Serialize};

use super::{CoordBreak, CoordBreakOrder, Material, Profile, Surface, SurfaceType};
use crate::{
    degree,
    error::{TraceError, TraceResult},
    millimeter,
    refractive_index::{RefrIndexAbbe, RefrIndexConst, RefractiveIndex},
};

/// One row of a surface table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SurfaceRecord {
    /// role of the surface
    pub surface_type: SurfaceType,
    /// signed radius of curvature in mm (`None` or infinite for flat surfaces)
    pub radius: Option<f64>,
    /// conic constant
    pub conic: f64,
    /// coefficients of `r², r⁴, … r²⁰`
    pub even_coefficients: Vec<f64>,
    /// coefficients of `r, r², r³, …`
    pub odd_coefficients: Vec<f64>,
    /// axial distance to the next surface in mm (may be infinite for the object surface)
    pub thickness: f64,
    /// refractive index at the d-line of the medium behind the surface
    pub refractive_index: Option<f64>,
    /// Abbe number of the medium behind the surface
    pub abbe_number: Option<f64>,
    /// catalog glass of the medium behind the surface
    pub glass: Option<String>,
    /// clear aperture radius in mm
    pub semi_diameter: Option<f64>,
    /// coordinate break decenter x, y, z in mm
    pub decenter: [f64; 3],
    /// coordinate break tilt about x, y, z in degrees
    pub tilt: [f64; 3],
    /// coordinate break composition order
    pub order: CoordBreakOrder,
}
impl Default for SurfaceRecord {
    fn default() -> Self {
        Self {
            surface_type: SurfaceType::Lens,
            radius: None,
            conic: 0.0,
            even_coefficients: Vec::new(),
            odd_coefficients: Vec::new(),
            thickness: 0.0,
            refractive_index: None,
            abbe_number: None,
            glass: None,
            semi_diameter: None,
            decenter: [0.0; 3],
            tilt: [0.0; 3],
            order: CoordBreakOrder::DecenterThenTilt,
        }
    }
}
impl SurfaceRecord {
    fn profile(&self) -> TraceResult<Profile> {
        let has_even = self.even_coefficients.iter().any(|c| *c != 0.0);
        let has_odd = self.odd_coefficients.iter().any(|c| *c != 0.0);
        if has_even && has_odd {
            return Err(TraceError::InvalidSystem(
                "surface has both even and odd aspheric coefficients".into(),
            ));
        }
        let Some(radius) = self.radius.filter(|r| r.is_finite()) else {
            return match (has_even, has_odd) {
                (true, _) => Profile::even_asphere(
                    millimeter!(f64::INFINITY),
                    self.conic,
                    self.even_coefficients.clone(),
                ),
                (_, true) => Profile::odd_asphere(
                    millimeter!(f64::INFINITY),
                    self.conic,
                    self.odd_coefficients.clone(),
                ),
                _ => Ok(Profile::Plane),
            };
        };
        match (has_even, has_odd) {
            (true, _) => Profile::even_asphere(
                millimeter!(radius),
                self.conic,
                self.even_coefficients.clone(),
            ),
            (_, true) => {
                Profile::odd_asphere(millimeter!(radius), self.conic, self.odd_coefficients.clone())
            }
            _ => Profile::conic(millimeter!(radius), self.conic),
        }
    }
    fn material(&self) -> TraceResult<Material> {
        if let Some(glass) = &self.glass {
            return Ok(Material::Glass(glass.clone()));
        }
        match (self.refractive_index, self.abbe_number) {
            (None, _) => Ok(Material::Air),
            (Some(n), Some(v)) if v.is_finite() && v > 0.0 => {
                Ok(Material::Model(RefrIndexAbbe::new(n, v)?.to_enum()))
            }
            (Some(n), _) if n == 1.0 => Ok(Material::Air),
            (Some(n), _) => Ok(Material::Model(RefrIndexConst::new(n)?.to_enum())),
        }
    }
}
impl TryFrom<SurfaceRecord> for Surface {
    type Error = TraceError;

    fn try_from(record: SurfaceRecord) -> TraceResult<Self> {
        let thickness = millimeter!(record.thickness);
        let mut surface = match record.surface_type {
            SurfaceType::CoordBreak => {
                let [dx, dy, dz] = record.decenter;
                let [tx, ty, tz] = record.tilt;
                let cb = CoordBreak::new(
                    [millimeter!(dx), millimeter!(dy), millimeter!(dz)],
                    [degree!(tx), degree!(ty), degree!(tz)],
                    record.order,
                )?;
                Self::coordinate_break(cb, thickness)?
            }
            surface_type => Self::new(surface_type, record.profile()?, thickness)?
                .with_material(record.material()?),
        };
        if let Some(sd) = record.semi_diameter {
            surface = surface.with_semi_diameter(millimeter!(sd))?;
        }
        Ok(surface)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{micrometer, refractive_index::RefractiveIndexType};
    use approx::assert_abs_diff_eq;
    use assert_matches::assert_matches;

    #[test]
    fn mixed_coefficients() {
        let record = SurfaceRecord {
            radius: Some(50.0),
            even_coefficients: vec![0.0, 1e-5],
            odd_coefficients: vec![1e-6],
            ..Default::default()
        };
        assert_matches!(Surface::try_from(record), Err(TraceError::InvalidSystem(_)));
    }
    #[test]
    fn zero_odd_coefficients_are_ignored() {
        let record = SurfaceRecord {
            radius: Some(50.0),
            even_coefficients: vec![0.0, 1e-5],
            odd_coefficients: vec![0.0, 0.0],
            ..Default::default()
        };
        let s = Surface::try_from(record).unwrap();
        assert_matches!(s.profile(), Profile::EvenAsphere { .. });
    }
    #[test]
    fn profiles() {
        let plane = Surface::try_from(SurfaceRecord::default()).unwrap();
        assert_eq!(plane.profile(), &Profile::Plane);
        let inf = Surface::try_from(SurfaceRecord {
            radius: Some(f64::INFINITY),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(inf.profile(), &Profile::Plane);
        let sphere = Surface::try_from(SurfaceRecord {
            radius: Some(-25.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(sphere.profile().curvature(), -0.04);
        let odd = Surface::try_from(SurfaceRecord {
            odd_coefficients: vec![0.0, 0.0, 1e-4],
            ..Default::default()
        })
        .unwrap();
        assert_matches!(odd.profile(), Profile::OddAsphere { .. });
        assert!(Surface::try_from(SurfaceRecord {
            radius: Some(0.0),
            ..Default::default()
        })
        .is_err());
    }
    #[test]
    fn materials() {
        let s = Surface::try_from(SurfaceRecord {
            refractive_index: Some(1.5168),
            abbe_number: Some(64.17),
            ..Default::default()
        })
        .unwrap();
        assert_matches!(s.material(), Material::Model(RefractiveIndexType::Abbe(_)));
        assert_abs_diff_eq!(
            s.material().refractive_index(micrometer!(0.58756)).unwrap(),
            1.5168,
            epsilon = 1e-9
        );
        let s = Surface::try_from(SurfaceRecord {
            refractive_index: Some(1.5),
            ..Default::default()
        })
        .unwrap();
        assert_matches!(s.material(), Material::Model(RefractiveIndexType::Const(_)));
        let s = Surface::try_from(SurfaceRecord {
            refractive_index: Some(1.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(s.material(), &Material::Air);
        let s = Surface::try_from(SurfaceRecord {
            glass: Some("N-BK7".into()),
            ..Default::default()
        })
        .unwrap();
        assert_matches!(s.material(), Material::Glass(_));
        assert!(Surface::try_from(SurfaceRecord {
            refractive_index: Some(0.5),
            ..Default::default()
        })
        .is_err());
    }
    #[test]
    fn coordinate_break() {
        let s = Surface::try_from(SurfaceRecord {
            surface_type: SurfaceType::CoordBreak,
            decenter: [0.0, 1.0, 0.0],
            tilt: [5.0, 0.0, 0.0],
            ..Default::default()
        })
        .unwrap();
        let cb = s.coord_break().unwrap();
        assert_abs_diff_eq!(cb.isometry().origin_mm().y, 1.0, epsilon = 1e-12);
    }
    #[test]
    fn semi_diameter() {
        let s = Surface::try_from(SurfaceRecord {
            semi_diameter: Some(4.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(s.semi_diameter_mm(), Some(4.0));
        assert!(Surface::try_from(SurfaceRecord {
            semi_diameter: Some(-4.0),
            ..Default::default()
        })
        .is_err());
    }
    #[test]
    fn yaml() {
        let yaml = "surface_type: Stop\nsemi_diameter: 5.0\nthickness: 2.0\n";
        let record: SurfaceRecord = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(record.surface_type, SurfaceType::Stop);
        assert!(serde_yaml::from_str::<SurfaceRecord>("unknown_field: 1\n").is_err());
    }
}
