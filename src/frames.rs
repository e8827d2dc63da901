#![warn(missing_docs)]
//! Chained local frames of all surfaces of a system.
//!
//! The chain starts at the global origin with an identity rotation. Every surface advances the frame by its
//! thickness along the current local z axis. A coordinate break first applies its own transformation and then its
//! thickness. An infinite object distance does not contribute to the chain.
use nalgebra::{Point3, Vector3};

use crate::{
    error::{TraceError, TraceResult},
    surface::{Surface, SurfaceType},
    utils::geom_transformation::Isometry,
};

/// Local → global transformations of all surfaces of a system.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SystemFrames {
    frames: Vec<Isometry>,
}
impl SystemFrames {
    /// Computes the frames of the given surfaces.
    ///
    /// # Errors
    ///
    /// This function returns an error if a surface other than the object surface has a non-finite thickness.
    pub fn new(surfaces: &[Surface]) -> TraceResult<Self> {
        let mut frames = Vec::with_capacity(surfaces.len());
        let mut current = Isometry::identity();
        for (index, surface) in surfaces.iter().enumerate() {
            frames.push(current);
            if let Some(cb) = surface.coord_break() {
                current = current.append(&cb.isometry());
            }
            let thickness = surface.thickness_mm();
            let advance = if thickness.is_finite() {
                thickness
            } else if surface.surface_type() == SurfaceType::Object && index == 0 {
                0.0
            } else {
                return Err(TraceError::InvalidSystem(format!(
                    "thickness of surface {index} must be finite"
                )));
            };
            if advance != 0.0 {
                current = current.append(&Isometry::translation(Vector3::new(0.0, 0.0, advance)));
            }
        }
        Ok(Self { frames })
    }
    /// Frame of the surface with the given index.
    #[must_use]
    pub fn frame(&self, index: usize) -> Option<&Isometry> {
        self.frames.get(index)
    }
    /// Number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }
    /// Returns true if no frames are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
    /// Transforms a global point and direction into the frame of surface `index`.
    #[must_use]
    pub fn to_local(
        &self,
        index: usize,
        position: &Point3<f64>,
        direction: &Vector3<f64>,
    ) -> Option<(Point3<f64>, Vector3<f64>)> {
        let frame = self.frames.get(index)?;
        Some((
            frame.inverse_transform_point_f64(position),
            frame.inverse_transform_vector_f64(direction),
        ))
    }
    /// Transforms a local point and direction of surface `index` into global coordinates.
    #[must_use]
    pub fn to_global(
        &self,
        index: usize,
        position: &Point3<f64>,
        direction: &Vector3<f64>,
    ) -> Option<(Point3<f64>, Vector3<f64>)> {
        let frame = self.frames.get(index)?;
        Some((
            frame.transform_point_f64(position),
            frame.transform_vector_f64(direction),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        degree, millimeter,
        surface::{CoordBreak, CoordBreakOrder, Material, Profile},
    };
    use approx::assert_abs_diff_eq;

    fn lens(thickness: f64) -> Surface {
        Surface::lens(Profile::Plane, millimeter!(thickness), Material::Air).unwrap()
    }

    #[test]
    fn straight_chain() {
        let surfaces = vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            lens(5.0),
            lens(10.0),
            Surface::image(),
        ];
        let frames = SystemFrames::new(&surfaces).unwrap();
        assert_eq!(frames.len(), 4);
        assert!(!frames.is_empty());
        assert_abs_diff_eq!(frames.frame(1).unwrap().origin_mm(), Point3::origin());
        assert_abs_diff_eq!(frames.frame(2).unwrap().origin_mm(), Point3::new(0.0, 0.0, 5.0));
        assert_abs_diff_eq!(frames.frame(3).unwrap().origin_mm(), Point3::new(0.0, 0.0, 15.0));
        assert!(frames.frame(4).is_none());
    }
    #[test]
    fn finite_object() {
        let surfaces = vec![
            Surface::object(millimeter!(100.0)).unwrap(),
            lens(5.0),
            Surface::image(),
        ];
        let frames = SystemFrames::new(&surfaces).unwrap();
        assert_abs_diff_eq!(frames.frame(1).unwrap().origin_mm(), Point3::new(0.0, 0.0, 100.0));
    }
    #[test]
    fn infinite_inner_thickness() {
        let surfaces = vec![
            Surface::object(millimeter!(10.0)).unwrap(),
            lens(f64::INFINITY),
            Surface::image(),
        ];
        assert!(SystemFrames::new(&surfaces).is_err());
    }
    #[test]
    fn coordinate_break_fold() {
        let cb = CoordBreak::new(
            [millimeter!(0.0), millimeter!(1.0), millimeter!(0.0)],
            [degree!(90.0), degree!(0.0), degree!(0.0)],
            CoordBreakOrder::DecenterThenTilt,
        )
        .unwrap();
        let surfaces = vec![
            Surface::object(millimeter!(f64::INFINITY)).unwrap(),
            lens(10.0),
            Surface::coordinate_break(cb, millimeter!(5.0)).unwrap(),
            Surface::image(),
        ];
        let frames = SystemFrames::new(&surfaces).unwrap();
        // the coordinate break itself sits at the end of the previous thickness
        assert_abs_diff_eq!(frames.frame(2).unwrap().origin_mm(), Point3::new(0.0, 0.0, 10.0));
        // decenter by 1 along y, rotate by 90° about x, then move 5 along the new z axis (-y)
        assert_abs_diff_eq!(
            frames.frame(3).unwrap().origin_mm(),
            Point3::new(0.0, -4.0, 10.0),
            epsilon = 1e-12
        );
        let (p, d) = frames
            .to_local(3, &Point3::new(0.0, -4.0, 10.0), &Vector3::new(0.0, -1.0, 0.0))
            .unwrap();
        assert_abs_diff_eq!(p, Point3::origin(), epsilon = 1e-12);
        assert_abs_diff_eq!(d, Vector3::z(), epsilon = 1e-12);
        let (g, _) = frames.to_global(3, &p, &d).unwrap();
        assert_abs_diff_eq!(g, Point3::new(0.0, -4.0, 10.0), epsilon = 1e-12);
    }
}
