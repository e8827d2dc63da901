//! Coordinate breaks: decenter and tilt of all following surfaces.
use nalgebra::Vector3;
use num::Zero;
use serde::{Deserialize, Serialize};
use uom::si::{
    angle::radian,
    f64::{Angle, Length},
    length::millimeter,
};

use crate::{
    error::{TraceError, TraceResult},
    utils::geom_transformation::{euler_rotation, EulerOrder, Isometry},
};

/// Composition order of translation and rotation of a [`CoordBreak`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CoordBreakOrder {
    /// translate first, then rotate by `Rx · Ry · Rz`
    #[default]
    DecenterThenTilt,
    /// rotate by `Rz · Ry · Rx` first, then translate in the rotated frame
    TiltThenDecenter,
}

/// Decenter and tilt parameters of a coordinate break surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordBreak {
    decenter: [Length; 3],
    tilt: [Angle; 3],
    order: CoordBreakOrder,
}
impl Default for CoordBreak {
    fn default() -> Self {
        Self {
            decenter: [Length::zero(); 3],
            tilt: [Angle::zero(); 3],
            order: CoordBreakOrder::default(),
        }
    }
}
impl CoordBreak {
    /// Creates a new [`CoordBreak`].
    ///
    /// # Errors
    ///
    /// This function returns an error if any decenter or tilt value is not finite.
    pub fn new(
        decenter: [Length; 3],
        tilt: [Angle; 3],
        order: CoordBreakOrder,
    ) -> TraceResult<Self> {
        if decenter.iter().any(|d| !d.is_finite()) || tilt.iter().any(|t| !t.is_finite()) {
            return Err(TraceError::InvalidSystem(
                "coordinate break values must be finite".into(),
            ));
        }
        Ok(Self {
            decenter,
            tilt,
            order,
        })
    }
    /// Decenter along x, y, z.
    #[must_use]
    pub const fn decenter(&self) -> &[Length; 3] {
        &self.decenter
    }
    /// Tilt about x, y, z.
    #[must_use]
    pub const fn tilt(&self) -> &[Angle; 3] {
        &self.tilt
    }
    /// Composition order.
    #[must_use]
    pub const fn order(&self) -> CoordBreakOrder {
        self.order
    }
    /// Transformation of the coordinate break relative to the frame it is placed in.
    #[must_use]
    pub fn isometry(&self) -> Isometry {
        let d = Vector3::from_iterator(self.decenter.iter().map(|d| d.get::<millimeter>()));
        let [tx, ty, tz] = self.tilt.map(|t| t.get::<radian>());
        match self.order {
            CoordBreakOrder::DecenterThenTilt => Isometry::translation(d)
                .append(&Isometry::rotation(euler_rotation(tx, ty, tz, EulerOrder::Xyz))),
            CoordBreakOrder::TiltThenDecenter => {
                Isometry::rotation(euler_rotation(tx, ty, tz, EulerOrder::Zyx))
                    .append(&Isometry::translation(d))
            }
        }
    }
}
