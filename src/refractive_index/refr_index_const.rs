use serde::{Deserialize, Serialize};
use uom::si::f64::Length;

use super::{RefractiveIndex, RefractiveIndexType};
use crate::error::{TraceError, TraceResult};

/// Wavelength independent refractive index
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct RefrIndexConst {
    refractive_index: f64,
}
impl Default for RefrIndexConst {
    fn default() -> Self {
        Self {
            refractive_index: 1.0,
        }
    }
}
impl RefrIndexConst {
    /// Creates a new [`RefrIndexConst`].
    ///
    /// # Errors
    ///
    /// This function will return an error if the given value is < 1.0 or not finite.
    pub fn new(refractive_index: f64) -> TraceResult<Self> {
        if refractive_index < 1.0 || !refractive_index.is_finite() {
            return Err(TraceError::Other(
                "refractive index must be >=1.0 and finite.".into(),
            ));
        }
        Ok(Self { refractive_index })
    }
}
/// Refractive index of air, approximated as 1.0.
#[must_use]
pub fn refr_index_air() -> RefractiveIndexType {
    RefractiveIndexType::Const(RefrIndexConst::default())
}

impl RefractiveIndex for RefrIndexConst {
    fn get_refractive_index(&self, _wavelength: Length) -> TraceResult<f64> {
        Ok(self.refractive_index)
    }
    fn to_enum(&self) -> RefractiveIndexType {
        RefractiveIndexType::Const(self.clone())
    }
}
