//! Linear dispersion model derived from `n_d` and the Abbe number `V_d`.
use serde::{Deserialize, Serialize};
use uom::si::{f64::Length, length::micrometer};

use super::{RefractiveIndex, RefractiveIndexType, LAMBDA_C_UM, LAMBDA_D_UM, LAMBDA_F_UM};
use crate::error::{TraceError, TraceResult};

/// Refractive index varying linearly with wavelength such that `n_F − n_C = (n_d − 1) / V_d`.
///
/// An infinite Abbe number yields a dispersion free material.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct RefrIndexAbbe {
    n_d: f64,
    abbe_number: f64,
}
impl Default for RefrIndexAbbe {
    fn default() -> Self {
        Self {
            n_d: 1.5168,
            abbe_number: 64.17,
        }
    }
}
impl RefrIndexAbbe {
    /// Creates a new [`RefrIndexAbbe`].
    ///
    /// # Errors
    ///
    /// This function will return an error if `n_d` is < 1.0 or not finite or the Abbe number is not positive.
    pub fn new(n_d: f64, abbe_number: f64) -> TraceResult<Self> {
        if n_d < 1.0 || !n_d.is_finite() {
            return Err(TraceError::Other(
                "refractive index must be >=1.0 and finite.".into(),
            ));
        }
        if abbe_number.is_nan() || abbe_number <= 0.0 {
            return Err(TraceError::Other("Abbe number must be positive".into()));
        }
        Ok(Self { n_d, abbe_number })
    }
    /// Refractive index at the d-line.
    #[must_use]
    pub const fn n_d(&self) -> f64 {
        self.n_d
    }
    /// Abbe number.
    #[must_use]
    pub const fn abbe_number(&self) -> f64 {
        self.abbe_number
    }
    /// Principal dispersion `n_F − n_C`.
    #[must_use]
    pub fn principal_dispersion(&self) -> f64 {
        if self.abbe_number.is_infinite() {
            0.0
        } else {
            (self.n_d - 1.0) / self.abbe_number
        }
    }
}
impl RefractiveIndex for RefrIndexAbbe {
    fn get_refractive_index(&self, wavelength: Length) -> TraceResult<f64> {
        let lambda = wavelength.get::<micrometer>();
        let slope = self.principal_dispersion() / (LAMBDA_C_UM - LAMBDA_F_UM);
        Ok(slope.mul_add(-(lambda - LAMBDA_D_UM), self.n_d))
    }
    fn to_enum(&self) -> RefractiveIndexType {
        RefractiveIndexType::Abbe(self.clone())
    }
}
