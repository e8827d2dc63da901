use serde::{Deserialize, Serialize};
use uom::si::{f64::Length, length::micrometer};

use super::{RefractiveIndex, RefractiveIndexType};
use crate::error::{TraceError, TraceResult};

/// Sellmeier 1 dispersion formula with wavelengths in micrometers:
///
/// `n² = 1 + Σ kᵢ λ² / (λ² − lᵢ)`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct RefrIndexSellmeier1 {
    k1: f64,
    k2: f64,
    k3: f64,
    l1: f64,
    l2: f64,
    l3: f64,
}
impl Default for RefrIndexSellmeier1 {
    /// Schott N-BK7
    fn default() -> Self {
        Self {
            k1: 1.039_612_12,
            k2: 0.231_792_344,
            k3: 1.010_469_45,
            l1: 0.006_000_698_67,
            l2: 0.020_017_914_4,
            l3: 103.560_653,
        }
    }
}
impl RefrIndexSellmeier1 {
    /// Creates a new [`RefrIndexSellmeier1`].
    ///
    /// # Errors
    ///
    /// This function returns an error if any of the coefficients is not finite.
    pub fn new(k1: f64, k2: f64, k3: f64, l1: f64, l2: f64, l3: f64) -> TraceResult<Self> {
        if [k1, k2, k3, l1, l2, l3].iter().any(|c| !c.is_finite()) {
            return Err(TraceError::Other(
                "Sellmeier coefficients must be finite".into(),
            ));
        }
        Ok(Self {
            k1,
            k2,
            k3,
            l1,
            l2,
            l3,
        })
    }
}
impl RefractiveIndex for RefrIndexSellmeier1 {
    fn get_refractive_index(&self, wavelength: Length) -> TraceResult<f64> {
        let lambda = wavelength.get::<micrometer>();
        let l_sq = lambda * lambda;
        let n_sq = 1.0
            + self.k1 * l_sq / (l_sq - self.l1)
            + self.k2 * l_sq / (l_sq - self.l2)
            + self.k3 * l_sq / (l_sq - self.l3);
        if n_sq < 1.0 || !n_sq.is_finite() {
            return Err(TraceError::Other(format!(
                "Sellmeier model undefined at wavelength {lambda} µm"
            )));
        }
        Ok(n_sq.sqrt())
    }
    fn to_enum(&self) -> RefractiveIndexType {
        RefractiveIndexType::Sellmeier1(self.clone())
    }
}
