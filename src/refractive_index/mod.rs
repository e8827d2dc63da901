//! Module for handling the refractive index of an optical material.
#![warn(missing_docs)]
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use strum::EnumIter;
use strum::IntoEnumIterator;
use uom::si::f64::Length;

pub mod glass_catalog;
pub mod refr_index_abbe;
pub mod refr_index_const;
pub mod refr_index_sellmeier1;

pub use glass_catalog::{CatalogGlass, GlassCatalog};
pub use refr_index_abbe::RefrIndexAbbe;
pub use refr_index_const::{refr_index_air, RefrIndexConst};
pub use refr_index_sellmeier1::RefrIndexSellmeier1;

use crate::error::{TraceError, TraceResult};

/// Wavelength of the helium d-line in micrometers.
pub const LAMBDA_D_UM: f64 = 0.587_56;
/// Wavelength of the hydrogen F-line in micrometers.
pub const LAMBDA_F_UM: f64 = 0.486_13;
/// Wavelength of the hydrogen C-line in micrometers.
pub const LAMBDA_C_UM: f64 = 0.656_27;

/// Available models for the calculation of refractive index
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, EnumIter)]
pub enum RefractiveIndexType {
    /// Trivial model returning a wavelength-independant constant
    Const(RefrIndexConst),
    /// Linear dispersion synthesized from the d-line index and the Abbe number
    Abbe(RefrIndexAbbe),
    /// Sellmeier 1 model
    Sellmeier1(RefrIndexSellmeier1),
}

impl Default for RefractiveIndexType {
    fn default() -> Self {
        Self::Const(RefrIndexConst::default())
    }
}

impl RefractiveIndexType {
    /// Get the refractive index value of the [`RefractiveIndexType`] for the given wavelength.
    ///
    /// # Errors
    ///
    /// This function returns an error if the the refractive index could not be calculated e.g.:
    ///   - the given wavelength is not positive or not finite.
    ///   - the model would calculate a value below 1.0, NaN or infinity
    pub fn get_refractive_index(&self, wavelength: Length) -> TraceResult<f64> {
        if !wavelength.is_finite() || wavelength.value <= 0.0 {
            return Err(TraceError::Other(
                "wavelength must be positive and finite".into(),
            ));
        }
        let refr_index = match self {
            Self::Const(refr_index_const) => refr_index_const.get_refractive_index(wavelength)?,
            Self::Abbe(refr_index_abbe) => refr_index_abbe.get_refractive_index(wavelength)?,
            Self::Sellmeier1(refr_index_sellmeier1) => {
                refr_index_sellmeier1.get_refractive_index(wavelength)?
            }
        };
        if refr_index < 1.0 || !refr_index.is_finite() {
            return Err(TraceError::Other(
                "refractive index calculated by model is <1.0 or not finite".into(),
            ));
        }
        Ok(refr_index)
    }
    /// Creates a default instance of a refractive index type by its display name.
    #[must_use]
    pub fn default_from_name(name: &str) -> Option<Self> {
        Self::iter().find(|ref_ind_type| format!("{ref_ind_type}") == name)
    }
}

impl Display for RefractiveIndexType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Const(_) => write!(f, "Constant"),
            Self::Abbe(_) => write!(f, "Abbe dispersion"),
            Self::Sellmeier1(_) => write!(f, "Sellmeier equation"),
        }
    }
}
/// All refractive index models must implement this trait.
pub trait RefractiveIndex {
    /// Get the refractive index value of the current model for the given wavelength.
    ///
    /// # Errors
    ///
    /// This function returns an error if the the refractive index could not be calculated.
    fn get_refractive_index(&self, wavelength: Length) -> TraceResult<f64>;
    /// Create a corresponding [`RefractiveIndexType`] value.
    fn to_enum(&self) -> RefractiveIndexType;
}
