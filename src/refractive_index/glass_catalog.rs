//! Glass catalogs in the Zemax AGF text format.
//!
//! Only the `NM` (name, dispersion formula, `n_d`, `V_d`) and `CD` (dispersion coefficients) records are
//! evaluated. All other records are ignored.
use std::collections::BTreeMap;

use log::warn;
use serde::{Deserialize, Serialize};

use super::{RefrIndexAbbe, RefrIndexSellmeier1, RefractiveIndex, RefractiveIndexType};
use crate::error::{TraceError, TraceResult};

/// AGF formula number of the Sellmeier 1 dispersion formula.
const AGF_FORMULA_SELLMEIER1: u32 = 2;

/// A single glass entry of a [`GlassCatalog`].
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct CatalogGlass {
    name: String,
    formula: u32,
    n_d: f64,
    v_d: f64,
    coefficients: Vec<f64>,
}
impl CatalogGlass {
    /// Name of the glass as given in the catalog.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Refractive index at the d-line.
    #[must_use]
    pub const fn n_d(&self) -> f64 {
        self.n_d
    }
    /// Abbe number.
    #[must_use]
    pub const fn v_d(&self) -> f64 {
        self.v_d
    }
    /// Returns the refractive index model of this glass.
    ///
    /// A Sellmeier 1 model is returned if the catalog provides its coefficients. For all other formulas
    /// the linear Abbe model is used.
    ///
    /// # Errors
    ///
    /// This function returns an error if the catalog values are not valid for either model.
    pub fn refractive_index(&self) -> TraceResult<RefractiveIndexType> {
        if self.formula == AGF_FORMULA_SELLMEIER1 && self.coefficients.len() >= 6 {
            let c = &self.coefficients;
            return Ok(RefrIndexSellmeier1::new(c[0], c[2], c[4], c[1], c[3], c[5])?.to_enum());
        }
        Ok(RefrIndexAbbe::new(self.n_d, self.v_d)?.to_enum())
    }
}

/// A collection of glasses, looked up by name.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct GlassCatalog {
    glasses: BTreeMap<String, CatalogGlass>,
}
impl GlassCatalog {
    /// Parses the content of an AGF file.
    ///
    /// # Errors
    ///
    /// This function returns an error if a `NM` record is malformed.
    pub fn from_agf(content: &str) -> TraceResult<Self> {
        let mut catalog = Self::default();
        let mut current: Option<CatalogGlass> = None;
        for (line_nr, line) in content.lines().enumerate() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("NM") => {
                    if let Some(glass) = current.take() {
                        catalog.insert(glass);
                    }
                    let parts: Vec<&str> = fields.collect();
                    if parts.len() < 5 {
                        return Err(TraceError::Other(format!(
                            "malformed NM record in line {}",
                            line_nr + 1
                        )));
                    }
                    let parse = |s: &str| {
                        s.parse::<f64>().map_err(|_| {
                            TraceError::Other(format!(
                                "could not parse number '{s}' in line {}",
                                line_nr + 1
                            ))
                        })
                    };
                    let formula = parts[1].parse::<u32>().map_err(|_| {
                        TraceError::Other(format!(
                            "invalid dispersion formula '{}' in line {}",
                            parts[1],
                            line_nr + 1
                        ))
                    })?;
                    current = Some(CatalogGlass {
                        name: parts[0].to_string(),
                        formula,
                        n_d: parse(parts[3])?,
                        v_d: parse(parts[4])?,
                        coefficients: Vec::new(),
                    });
                }
                Some("CD") => {
                    if let Some(glass) = current.as_mut() {
                        let coefficients: Result<Vec<f64>, _> =
                            fields.map(str::parse::<f64>).collect();
                        if let Ok(coefficients) = coefficients {
                            glass.coefficients = coefficients;
                        } else {
                            warn!(
                                "could not parse CD record of glass {}, using Abbe model",
                                glass.name
                            );
                        }
                    }
                }
                _ => {}
            }
        }
        if let Some(glass) = current.take() {
            catalog.insert(glass);
        }
        Ok(catalog)
    }
    fn insert(&mut self, glass: CatalogGlass) {
        self.glasses.insert(glass.name.clone(), glass);
    }
    /// Looks up a glass by name.
    #[must_use]
    pub fn glass(&self, name: &str) -> Option<&CatalogGlass> {
        self.glasses.get(name)
    }
    /// Returns the refractive index model of the named glass.
    ///
    /// # Errors
    ///
    /// This function returns an error if the glass is not part of the catalog.
    pub fn refractive_index(&self, name: &str) -> TraceResult<RefractiveIndexType> {
        self.glass(name)
            .ok_or_else(|| TraceError::InvalidSystem(format!("glass {name} not found in catalog")))?
            .refractive_index()
    }
    /// Number of glasses in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.glasses.len()
    }
    /// Returns true if the catalog does not contain any glass.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.glasses.is_empty()
    }
    /// Iterates over all glass names in alphabetical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.glasses.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{micrometer, utils::test_helper::test_helper::check_warnings};
    use approx::assert_abs_diff_eq;

    const AGF: &str = "CC Test catalog
NM N-BK7 2 517642.251 1.5168 64.17 0 1
GC
ED 7.1 8.3 2.51 0 0
CD 1.03961212 0.00600069867 0.231792344 0.0200179144 1.01046945 103.560653 0 0 0 0
TD 0 0 0 0 0 0 0
NM F2 5 620364.360 1.62004 36.37 0 1
CD 1.0 2.0 3.0
";

    #[test]
    fn parse() {
        let catalog = GlassCatalog::from_agf(AGF).unwrap();
        assert_eq!(catalog.len(), 2);
        assert!(!catalog.is_empty());
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["F2", "N-BK7"]);
        let bk7 = catalog.glass("N-BK7").unwrap();
        assert_eq!(bk7.name(), "N-BK7");
        assert_eq!(bk7.n_d(), 1.5168);
        assert_eq!(bk7.v_d(), 64.17);
    }
    #[test]
    fn sellmeier_model() {
        let catalog = GlassCatalog::from_agf(AGF).unwrap();
        let model = catalog.refractive_index("N-BK7").unwrap();
        assert!(matches!(model, RefractiveIndexType::Sellmeier1(_)));
        assert_abs_diff_eq!(
            model.get_refractive_index(micrometer!(0.5876)).unwrap(),
            1.5168,
            epsilon = 1e-4
        );
    }
    #[test]
    fn abbe_fallback() {
        let catalog = GlassCatalog::from_agf(AGF).unwrap();
        let model = catalog.refractive_index("F2").unwrap();
        assert!(matches!(model, RefractiveIndexType::Abbe(_)));
    }
    #[test]
    fn unknown_glass() {
        let catalog = GlassCatalog::from_agf(AGF).unwrap();
        assert!(matches!(
            catalog.refractive_index("SF99"),
            Err(TraceError::InvalidSystem(_))
        ));
    }
    #[test]
    fn malformed() {
        assert!(GlassCatalog::from_agf("NM X 2 1.5").is_err());
        assert!(GlassCatalog::from_agf("NM X a 0 1.5 60").is_err());
        assert!(GlassCatalog::from_agf("").unwrap().is_empty());
    }
    #[test]
    fn malformed_cd() {
        testing_logger::setup();
        let catalog = GlassCatalog::from_agf("NM X 2 0 1.5 60\nCD 1.0 abc\n").unwrap();
        check_warnings(vec!["could not parse CD record of glass X, using Abbe model"]);
        assert!(matches!(
            catalog.refractive_index("X").unwrap(),
            RefractiveIndexType::Abbe(_)
        ));
    }
}
