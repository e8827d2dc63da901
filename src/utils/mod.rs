//! Module for additional computational capabilities
pub mod fft;
pub mod geom_transformation;
pub mod math_utils;
pub mod test_helper;
pub mod uom_macros;
pub use math_utils::{f64_to_usize, isize_to_f64, usize_to_f64};
