//! Numeric conversion helpers with the lossy casts confined to one place.
#[must_use]
pub const fn usize_to_f64(value: usize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let newval = value as f64;
    newval
}

#[must_use]
pub const fn isize_to_f64(value: isize) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let newval = value as f64;
    newval
}

/// Converts a non-negative `f64` to `usize` by truncation. Negative values and `NaN` yield 0.
#[must_use]
pub const fn f64_to_usize(value: f64) -> usize {
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    let newval = value as usize;
    newval
}

/// Converts a `f64` to `isize` by rounding to the nearest integer.
#[must_use]
pub fn f64_round_to_isize(value: f64) -> isize {
    #[allow(clippy::cast_possible_truncation)]
    let newval = value.round() as isize;
    newval
}
