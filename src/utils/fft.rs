//! Two dimensional FFT on square grids.
//!
//! FFT plans are cached process wide keyed by the grid size. Callers own their data buffers.
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::error::{TraceError, TraceResult};

type PlanCache = Mutex<HashMap<usize, Arc<dyn Fft<f64>>>>;

static FORWARD_PLANS: OnceLock<PlanCache> = OnceLock::new();

fn forward_plan(len: usize) -> Arc<dyn Fft<f64>> {
    let cache = FORWARD_PLANS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut plans = cache.lock().unwrap_or_else(PoisonError::into_inner);
    plans
        .entry(len)
        .or_insert_with(|| FftPlanner::<f64>::new().plan_fft_forward(len))
        .clone()
}

/// Performs an unnormalized forward 2D FFT of a row-major `n × n` grid in place.
///
/// The transform is done as a row FFT, a transposition, a second row FFT and a transposition back.
///
/// # Errors
///
/// This function returns an error if the buffer length does not match `n²` or `n` is zero.
pub fn fft2_inplace(data: &mut [Complex<f64>], n: usize) -> TraceResult<()> {
    if n == 0 || data.len() != n * n {
        return Err(TraceError::Other(format!(
            "fft buffer of length {} does not match grid size {n}",
            data.len()
        )));
    }
    let fft = forward_plan(n);
    let mut scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
    fft.process_with_scratch(data, &mut scratch);
    transpose_inplace(data, n);
    fft.process_with_scratch(data, &mut scratch);
    transpose_inplace(data, n);
    Ok(())
}

fn transpose_inplace<T>(data: &mut [T], n: usize) {
    for row in 0..n {
        for col in (row + 1)..n {
            data.swap(row * n + col, col * n + row);
        }
    }
}

/// Swaps the quadrants of a row-major `n × n` grid so that the zero frequency moves to `(n/2, n/2)`.
pub fn fftshift<T: Copy>(data: &mut [T], n: usize) {
    cyclic_shift(data, n, n / 2, n / 2);
}

/// Cyclically shifts a row-major `n × n` grid by `shift_row` rows and `shift_col` columns.
pub fn cyclic_shift<T: Copy>(data: &mut [T], n: usize, shift_row: usize, shift_col: usize) {
    if n == 0 || data.len() != n * n {
        return;
    }
    let src = data.to_vec();
    for row in 0..n {
        let new_row = (row + shift_row) % n;
        for col in 0..n {
            let new_col = (col + shift_col) % n;
            data[new_row * n + new_col] = src[row * n + col];
        }
    }
}
